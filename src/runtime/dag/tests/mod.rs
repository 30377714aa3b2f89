//! DAG 模块单元测试
//!
//! 测试任务标识、happens-before 可达性以及加边时的良构性检查

use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use crate::error::Error;
use crate::runtime::dag::edge::add_edge;
use crate::runtime::dag::{ordered_before, TaskId, TaskIdGenerator};
use crate::runtime::scheduler::{Task, TaskRef, TaskState};

static EDGES: Mutex<()> = Mutex::new(());

/// Edge checks on, serialized through one lock as a pool does.
fn checked() -> Option<&'static Mutex<()>> {
    Some(&EDGES)
}

fn bound(name: &str) -> TaskRef {
    Task::with_body(name, |_| Ok(()))
}

/// Drive a task through the states the pool would, without running a body.
fn run_to_retirement(task: &TaskRef) -> Vec<TaskRef> {
    task.begin();
    task.retire().into_vec()
}

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_new() {
        let id = TaskId::new(1);
        assert_eq!(id.value(), 1);
        assert_eq!(id, TaskId(1));
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(format!("{}", TaskId(42)), "Task(42)");
    }

    #[test]
    fn test_generator_is_unique_across_threads() {
        use std::sync::Arc;
        use std::thread;

        let generator = Arc::new(TaskIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..250).map(|_| generator.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = hashbrown::HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "{} issued twice", id);
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_tasks_get_distinct_ids() {
        let a = Task::new("a");
        let b = Task::new("b");
        assert_ne!(a.id(), b.id());
    }
}

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[test]
    fn test_transitive_ordering() {
        let a = bound("a");
        let b = bound("b");
        let c = bound("c");
        add_edge(&a, &a, &b, checked()).unwrap();
        add_edge(&b, &b, &c, checked()).unwrap();

        assert!(ordered_before(&a, &b));
        assert!(ordered_before(&a, &c));
        assert!(a.is_ordered_before(&c));
        assert!(!ordered_before(&c, &a));
        assert!(!ordered_before(&a, &a));
    }

    #[test]
    fn test_diamond_is_walked_once() {
        let top = bound("top");
        let left = bound("left");
        let right = bound("right");
        let bottom = bound("bottom");
        add_edge(&top, &top, &left, checked()).unwrap();
        add_edge(&top, &top, &right, checked()).unwrap();
        add_edge(&left, &left, &bottom, checked()).unwrap();
        add_edge(&right, &right, &bottom, checked()).unwrap();

        assert!(ordered_before(&top, &bottom));
        assert!(!ordered_before(&left, &right));
        assert_eq!(bottom.state(), TaskState::Pending(2));
    }

    #[test]
    fn test_retired_task_orders_nothing() {
        let a = bound("a");
        let b = bound("b");
        add_edge(&a, &a, &b, checked()).unwrap();
        assert!(a.force_ready());

        let released = run_to_retirement(&a);
        assert_eq!(released.len(), 1);
        assert!(!ordered_before(&a, &b));
    }
}

#[cfg(test)]
mod edge_tests {
    use super::*;

    #[test]
    fn test_self_edge_is_a_cycle() {
        let a = bound("a");
        assert!(matches!(add_edge(&a, &a, &a, checked()), Err(Error::CycleDetected { .. })));
        assert!(matches!(add_edge(&a, &a, &a, None), Err(Error::CycleDetected { .. })));
    }

    #[test]
    fn test_unbound_successor() {
        let a = bound("a");
        let b = Task::new("b");
        assert!(matches!(add_edge(&a, &a, &b, checked()), Err(Error::Unbound(id)) if id == b.id()));

        b.bind(|_| Ok(())).unwrap();
        assert!(add_edge(&a, &a, &b, checked()).is_ok());
    }

    #[test]
    fn test_cycle_detected() {
        let a = bound("a");
        let b = bound("b");
        let c = bound("c");
        add_edge(&a, &a, &b, checked()).unwrap();
        add_edge(&b, &b, &c, checked()).unwrap();

        let err = add_edge(&c, &c, &a, checked()).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { from, to } if from == c.id() && to == a.id()));
        assert_eq!(a.state(), TaskState::Uninitialized);
        assert_eq!(c.state(), TaskState::Pending(1));
        assert!(c.successors_snapshot().is_empty());
        assert_eq!(a.successors_snapshot().len(), 1);
    }

    #[test]
    fn test_concurrent_opposite_edges_never_close_a_cycle() {
        for _ in 0..500 {
            let (n1, n2) = (bound("n1"), bound("n2"));
            let (a, b) = (bound("a"), bound("b"));
            add_edge(&n1, &n1, &b, checked()).unwrap();
            add_edge(&n2, &n2, &a, checked()).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let forward = {
                let (barrier, n1, a, b) = (barrier.clone(), n1.clone(), a.clone(), b.clone());
                thread::spawn(move || {
                    barrier.wait();
                    add_edge(&n1, &a, &b, checked()).is_ok()
                })
            };
            let backward = {
                let (barrier, n2, a, b) = (barrier.clone(), n2.clone(), a.clone(), b.clone());
                thread::spawn(move || {
                    barrier.wait();
                    add_edge(&n2, &b, &a, checked()).is_ok()
                })
            };

            let forward = forward.join().unwrap();
            let backward = backward.join().unwrap();
            assert!(forward != backward, "exactly one of the opposite edges is accepted");
            assert!(!(ordered_before(&a, &b) && ordered_before(&b, &a)));
        }
    }

    #[test]
    fn test_edge_from_unrelated_task_is_rejected() {
        let outsider = bound("outsider");
        let a = bound("a");
        let b = bound("b");

        let err = add_edge(&outsider, &a, &b, checked()).unwrap_err();
        assert!(matches!(err, Error::OrderingViolation { now, .. } if now == outsider.id()));
        assert_eq!(b.state(), TaskState::Uninitialized);
    }

    #[test]
    fn test_edge_into_own_future() {
        let parent = bound("parent");
        let a = bound("a");
        let b = bound("b");
        add_edge(&parent, &parent, &b, checked()).unwrap();

        add_edge(&parent, &a, &b, checked()).unwrap();
        assert_eq!(b.state(), TaskState::Pending(2));
        assert!(ordered_before(&a, &b));
    }

    #[test]
    fn test_checks_can_be_disabled() {
        let outsider = bound("outsider");
        let a = bound("a");
        let b = bound("b");

        add_edge(&outsider, &a, &b, None).unwrap();
        assert_eq!(b.state(), TaskState::Pending(1));
    }

    #[test]
    fn test_edge_from_retired_predecessor_is_satisfied() {
        let a = bound("a");
        let b = bound("b");
        assert!(a.force_ready());
        run_to_retirement(&a);

        add_edge(&a, &a, &b, checked()).unwrap();
        assert_eq!(b.state(), TaskState::Uninitialized);
    }

    #[test]
    fn test_started_successor_is_rejected() {
        let a = bound("a");
        let b = bound("b");
        assert!(b.force_ready());

        for check in [checked(), None] {
            let err = add_edge(&a, &a, &b, check).unwrap_err();
            assert!(matches!(err, Error::OrderingViolation { .. }));
        }
        assert_eq!(b.state(), TaskState::Ready);
    }

    #[test]
    fn test_last_release_makes_successor_ready() {
        let p1 = bound("p1");
        let p2 = bound("p2");
        let s = bound("s");
        add_edge(&p1, &p1, &s, checked()).unwrap();
        add_edge(&p2, &p2, &s, checked()).unwrap();
        assert!(p1.force_ready());
        assert!(p2.force_ready());

        for released in run_to_retirement(&p1) {
            assert!(!released.release());
        }
        assert_eq!(s.state(), TaskState::Pending(1));

        for released in run_to_retirement(&p2) {
            assert!(released.release());
        }
        assert_eq!(s.state(), TaskState::Ready);
    }
}
