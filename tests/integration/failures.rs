//! Errors escaping task bodies abort the pool and reach the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use permflow::util::config::RuntimeConfig;
use permflow::{Error, Registry, Scheduler, Task};

fn scheduler() -> Scheduler {
    Scheduler::new().with_registry(Arc::new(Registry::new()))
}

#[test]
fn racing_writer_is_reported() {
    let err = scheduler()
        .run("main", |ctx| {
            let object = ctx.new_object();
            ctx.spawn("writer", move |ctx| Ok(ctx.check_write(object)?))?;
            Ok(())
        })
        .unwrap_err();

    match err {
        Error::AccessDenied { object, keychain, .. } => {
            assert_eq!(object.index(), 0);
            assert!(keychain.starts_with("Single("));
        },
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn cycle_inside_body_is_reported() {
    let err = scheduler()
        .run("main", |ctx| {
            let a = ctx.spawn("a", |_| Ok(()))?;
            let b = ctx.spawn("b", |_| Ok(()))?;
            ctx.add_edge(&a, &b)?;
            ctx.add_edge(&b, &a)?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::CycleDetected { .. }));
}

#[test]
fn edge_into_someone_elses_future_is_rejected() {
    let err = scheduler()
        .run("main", |ctx| {
            let stranger = Task::with_body("stranger", |_| Ok(()));
            let late = Task::with_body("late", |_| Ok(()));
            ctx.add_edge(&stranger, &late)?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::OrderingViolation { .. }));
}

#[test]
fn disabled_checks_accept_unrelated_edges() {
    let config = RuntimeConfig {
        check_wellformedness: false,
        ..RuntimeConfig::default()
    };

    Scheduler::from_runtime_config(&config)
        .with_registry(Arc::new(Registry::new()))
        .run("main", |ctx| {
            let stranger = Task::with_body("stranger", |_| Ok(()));
            let late = Task::with_body("late", |_| Ok(()));
            ctx.add_edge(&stranger, &late)?;
            Ok(())
        })
        .unwrap();
}

#[test]
fn no_body_starts_after_a_failure() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();

    let err = Scheduler::with_config(permflow::SchedulerConfig {
        num_workers: 1,
        ..Default::default()
    })
    .with_registry(Arc::new(Registry::new()))
    .run("main", move |ctx| {
        for i in 0..16 {
            let counter = counter.clone();
            ctx.spawn(format!("late-{}", i), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?;
        }
        // pushed last, so the releasing worker pops it first
        ctx.spawn("fails", |_| anyhow::bail!("first child failed"))?;
        Ok(())
    })
    .unwrap_err();

    assert_eq!(err.to_string(), "first child failed");
    assert!(started.load(Ordering::SeqCst) < 16);
}
