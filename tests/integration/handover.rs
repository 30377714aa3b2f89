//! Rights moving along happens-before edges: readers forked off a parent
//! hand their keys to the join, which ends up the sole owner again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use permflow::{Guarded, KeyChain, ObjectId, Registry, Scheduler, SchedulerConfig, Task, TaskContext, TaskRef};

const FORKS: usize = 101;

fn fork(
    ctx: &TaskContext<'_>,
    join: &TaskRef,
    read_only: ObjectId,
    results: &Arc<Guarded<Vec<ObjectId>>>,
) -> anyhow::Result<()> {
    // readable through the parent's add_reader; results is shared
    ctx.check_read(read_only)?;
    ctx.check_write(results.id())?;

    let result = ctx.new_object();
    ctx.link(read_only, result)?;
    results.write(ctx)?.push(result);

    ctx.replace_owner(read_only, join)?;
    Ok(())
}

fn join(
    ctx: &TaskContext<'_>,
    mine: ObjectId,
    results: &Arc<Guarded<Vec<ObjectId>>>,
) -> anyhow::Result<()> {
    ctx.check_write(results.id())?;
    ctx.check_write(mine)?;

    let linked = results.read(ctx)?.clone();
    anyhow::ensure!(linked.len() == FORKS, "expected {} results, got {}", FORKS, linked.len());
    for &result in &linked {
        ctx.check_write(result)?;
        ctx.unlink(result)?;
        anyhow::ensure!(ctx.registry().keychain(result)? == KeyChain::Single(ctx.now()));
    }

    let stranger = Task::new("stranger");
    ctx.add_reader(mine, &stranger)?;
    anyhow::ensure!(ctx.check_write(mine).is_err(), "a shared object stayed writable");

    for &result in &linked {
        ctx.check_write(result)?;
    }
    Ok(())
}

#[test]
fn forks_hand_read_rights_back_to_join() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();

    let scheduler = Scheduler::with_config(SchedulerConfig {
        num_workers: 4,
        ..SchedulerConfig::default()
    })
    .with_registry(Arc::new(Registry::new()));

    scheduler
        .run("main", move |ctx| {
            let results = Arc::new(Guarded::new(ctx.registry().clone(), ctx, Vec::new()));
            ctx.freeze_shared(results.id())?;
            let read_only = ctx.new_object();

            let join_task = Task::with_body("join", {
                let results = results.clone();
                move |ctx| {
                    join(ctx, read_only, &results)?;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            });
            ctx.add_edge(ctx.task(), &join_task)?;

            for i in (0..FORKS).rev() {
                let (handoff, results) = (join_task.clone(), results.clone());
                let fork_task = ctx.spawn(format!("fork-{}", i), move |ctx| fork(ctx, &handoff, read_only, &results))?;
                ctx.add_reader(read_only, &fork_task)?;
                ctx.add_edge(&fork_task, &join_task)?;
            }

            ctx.replace_owner(read_only, &join_task)?;
            Ok(())
        })
        .unwrap();

    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn parent_keeps_nothing_after_handover() {
    let registry = Arc::new(Registry::new());
    let observer = registry.clone();

    Scheduler::new()
        .with_registry(registry)
        .run("main", move |ctx| {
            let object = ctx.new_object();
            let child = ctx.spawn("child", move |ctx| Ok(ctx.check_write(object)?))?;
            ctx.replace_owner(object, &child)?;

            anyhow::ensure!(ctx.check_read(object).is_err(), "parent can still read");
            anyhow::ensure!(observer.is_owned_by(child.id(), object));
            Ok(())
        })
        .unwrap();
}
