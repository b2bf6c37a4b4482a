use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipyard_exec::{Job, JobResult, Scheduler};
use tokio::sync::Barrier;

#[tokio::test]
async fn failing_and_panicking_jobs_do_not_stop_the_pool() {
    let scheduler = Scheduler::start(2).expect("start");
    let handle = scheduler.handle();
    let completed = Arc::new(AtomicUsize::new(0));

    handle
        .schedule(Job::new("fails", async { JobResult::Err("boom".into()) }))
        .expect("schedule");
    handle
        .schedule(Job::new("panics", async { panic!("job exploded") }))
        .expect("schedule");
    for i in 0..6 {
        let completed = completed.clone();
        handle
            .schedule(Job::new(format!("ok-{i}"), async move {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .expect("schedule");
    }

    tokio::time::timeout(Duration::from_secs(5), handle.wait_idle())
        .await
        .expect("queue drained");
    assert_eq!(completed.load(Ordering::SeqCst), 6);
    assert_eq!(handle.pending(), 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn same_key_jobs_never_overlap_and_keep_submission_order() {
    let scheduler = Scheduler::start(4).expect("start");
    let handle = scheduler.handle();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let running = running.clone();
        let max_running = max_running.clone();
        let order = order.clone();
        let job = Job::new(format!("update svc-a #{i}"), async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            order.lock().expect("order").push(i);
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .keyed("service/svc-a");
        handle.schedule(job).expect("schedule");
    }

    handle.wait_idle().await;
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().expect("order"), vec![0, 1, 2, 3, 4]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn distinct_keys_run_concurrently() {
    let scheduler = Scheduler::start(2).expect("start");
    let handle = scheduler.handle();
    // Both jobs must be inside the barrier at once for either to finish.
    let barrier = Arc::new(Barrier::new(2));

    for name in ["svc-a", "svc-b"] {
        let barrier = barrier.clone();
        handle
            .schedule(
                Job::new(format!("deploy {name}"), async move {
                    barrier.wait().await;
                    Ok(())
                })
                .keyed(format!("service/{name}")),
            )
            .expect("schedule");
    }

    tokio::time::timeout(Duration::from_secs(5), handle.wait_idle())
        .await
        .expect("distinct keys were serialized");
    scheduler.shutdown().await;
}

#[tokio::test]
async fn waiting_lane_does_not_block_other_work() {
    // One worker busy with a slow keyed job; a second same-key job parks in
    // the lane, leaving the other worker free for unrelated jobs.
    let scheduler = Scheduler::start(2).expect("start");
    let handle = scheduler.handle();
    let release = Arc::new(tokio::sync::Notify::new());
    let unrelated_done = Arc::new(tokio::sync::Notify::new());

    for i in 0..2 {
        let release = release.clone();
        handle
            .schedule(
                Job::new(format!("slow #{i}"), async move {
                    if i == 0 {
                        release.notified().await;
                    }
                    Ok(())
                })
                .keyed("service/slow"),
            )
            .expect("schedule");
    }
    let done = unrelated_done.clone();
    handle
        .schedule(Job::new("unrelated", async move {
            done.notify_one();
            Ok(())
        }))
        .expect("schedule");

    tokio::time::timeout(Duration::from_secs(5), unrelated_done.notified())
        .await
        .expect("unrelated job ran while lane was busy");
    release.notify_one();
    handle.wait_idle().await;
    scheduler.shutdown().await;
}

#[tokio::test]
async fn shutdown_drops_lane_backlog_and_releases_idle_waiters() {
    let scheduler = Scheduler::start(2).expect("start");
    let handle = scheduler.handle();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let backlog_ran = Arc::new(AtomicUsize::new(0));
    let parked = Arc::new(tokio::sync::Notify::new());

    handle
        .schedule(
            Job::new("hold", async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            })
            .keyed("service/svc-a"),
        )
        .expect("schedule");
    started_rx.await.expect("hold started");

    let ran = backlog_ran.clone();
    handle
        .schedule(
            Job::new("backlog", async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .keyed("service/svc-a"),
        )
        .expect("schedule");
    // The free worker takes jobs in order, so once this runs the backlog job
    // is parked in the lane.
    let marker = parked.clone();
    handle
        .schedule(Job::new("marker", async move {
            marker.notify_one();
            Ok(())
        }))
        .expect("schedule");
    tokio::time::timeout(Duration::from_secs(5), parked.notified())
        .await
        .expect("backlog parked");

    tokio::join!(scheduler.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = release_tx.send(());
    });

    tokio::time::timeout(Duration::from_secs(5), handle.wait_idle())
        .await
        .expect("idle after shutdown");
    assert_eq!(handle.pending(), 0);
    assert_eq!(backlog_ran.load(Ordering::SeqCst), 0);
}
