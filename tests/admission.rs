//! Live-store integration tests for the admission-control protocol (§8
//! concrete scenarios). Gated the same way the teacher gates its own Redis
//! integration tests: these need a real Redis/Valkey reachable at
//! `redis://127.0.0.1:6379` with `CONFIG SET` permitted, which is not
//! available in every CI environment.

#![cfg(all(target_os = "linux", target_arch = "x86_64", test))]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use oraq::{Queue, QueueConfig, SubmitOptions};

fn unique_id(label: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("oraq-test-{label}-{nanos}")
}

async fn new_queue(id: &str, concurrency: u32, timeout: Duration) -> Queue {
    let config = QueueConfig {
        id: id.to_string(),
        concurrency,
        ping: Duration::from_millis(100),
        timeout,
        ..QueueConfig::default()
    };
    Queue::new(config).await.expect("queue construction")
}

#[tokio::test(flavor = "multi_thread")]
async fn serial_fifo_runs_jobs_in_submission_order() {
    let id = unique_id("serial-fifo");
    let queue = Arc::new(new_queue(&id, 1, Duration::from_secs(30)).await);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..4u32 {
        let queue = Arc::clone(&queue);
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            queue
                .submit(SubmitOptions::default(), || async move {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    order.lock().unwrap().push(i);
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
                .unwrap();
        }));
        // stagger submission so enqueue order is deterministic
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_millis(4000));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_two_overlaps_pairs_of_jobs() {
    let id = unique_id("concurrency-two");
    let queue = Arc::new(new_queue(&id, 2, Duration::from_secs(30)).await);

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4u32 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue
                .submit(SubmitOptions::default(), || async move {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2000));
    assert!(elapsed < Duration::from_millis(3000));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_share_one_queue() {
    let id = unique_id("two-workers");
    let worker_a = Arc::new(new_queue(&id, 1, Duration::from_secs(30)).await);
    let worker_b = Arc::new(new_queue(&id, 1, Duration::from_secs(30)).await);

    let start = Instant::now();
    let mut handles = Vec::new();
    for worker in [worker_a, worker_b] {
        for _ in 0..2u32 {
            let worker = Arc::clone(&worker);
            handles.push(tokio::spawn(async move {
                worker
                    .submit(SubmitOptions::default(), || async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Ok::<_, std::convert::Infallible>(())
                    })
                    .await
                    .unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_death_is_reclaimed_by_waiting_worker() {
    let id = unique_id("crash-reclaim");
    let ping = Duration::from_millis(500);

    let worker_a = new_queue(&id, 1, Duration::from_secs(30)).await;
    let admitted = Arc::new(AtomicU32::new(0));
    let admitted_a = Arc::clone(&admitted);

    let handle_a = tokio::spawn(async move {
        let _ = worker_a
            .submit(
                SubmitOptions {
                    job_id: Some("crash-victim".to_string()),
                    ..Default::default()
                },
                || async move {
                    admitted_a.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10_000)).await;
                    Ok::<_, std::convert::Infallible>(())
                },
            )
            .await;
        // worker_a is dropped here without shutdown(), simulating a crash:
        // its processing-lock keep-alive stops refreshing and expires.
    });

    // Wait until worker A is admitted, then kill it.
    while admitted.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle_a.abort();

    let worker_b = new_queue(&id, 1, Duration::from_secs(30)).await;
    let admitted_b = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let admitted_b2 = Arc::clone(&admitted_b);
    let start = Instant::now();
    let handle_b = tokio::spawn(async move {
        worker_b
            .submit(SubmitOptions::default(), || async move {
                admitted_b2.store(true, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(())
            })
            .await
            .unwrap();
    });
    handle_b.await.unwrap();

    assert!(admitted_b.load(Ordering::SeqCst));
    assert!(start.elapsed() < Duration::from_millis(ping.as_millis() as u64 * 3));
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_escape_admits_under_zero_concurrency() {
    let id = unique_id("timeout-escape");
    let queue = new_queue(&id, 0, Duration::from_millis(2000)).await;

    let start = Instant::now();
    queue
        .submit(SubmitOptions::default(), || async move { Ok::<_, std::convert::Infallible>(()) })
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(2500));
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_by_id_cleans_up_a_still_pending_job() {
    use fred::prelude::*;

    let id = unique_id("remove-by-id");
    let queue = Arc::new(new_queue(&id, 1, Duration::from_secs(60)).await);

    let blocker = Arc::clone(&queue);
    let blocker_handle = tokio::spawn(async move {
        blocker
            .submit(SubmitOptions::default(), || async move {
                tokio::time::sleep(Duration::from_millis(10_000)).await;
                Ok::<_, std::convert::Infallible>(())
            })
            .await
            .unwrap();
    });

    // give the blocker time to be admitted and occupy the one slot
    tokio::time::sleep(Duration::from_millis(200)).await;

    let remover = Arc::clone(&queue);
    let submit_handle = tokio::spawn(async move {
        remover
            .submit(
                SubmitOptions {
                    job_id: Some("removable".to_string()),
                    ..Default::default()
                },
                || async move { Ok::<_, std::convert::Infallible>(()) },
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.remove_by_id("removable").await.unwrap();
    // removing it twice must be a no-op
    queue.remove_by_id("removable").await.unwrap();

    // Scenario 6 / P2 / P3: confirm directly against the store that the
    // removed job is gone from the pending list and its lock is gone, not
    // just that `remove_by_id` returned `Ok`. Check this independently of
    // whether `submit_handle` ever resolves: with concurrency=1 already
    // held by the blocker, the removed job can never become tail again, so
    // `submit_handle` would otherwise only resolve via the 60s timeout
    // escape, turning this into a 60s-long test that never asserted the
    // thing scenario 6 is about.
    let config = RedisConfig::from_url("redis://127.0.0.1:6379").expect("redis url");
    let raw = RedisClient::new(config, None, None, None);
    let _raw_connection = raw.connect();
    raw.wait_for_connect().await.expect("raw client connect");

    let pending_key = format!("oraq:{id}:pending");
    let lock_key = format!("{pending_key}:removable:lock");

    let pending_ids: Vec<String> = raw.lrange(&pending_key, 0, -1).await.expect("lrange pending");
    assert!(
        !pending_ids.contains(&"removable".to_string()),
        "removed job id must be absent from pending, got {pending_ids:?}"
    );
    let lock_exists: i64 = raw.exists(&lock_key).await.expect("exists lock");
    assert_eq!(lock_exists, 0, "removed job's pending-lock must be gone");

    raw.quit().await.ok();
    blocker_handle.abort();
    submit_handle.abort();
}
