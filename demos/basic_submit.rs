//! Minimal end-to-end usage: three "workers" (tasks) sharing one queue,
//! each submitting one job, bounded to two running at a time.
//!
//! Requires a Redis/Valkey instance reachable at `redis://127.0.0.1:6379`
//! with `CONFIG SET` permitted. Run with:
//!
//! ```sh
//! cargo run --example basic_submit
//! ```

use std::sync::Arc;
use std::time::Duration;

use oraq::{Queue, QueueConfig, SubmitOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = QueueConfig {
        id: "demo".to_string(),
        concurrency: 2,
        ping: Duration::from_millis(250),
        timeout: Duration::from_secs(30),
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::new(config).await?);

    let mut handles = Vec::new();
    for worker in 0..3 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue
                .submit(SubmitOptions::default(), || async move {
                    println!("worker {worker} running");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, std::convert::Infallible>(())
                })
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.shutdown().await?,
        Err(_) => eprintln!("queue still referenced elsewhere; skipping shutdown"),
    }
    Ok(())
}
