//! Coordinator (C3): runs the admission protocol for one in-flight job.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::events::WakeEvent;
use crate::keys::{Keys, QueueKind};
use crate::latch::{latch, LatchSet, LatchWait};
use crate::store::Store;

struct Inner {
    job_id: String,
    store: Arc<dyn Store>,
    keys: Keys,
    concurrency: u32,
    timeout: Duration,
    processing_lock_ttl_secs: u64,
    start_time: Mutex<Option<Instant>>,
    latch_set: LatchSet,
    latch_wait: LatchWait,
    wait_task: Mutex<Option<JoinHandle<()>>>,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Guaranteed release on every exit path, including a cancelled
        // `submit` future: this fires once the last `Coordinator` clone
        // (and therefore the last reference to this `Inner`) goes away.
        if let Some(handle) = self.wait_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.keep_alive_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// A handle to one job's admission state. Cheaply cloneable (it's an `Arc`
/// around shared state); every clone sees the same latch, and the timer
/// tasks are torn down exactly once, when the last clone is dropped.
#[derive(Clone)]
pub struct Coordinator(Arc<Inner>);

impl Coordinator {
    pub fn new(
        job_id: String,
        store: Arc<dyn Store>,
        keys: Keys,
        concurrency: u32,
        timeout: Duration,
        processing_lock_ttl_secs: u64,
    ) -> Self {
        let (latch_set, latch_wait) = latch();
        Coordinator(Arc::new(Inner {
            job_id,
            store,
            keys,
            concurrency,
            timeout,
            processing_lock_ttl_secs,
            start_time: Mutex::new(None),
            latch_set,
            latch_wait,
            wait_task: Mutex::new(None),
            keep_alive_task: Mutex::new(None),
        }))
    }

    pub fn job_id(&self) -> &str {
        &self.0.job_id
    }

    /// A waitable handle to the `canRun` latch. Clonable; every waiter
    /// observes release, including one created after release already fired.
    pub fn can_run(&self) -> LatchWait {
        self.0.latch_wait.clone()
    }

    /// (Re)arms periodic reassessment at period `ping` and performs one
    /// assessment immediately. Modeled as a freshly spawned periodic task
    /// rather than literal timer recursion (see design notes): calling
    /// `wait` again cancels whatever periodic task is running and starts a
    /// new one, which is externally indistinguishable from re-arming.
    pub async fn wait(&self, ping: Duration) {
        self.stop_wait();
        self.assess().await;
        if self.0.latch_wait.is_released() {
            return;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping);
            interval.tick().await; // the first tick fires immediately; we just assessed.
            loop {
                interval.tick().await;
                this.assess().await;
                if this.0.latch_wait.is_released() {
                    break;
                }
            }
        });
        *self.0.wait_task.lock().unwrap() = Some(handle);
    }

    pub fn stop_wait(&self) {
        if let Some(handle) = self.0.wait_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Refreshes the processing-lock now (TTL = `2*ping`, already baked into
    /// `processing_lock_ttl_secs`), then re-arms to refresh every `ping`.
    pub fn keep_alive(&self, ping: Duration) {
        self.stop_keep_alive();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let lock_key = this.0.keys.lock(QueueKind::Processing, &this.0.job_id);
            loop {
                if let Err(error) = this
                    .0
                    .store
                    .setex(&lock_key, this.0.processing_lock_ttl_secs, "")
                    .await
                {
                    // Swallowed by design (§7): the next tick retries; if the
                    // store stays unreachable the lock simply expires and a
                    // peer's stuck-job sweep reclaims the job.
                    warn!(job_id = %this.0.job_id, %error, "processing keep-alive refresh failed");
                }
                tokio::time::sleep(ping).await;
            }
        });
        *self.0.keep_alive_task.lock().unwrap() = Some(handle);
    }

    pub fn stop_keep_alive(&self) {
        if let Some(handle) = self.0.keep_alive_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// One execution of the admission predicate (§4.3).
    async fn assess(&self) {
        let start = {
            let mut guard = self.0.start_time.lock().unwrap();
            *guard.get_or_insert_with(Instant::now)
        };

        if start.elapsed() > self.0.timeout {
            debug!(job_id = %self.0.job_id, "timeout escape: releasing canRun unconditionally");
            self.0.latch_set.release();
            return;
        }

        if let Err(error) = self.sweep(QueueKind::Pending).await {
            warn!(job_id = %self.0.job_id, %error, "stuck-job sweep of pending failed");
        }
        if let Err(error) = self.sweep(QueueKind::Processing).await {
            warn!(job_id = %self.0.job_id, %error, "stuck-job sweep of processing failed");
        }

        let processing_key = self.0.keys.list(QueueKind::Processing);
        let pending_key = self.0.keys.list(QueueKind::Pending);
        match self.0.store.admission_snapshot(processing_key, pending_key).await {
            Ok(snapshot) => {
                let is_tail = snapshot.pending_tail.as_deref() == Some(self.0.job_id.as_str());
                if snapshot.processing_len < self.0.concurrency as i64 && is_tail {
                    self.0.latch_set.release();
                }
            }
            Err(error) => {
                warn!(job_id = %self.0.job_id, %error, "admission snapshot failed");
            }
        }
    }

    /// Stuck-job sweep (§4.3.1) for one of the two queue lists.
    async fn sweep(&self, queue: QueueKind) -> Result<(), StoreError> {
        let key = self.0.keys.list(queue);
        let ids = self.0.store.lrange_all(key).await?;
        let mut stuck = Vec::new();
        for id in ids {
            let lock_key = self.0.keys.lock(queue, &id);
            if !self.0.store.exists(&lock_key).await? {
                stuck.push(id);
            }
        }
        if !stuck.is_empty() {
            for id in &stuck {
                debug!(job_id = %id, queue = ?queue, "reaping stuck job");
            }
            self.0.store.lrem_many(key, &stuck).await?;
        }
        Ok(())
    }
}

/// Wires a Coordinator to the queue-wide wake-up broadcast, per §4.5: every
/// classified event triggers a reassessment, and a lock expiry additionally
/// issues a best-effort evict. Returns a handle the caller (the `submit`
/// lifecycle in [`crate::queue`]) aborts on cleanup — the "unregister the
/// wake-up callback" step.
pub fn spawn_wake_listener(
    coordinator: Coordinator,
    store: Arc<dyn Store>,
    keys: Keys,
    mut events: broadcast::Receiver<WakeEvent>,
    ping: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if let WakeEvent::LockExpired { queue, job_id } = &event {
                let queue_key = keys.list(*queue);
                if let Err(error) = store.lrem(queue_key, 1, job_id).await {
                    debug!(%job_id, %error, "best-effort evict of expired job failed");
                }
            }

            coordinator.wait(ping).await;
        }
    })
}
