//! Queue façade (C4): owns the store/subscriber connections, drives a job
//! through its full lifecycle, and exposes the public `submit` API.

use std::future::Future;
use std::sync::Arc;

use fred::prelude::*;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{QueueConfig, SubmitOptions};
use crate::coordinator::{spawn_wake_listener, Coordinator};
use crate::error::{InitError, JobError, StoreError};
use crate::events::EventDemux;
use crate::keys::{generate_job_id, Keys, QueueKind};
use crate::store::{FredStore, Store};

/// A shared admission-control queue, linked into a worker process. Every
/// `Queue` constructed with the same `(prefix, id)` against the same
/// backing store joins the same logical queue, even across processes and
/// hosts.
pub struct Queue {
    config: QueueConfig,
    keys: Keys,
    store: Arc<dyn Store>,
    command_client: RedisClient,
    subscriber_client: RedisClient,
    command_connection: JoinHandle<Result<(), fred::error::Error>>,
    subscriber_connection: JoinHandle<Result<(), fred::error::Error>>,
    demux: OnceCell<EventDemux>,
}

impl Queue {
    /// Connects both the command and subscriber clients and issues the
    /// one-time `CONFIG SET notify-keyspace-events` call. The keyspace
    /// subscription itself is deferred to the first `submit` (§4.4 step 1).
    pub async fn new(config: QueueConfig) -> Result<Self, InitError> {
        config.validate()?;
        let fred_config = config.connection.clone().into_fred_config()?;

        let command_client = RedisClient::new(fred_config.clone(), None, None, None);
        let command_connection = command_client.connect();
        command_client
            .wait_for_connect()
            .await
            .map_err(|e| StoreError::new("connect/command", e))?;

        let subscriber_client = RedisClient::new(fred_config, None, None, None);
        let subscriber_connection = subscriber_client.connect();
        subscriber_client
            .wait_for_connect()
            .await
            .map_err(|e| StoreError::new("connect/subscriber", e))?;

        let store: Arc<dyn Store> = Arc::new(FredStore::new(command_client.clone()));
        store.configure_keyspace_notifications().await?;

        let keys = Keys::new(&config.prefix, &config.id, config.db);

        Ok(Queue {
            config,
            keys,
            store,
            command_client,
            subscriber_client,
            command_connection,
            subscriber_connection,
            demux: OnceCell::new(),
        })
    }

    async fn ensure_demux(&self) -> Result<&EventDemux, StoreError> {
        self.demux
            .get_or_try_init(|| async {
                EventDemux::spawn(self.subscriber_client.clone(), self.keys.clone(), 1024)
                    .await
                    .map_err(|e| StoreError::new("psubscribe", e))
            })
            .await
    }

    /// Runs the full admission-control lifecycle for one job (§4.4):
    /// enqueue, await admission, transition to processing, execute `job`,
    /// clean up. `job`'s own captured state stands in for the wire
    /// protocol's `jobData` — idiomatic Rust threads state through closures
    /// rather than a boxed `Any` parameter.
    pub async fn submit<F, Fut, T, E>(&self, opts: SubmitOptions, job: F) -> Result<T, JobError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let demux = self.ensure_demux().await?;
        let job_id = opts
            .job_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_job_id);

        let pending_key = self.keys.list(QueueKind::Pending).to_string();
        let processing_key = self.keys.list(QueueKind::Processing).to_string();
        let pending_lock_key = self.keys.lock(QueueKind::Pending, &job_id);
        let processing_lock_key = self.keys.lock(QueueKind::Processing, &job_id);

        self.store
            .enqueue(
                &pending_key,
                &pending_lock_key,
                self.config.pending_lock_ttl_secs(),
                &job_id,
                opts.lifo,
            )
            .await?;

        let coordinator = Coordinator::new(
            job_id.clone(),
            Arc::clone(&self.store),
            self.keys.clone(),
            self.config.concurrency,
            self.config.timeout,
            self.config.processing_lock_ttl_secs(),
        );

        let wake_listener = spawn_wake_listener(
            coordinator.clone(),
            Arc::clone(&self.store),
            self.keys.clone(),
            demux.subscribe(),
            self.config.ping,
        );

        let mut guard = SubmitGuard {
            store: Arc::clone(&self.store),
            pending_key: pending_key.clone(),
            pending_lock_key: pending_lock_key.clone(),
            processing_key: processing_key.clone(),
            processing_lock_key: processing_lock_key.clone(),
            job_id: job_id.clone(),
            coordinator: coordinator.clone(),
            wake_listener: Some(wake_listener),
            transitioned: false,
            completed: false,
        };

        coordinator.wait(self.config.ping).await;
        coordinator.can_run().released().await;

        coordinator.stop_wait();
        if let Some(handle) = guard.wake_listener.take() {
            handle.abort();
        }

        coordinator.keep_alive(self.config.ping);

        self.transition(&pending_key, &processing_key, &pending_lock_key, &job_id)
            .await?;
        guard.transitioned = true;
        info!(%job_id, "admitted");

        let outcome = job().await;

        coordinator.stop_keep_alive();
        if let Err(error) = self
            .store
            .release(&processing_key, &processing_lock_key, &job_id)
            .await
        {
            warn!(%job_id, %error, "processing cleanup failed");
        }
        guard.completed = true;
        info!(%job_id, "completed");

        outcome.map_err(JobError::UserJob)
    }

    /// The admission transition (§4.4 step 8), resolving Open Question O1:
    /// `brpoplpush` is unconditional, so the popped id is checked against
    /// the id we expect; a mismatch means a peer raced us onto the tail,
    /// and we restore their id before retrying our own claim.
    async fn transition(
        &self,
        pending_key: &str,
        processing_key: &str,
        pending_lock_key: &str,
        job_id: &str,
    ) -> Result<(), StoreError> {
        loop {
            let moved = self.store.brpoplpush_forever(pending_key, processing_key).await?;
            if moved == job_id {
                break;
            }
            warn!(expected = %job_id, got = %moved, "brpoplpush raced with a peer; retrying");
            self.store.lrem(processing_key, 1, &moved).await?;
            self.store.rpush(pending_key, &moved).await?;
        }
        self.store.del(pending_lock_key).await
    }

    /// Removes a still-pending job. Does not touch a job that has already
    /// transitioned to processing (§4.4). Idempotent (P7): a second call
    /// for the same id is a no-op.
    pub async fn remove_by_id(&self, job_id: &str) -> Result<(), StoreError> {
        let pending_key = self.keys.list(QueueKind::Pending);
        let pending_lock_key = self.keys.lock(QueueKind::Pending, job_id);
        self.store.release(pending_key, &pending_lock_key, job_id).await
    }

    /// Quits the subscriber connection, then the command connection.
    /// In-flight `submit` calls are abandoned; callers should await
    /// outstanding submits first.
    pub async fn shutdown(self) -> Result<(), StoreError> {
        if let Some(demux) = self.demux.get() {
            demux.stop();
        }
        self.subscriber_client
            .quit()
            .await
            .map_err(|e| StoreError::new("shutdown/subscriber_quit", e))?;
        self.command_client
            .quit()
            .await
            .map_err(|e| StoreError::new("shutdown/command_quit", e))?;
        let _ = self.subscriber_connection.await;
        let _ = self.command_connection.await;
        Ok(())
    }
}

/// RAII cleanup for one `submit` call. Guarantees timers and the wake-up
/// listener are torn down on every exit path, including a cancelled
/// `submit` future (dropped before completion) or a panic unwinding
/// through it. The synchronous parts (timer/task aborts) run inline;
/// the store-side release, which needs `.await`, is spawned as a detached
/// best-effort task since `Drop` cannot itself be async. The normal
/// completion path performs that same release synchronously and marks
/// `completed` so `Drop` does not redundantly repeat it.
struct SubmitGuard {
    store: Arc<dyn Store>,
    pending_key: String,
    pending_lock_key: String,
    processing_key: String,
    processing_lock_key: String,
    job_id: String,
    coordinator: Coordinator,
    wake_listener: Option<JoinHandle<()>>,
    transitioned: bool,
    completed: bool,
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.coordinator.stop_wait();
        self.coordinator.stop_keep_alive();
        if let Some(handle) = self.wake_listener.take() {
            handle.abort();
        }
        if self.completed {
            return;
        }

        let store = Arc::clone(&self.store);
        let job_id = self.job_id.clone();
        let (queue_key, lock_key) = if self.transitioned {
            (self.processing_key.clone(), self.processing_lock_key.clone())
        } else {
            (self.pending_key.clone(), self.pending_lock_key.clone())
        };
        tokio::spawn(async move {
            if let Err(error) = store.release(&queue_key, &lock_key, &job_id).await {
                warn!(%job_id, %error, "best-effort cleanup after cancellation failed");
            }
        });
    }
}
