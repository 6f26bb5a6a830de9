//! Store adapter (C1): a thin, well-typed façade over the backing store.
//!
//! Rather than a generic `multi(ops) -> results[]`, the atomic multi-ops the
//! protocol actually needs are exposed as dedicated methods, each backed by
//! one `fred` `MULTI`/`EXEC` transaction. This keeps every call site
//! statically typed and makes the trait mockable with `mockall` for unit
//! tests of the admission logic that never touch a live store.

use async_trait::async_trait;
use fred::interfaces::{ConfigInterface, KeysInterface, ListInterface, TransactionInterface};
use fred::prelude::*;

use crate::error::StoreError;

/// An atomic snapshot of `(len(processing), tail-of-pending)`, read together
/// so the admission decision in [`crate::coordinator::Coordinator`] never
/// sees a torn view of the two lists (§4.3 steps 4-5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub processing_len: i64,
    pub pending_tail: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// `lpush key value` (FIFO insertion point).
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// `rpush key value` (LIFO insertion point).
    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// `lrem key count value`, returning the number of removed elements.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64, StoreError>;

    /// `lrange key 0 -1`.
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// `exists key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// `setex key ttl_secs value`.
    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), StoreError>;

    /// `del key`.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Enqueues atomically: sets the pending-lock with TTL, then inserts
    /// `job_id` into `pending_key` (head for FIFO, tail for LIFO). Lock-set
    /// precedes queue-insert within the same transaction, per §4.3.1's
    /// requirement to minimize the sweep's false-positive window.
    async fn enqueue(
        &self,
        pending_key: &str,
        lock_key: &str,
        lock_ttl_secs: u64,
        job_id: &str,
        lifo: bool,
    ) -> Result<(), StoreError>;

    /// Atomically reads `(llen(processing_key), lindex(pending_key, -1))`.
    async fn admission_snapshot(
        &self,
        processing_key: &str,
        pending_key: &str,
    ) -> Result<AdmissionSnapshot, StoreError>;

    /// `brpoplpush pending_key processing_key 0` (block forever), returning
    /// the id that was moved. The caller is responsible for verifying this
    /// equals the expected job id (Open Question O1).
    async fn brpoplpush_forever(
        &self,
        pending_key: &str,
        processing_key: &str,
    ) -> Result<String, StoreError>;

    /// Sweeps `ids` from `queue_key` in one transaction (one `lrem` per id),
    /// used both by the stuck-job sweep and the O1 "wrong id popped" retry.
    async fn lrem_many(&self, queue_key: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Atomically deletes `lock_key` and removes one occurrence of `job_id`
    /// from `queue_key` (used for both the admission transition's pending
    /// cleanup and the completion cleanup's processing cleanup).
    async fn release(&self, queue_key: &str, lock_key: &str, job_id: &str) -> Result<(), StoreError>;

    /// Issues the one-time `CONFIG SET notify-keyspace-events Kgxl`.
    async fn configure_keyspace_notifications(&self) -> Result<(), StoreError>;
}

/// A [`Store`] implementation backed by a live `fred` Redis client.
pub struct FredStore {
    client: RedisClient,
}

impl FredStore {
    pub fn new(client: RedisClient) -> Self {
        FredStore { client }
    }
}

#[async_trait]
impl Store for FredStore {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .client
            .lpush(key, value)
            .await
            .map_err(|e| StoreError::new("lpush", e))?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .client
            .rpush(key, value)
            .await
            .map_err(|e| StoreError::new("rpush", e))?;
        Ok(())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<i64, StoreError> {
        self.client
            .lrem(key, count, value)
            .await
            .map_err(|e| StoreError::new("lrem", e))
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.client
            .lrange(key, 0, -1)
            .await
            .map_err(|e| StoreError::new("lrange", e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let n: i64 = self
            .client
            .exists(key)
            .await
            .map_err(|e| StoreError::new("exists", e))?;
        Ok(n > 0)
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), StoreError> {
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(ttl_secs as i64)), None, false)
            .await
            .map_err(|e| StoreError::new("setex", e))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let _: i64 = self
            .client
            .del(key)
            .await
            .map_err(|e| StoreError::new("del", e))?;
        Ok(())
    }

    async fn enqueue(
        &self,
        pending_key: &str,
        lock_key: &str,
        lock_ttl_secs: u64,
        job_id: &str,
        lifo: bool,
    ) -> Result<(), StoreError> {
        let trx = self.client.multi();
        let _: () = trx
            .set(lock_key, "", Some(Expiration::EX(lock_ttl_secs as i64)), None, false)
            .await
            .map_err(|e| StoreError::new("enqueue/setex", e))?;
        if lifo {
            let _: () = trx
                .rpush(pending_key, job_id)
                .await
                .map_err(|e| StoreError::new("enqueue/rpush", e))?;
        } else {
            let _: () = trx
                .lpush(pending_key, job_id)
                .await
                .map_err(|e| StoreError::new("enqueue/lpush", e))?;
        }
        let _: Vec<Value> = trx
            .exec(true)
            .await
            .map_err(|e| StoreError::new("enqueue/exec", e))?;
        Ok(())
    }

    async fn admission_snapshot(
        &self,
        processing_key: &str,
        pending_key: &str,
    ) -> Result<AdmissionSnapshot, StoreError> {
        let trx = self.client.multi();
        let _: () = trx
            .llen(processing_key)
            .await
            .map_err(|e| StoreError::new("snapshot/llen", e))?;
        let _: () = trx
            .lindex(pending_key, -1)
            .await
            .map_err(|e| StoreError::new("snapshot/lindex", e))?;
        let (processing_len, tail): (i64, Value) = trx
            .exec(true)
            .await
            .map_err(|e| StoreError::new("snapshot/exec", e))?;
        let pending_tail = if tail.is_null() {
            None
        } else {
            tail.as_str().map(|s| s.to_string())
        };
        Ok(AdmissionSnapshot {
            processing_len,
            pending_tail,
        })
    }

    async fn brpoplpush_forever(
        &self,
        pending_key: &str,
        processing_key: &str,
    ) -> Result<String, StoreError> {
        self.client
            .brpoplpush(pending_key, processing_key, 0.0)
            .await
            .map_err(|e| StoreError::new("brpoplpush", e))
    }

    async fn lrem_many(&self, queue_key: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let trx = self.client.multi();
        for id in ids {
            let _: () = trx
                .lrem(queue_key, 0, id.as_str())
                .await
                .map_err(|e| StoreError::new("sweep/lrem", e))?;
        }
        let _: Vec<Value> = trx
            .exec(true)
            .await
            .map_err(|e| StoreError::new("sweep/exec", e))?;
        Ok(())
    }

    async fn release(&self, queue_key: &str, lock_key: &str, job_id: &str) -> Result<(), StoreError> {
        let trx = self.client.multi();
        let _: () = trx
            .lrem(queue_key, 1, job_id)
            .await
            .map_err(|e| StoreError::new("release/lrem", e))?;
        let _: () = trx
            .del(lock_key)
            .await
            .map_err(|e| StoreError::new("release/del", e))?;
        let _: Vec<Value> = trx
            .exec(true)
            .await
            .map_err(|e| StoreError::new("release/exec", e))?;
        Ok(())
    }

    async fn configure_keyspace_notifications(&self) -> Result<(), StoreError> {
        let _: () = self
            .client
            .config_set("notify-keyspace-events", "Kgxl")
            .await
            .map_err(|e| StoreError::new("config_set", e))?;
        Ok(())
    }
}
