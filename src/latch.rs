//! The `canRun` single-shot broadcast latch.
//!
//! Modeled as a `tokio::sync::watch<bool>` pair rather than a oneshot:
//! a oneshot's `Sender::send` is a one-time, consuming call, which fights
//! the protocol's "multiple `set()`s are benign" requirement and its need
//! for cloneable waiters. `watch` gives idempotent release and lets late
//! subscribers observe an already-released latch immediately.

use tokio::sync::watch;

/// The writable half, owned by the [`crate::coordinator::Coordinator`].
#[derive(Debug, Clone)]
pub struct LatchSet(watch::Sender<bool>);

/// A waitable handle, clonable so multiple callers can await release.
#[derive(Debug, Clone)]
pub struct LatchWait(watch::Receiver<bool>);

/// Builds a fresh, unreleased latch pair.
pub fn latch() -> (LatchSet, LatchWait) {
    let (tx, rx) = watch::channel(false);
    (LatchSet(tx), LatchWait(rx))
}

impl LatchSet {
    /// Releases the latch. Idempotent: calling this more than once, from
    /// any number of concurrent assessments, has the same effect as once.
    pub fn release(&self) {
        // A closed receiver side (all waiters dropped) is not an error here;
        // the coordinator that owned them has already moved on.
        let _ = self.0.send(true);
    }

    pub fn is_released(&self) -> bool {
        *self.0.borrow()
    }
}

impl LatchWait {
    /// Blocks until the latch is released. Returns immediately if it was
    /// already released before this call, including for a receiver created
    /// after the release.
    pub async fn released(&mut self) {
        if *self.0.borrow() {
            return;
        }
        // `changed()` only errors if every sender was dropped without ever
        // releasing, which would be a coordinator bug (the sender outlives
        // every waiter by construction); a release is the only exit we
        // expect in practice.
        let _ = self.0.wait_for(|released| *released).await;
    }

    pub fn is_released(&self) -> bool {
        *self.0.borrow()
    }
}
