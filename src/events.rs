//! Keyspace event demux (C2): classifies keyspace notifications and fans
//! them out to every locally live [`crate::coordinator::Coordinator`].

use fred::interfaces::PubsubInterface;
use fred::prelude::*;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::keys::{Keys, QueueKind};

/// List-mutation commands that should trigger a reassessment when they
/// touch one of this queue's list keys.
const LIST_MUTATION_EVENTS: &[&str] = &["rpop", "lrem", "lpush", "rpush", "brpoplpush"];

/// A classified keyspace event, broadcast to every subscribed Coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeEvent {
    LockExpired { queue: QueueKind, job_id: String },
    QueueChanged { queue: QueueKind },
}

/// Classifies a raw `(channel, event)` keyspace notification, per §4.2.
/// Returns `None` for anything outside this queue's namespace or commands
/// this protocol doesn't care about.
pub fn classify(keys: &Keys, channel: &str, event: &str) -> Option<WakeEvent> {
    if event == "expired" {
        if let Some((queue, job_id)) = keys.classify_lock_key(strip_keyspace_prefix(channel)) {
            return Some(WakeEvent::LockExpired { queue, job_id });
        }
        return None;
    }
    if LIST_MUTATION_EVENTS.contains(&event) {
        if let Some(queue) = keys.classify_list_key(strip_keyspace_prefix(channel)) {
            return Some(WakeEvent::QueueChanged { queue });
        }
    }
    None
}

/// `__keyspace@{db}__:` channels carry the bare key name after that prefix;
/// anything not shaped like a keyspace-notification channel is passed
/// through unchanged (and will simply fail to classify against our keys).
fn strip_keyspace_prefix(channel: &str) -> &str {
    match channel.split_once("__:") {
        Some((head, rest)) if head.starts_with("__keyspace@") => rest,
        _ => channel,
    }
}

/// Owns the subscriber connection for one queue's keyspace-notification
/// channel and fans classified events out to every live Coordinator over a
/// broadcast channel. Coordinators unsubscribe implicitly by dropping their
/// receiver, so no explicit registry of listeners is needed here.
pub struct EventDemux {
    sender: broadcast::Sender<WakeEvent>,
    task: JoinHandle<()>,
}

impl EventDemux {
    /// Subscribes `subscriber` to `keys.keyspace_pattern()` and spawns the
    /// dispatch task. `capacity` bounds the broadcast channel's backlog per
    /// lagging receiver (a Coordinator that falls behind sees `Lagged` and
    /// simply reassesses from scratch on its next `wait` tick, so dropped
    /// events are never a correctness issue, only a latency one).
    pub async fn spawn(
        subscriber: RedisClient,
        keys: Keys,
        capacity: usize,
    ) -> Result<Self, fred::error::Error> {
        subscriber.psubscribe(keys.keyspace_pattern()).await?;
        let (sender, _) = broadcast::channel(capacity);
        let dispatch_sender = sender.clone();

        let mut messages = subscriber.message_rx();
        let task = tokio::spawn(async move {
            loop {
                let message = match messages.recv().await {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(event) = message.value.as_str().map(|s| s.to_string()) else {
                    continue;
                };
                match classify(&keys, &message.channel, &event) {
                    Some(wake) => {
                        // No receivers yet (or all have completed) is normal,
                        // not an error: a send can race a Coordinator's own
                        // shutdown.
                        let _ = dispatch_sender.send(wake);
                    }
                    None => trace!(channel = %message.channel, event = %event, "ignored keyspace event"),
                }
            }
        });

        Ok(EventDemux { sender, task })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WakeEvent> {
        self.sender.subscribe()
    }

    /// Stops the dispatch task. Safe to call during [`crate::Queue::shutdown`]
    /// after the subscriber client itself has been told to quit.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for EventDemux {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            warn!("event demux dropped without an explicit shutdown");
        }
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;

    fn keys() -> Keys {
        Keys::new("oraq", "queue", 0)
    }

    #[test]
    fn classifies_lock_expiry() {
        let event = classify(&keys(), "__keyspace@0__:oraq:queue:processing:abc:lock", "expired");
        assert_eq!(
            event,
            Some(WakeEvent::LockExpired {
                queue: QueueKind::Processing,
                job_id: "abc".to_string()
            })
        );
    }

    #[test]
    fn classifies_list_mutation() {
        for op in LIST_MUTATION_EVENTS {
            let event = classify(&keys(), "__keyspace@0__:oraq:queue:pending", op);
            assert_eq!(event, Some(WakeEvent::QueueChanged { queue: QueueKind::Pending }));
        }
    }

    #[test]
    fn ignores_unrelated_events() {
        assert_eq!(classify(&keys(), "__keyspace@0__:oraq:queue:pending", "get"), None);
        assert_eq!(classify(&keys(), "__keyspace@0__:other:queue:pending", "lpush"), None);
        assert_eq!(
            classify(&keys(), "__keyspace@0__:oraq:queue:pending:abc:lock", "set"),
            None
        );
    }

    #[test]
    fn ignores_expiry_of_unrelated_keys() {
        assert_eq!(
            classify(&keys(), "__keyspace@0__:oraq:other-queue:pending:abc:lock", "expired"),
            None
        );
    }
}
