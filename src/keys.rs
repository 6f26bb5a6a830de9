//! Key-name derivation and job-id generation (C5).

use rand::RngCore;

/// Which of the two job-id lists a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Pending,
    Processing,
}

impl QueueKind {
    fn as_str(self) -> &'static str {
        match self {
            QueueKind::Pending => "pending",
            QueueKind::Processing => "processing",
        }
    }
}

/// Derives the bit-exact key names for a `(prefix, id)` namespace, per the
/// external-interface key layout: `{prefix}:{id}:{pending,processing}` for
/// the two lists, `{listKey}:{jobId}:lock` for leases.
#[derive(Debug, Clone)]
pub struct Keys {
    pending_list: String,
    processing_list: String,
    keyspace_pattern: String,
}

impl Keys {
    pub fn new(prefix: &str, id: &str, db: u8) -> Self {
        let namespace = format!("{prefix}:{id}");
        Keys {
            pending_list: format!("{namespace}:pending"),
            processing_list: format!("{namespace}:processing"),
            keyspace_pattern: format!("__keyspace@{db}__:{namespace}:*"),
        }
    }

    pub fn list(&self, kind: QueueKind) -> &str {
        match kind {
            QueueKind::Pending => &self.pending_list,
            QueueKind::Processing => &self.processing_list,
        }
    }

    pub fn lock(&self, kind: QueueKind, job_id: &str) -> String {
        format!("{}:{job_id}:lock", self.list(kind))
    }

    pub fn keyspace_pattern(&self) -> &str {
        &self.keyspace_pattern
    }

    /// Classifies a list key (`{prefix}:{id}:pending|processing`) back into
    /// a [`QueueKind`], returning `None` for anything else (e.g. a lock key).
    pub fn classify_list_key(&self, key: &str) -> Option<QueueKind> {
        if key == self.pending_list {
            Some(QueueKind::Pending)
        } else if key == self.processing_list {
            Some(QueueKind::Processing)
        } else {
            None
        }
    }

    /// Classifies a lock key (`{prefix}:{id}:pending|processing:{jobId}:lock`)
    /// into its queue kind and job id.
    pub fn classify_lock_key(&self, key: &str) -> Option<(QueueKind, String)> {
        for kind in [QueueKind::Pending, QueueKind::Processing] {
            let list = self.list(kind);
            let prefix = format!("{list}:");
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(job_id) = rest.strip_suffix(":lock") {
                    if !job_id.is_empty() {
                        return Some((kind, job_id.to_string()));
                    }
                }
            }
        }
        None
    }
}

/// Generates a random job id: 16 random bytes (128 bits of entropy)
/// rendered as 32 lowercase hex characters.
pub fn generate_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
