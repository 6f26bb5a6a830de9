//! Typed configuration surface for a [`crate::Queue`].

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// The default key-namespace prefix, preserved for interop with other
/// language implementations of this protocol.
pub const DEFAULT_PREFIX: &str = "oraq";

const DEFAULT_ID: &str = "queue";
const DEFAULT_CONCURRENCY: u32 = 1;
const DEFAULT_PING: Duration = Duration::from_millis(60_000);
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7_200_000);

fn default_id() -> String {
    DEFAULT_ID.to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_concurrency() -> u32 {
    DEFAULT_CONCURRENCY
}

fn default_ping() -> Duration {
    DEFAULT_PING
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Connection parameters for the backing store.
///
/// Either a bare URL (`redis://host:port`) or a fully assembled `fred`
/// config; the former is what most callers want, the latter lets a host
/// program reuse a cluster/sentinel topology it already built.
#[derive(Debug, Clone)]
pub enum Connection {
    Url(String),
    Config(Box<fred::prelude::RedisConfig>),
}

impl Connection {
    pub(crate) fn into_fred_config(self) -> Result<fred::prelude::RedisConfig, ConfigError> {
        match self {
            Connection::Url(url) => fred::prelude::RedisConfig::from_url(&url)
                .map_err(|_| ConfigError::MissingConnection),
            Connection::Config(cfg) => Ok(*cfg),
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::Url("redis://127.0.0.1:6379".to_string())
    }
}

/// Construction options for a [`crate::Queue`]. Mirrors the options table
/// of the admission-control specification; every field has a documented
/// default so `QueueConfig::default()` is always a valid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Shared queue identity (with `prefix`). Default: `"queue"`.
    #[serde(default = "default_id")]
    pub id: String,

    /// Key namespace prefix. Default: `"oraq"`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Store connection parameters. Not deserializable from plain config
    /// files (it may embed a live `fred` config); host programs that need
    /// `serde`-driven config typically only deserialize a URL and build
    /// this field themselves with [`Connection::Url`].
    #[serde(skip, default)]
    pub connection: Connection,

    /// Target max concurrent jobs across all workers sharing this queue.
    /// `0` is accepted as a deliberately degenerate/adversarial mode (see
    /// the timeout-escape design note); only negative values are rejected.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Keep-alive refresh period and reassessment period.
    #[serde(default = "default_ping", with = "humantime_serde")]
    pub ping: Duration,

    /// Soft wait deadline; also derives lock TTLs.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Redis database index the keyspace-notification channel is scoped
    /// to. Default: `0`.
    #[serde(default)]
    pub db: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            prefix: default_prefix(),
            connection: Connection::default(),
            concurrency: default_concurrency(),
            ping: default_ping(),
            timeout: default_timeout(),
            db: 0,
        }
    }
}

impl QueueConfig {
    /// Validates field invariants that the type system alone can't express
    /// (non-empty id/prefix, non-zero ping/timeout).
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::JobIdEmpty);
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::PrefixEmpty);
        }
        if self.ping.is_zero() {
            return Err(ConfigError::InvalidPing);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }

    /// Pending-lock TTL, in whole seconds: `ceil(timeout * 1.5 / 1000)`.
    pub(crate) fn pending_lock_ttl_secs(&self) -> u64 {
        ceil_ms_to_secs(self.timeout.as_millis() as u64 * 3 / 2)
    }

    /// Processing-lock TTL, in whole seconds, for a keep-alive refresh:
    /// `ceil(ping * 2 / 1000)`.
    pub(crate) fn processing_lock_ttl_secs(&self) -> u64 {
        ceil_ms_to_secs(self.ping.as_millis() as u64 * 2)
    }
}

fn ceil_ms_to_secs(ms: u64) -> u64 {
    ms.div_ceil(1000).max(1)
}

/// Per-submit options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller-supplied job id; a random 128-bit hex id is generated when absent.
    pub job_id: Option<String>,
    /// Use LIFO (`rpush`) insertion instead of the default FIFO (`lpush`).
    pub lifo: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.id, "queue");
        assert_eq!(cfg.prefix, "oraq");
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.ping, Duration::from_secs(60));
        assert_eq!(cfg.timeout, Duration::from_secs(7200));
    }

    #[test]
    fn zero_concurrency_is_valid() {
        let mut cfg = QueueConfig::default();
        cfg.concurrency = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let mut cfg = QueueConfig::default();
        cfg.prefix.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::PrefixEmpty)));
    }

    #[test]
    fn lock_ttls_round_up() {
        let mut cfg = QueueConfig::default();
        cfg.timeout = Duration::from_millis(2000);
        cfg.ping = Duration::from_millis(500);
        assert_eq!(cfg.pending_lock_ttl_secs(), 3);
        assert_eq!(cfg.processing_lock_ttl_secs(), 1);
    }
}
