//! Typed error hierarchy for the admission-control protocol.
//!
//! Three kinds, matching the three error sources the protocol distinguishes:
//! construction/validation ([`ConfigError`]), the backing store
//! ([`StoreError`]), and the user-supplied job body ([`JobError`]).

use displaydoc::Display;
use thiserror::Error;

/// Construction and `submit` precondition failures, surfaced synchronously.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// job id must not be empty
    JobIdEmpty,
    /// concurrency must be a non-negative integer, got {0}
    InvalidConcurrency(i64),
    /// timeout must be a positive duration
    InvalidTimeout,
    /// ping interval must be a positive duration
    InvalidPing,
    /// prefix must not be empty
    PrefixEmpty,
    /// no store connection configured
    MissingConnection,
}

/// A failure talking to the backing store during a critical (non-swallowed) operation.
#[derive(Debug, Display, Error)]
/// store operation `{operation}` failed
pub struct StoreError {
    pub operation: &'static str,
    #[source]
    pub source: fred::error::Error,
}

impl StoreError {
    pub fn new(operation: &'static str, source: fred::error::Error) -> Self {
        Self { operation, source }
    }
}

/// Failures constructing a [`crate::Queue`]: either a configuration
/// precondition or the initial connect/`CONFIG SET` round-trip.
#[derive(Debug, Display, Error)]
pub enum InitError {
    /// {0}
    Config(#[from] ConfigError),
    /// {0}
    Store(#[from] StoreError),
}

/// The error returned by [`crate::Queue::submit`], wrapping either a
/// store failure or the user job's own error.
#[derive(Debug, Display, Error)]
pub enum JobError<E> {
    /// admission protocol error: {0}
    Store(#[from] StoreError),
    /// job failed: {0}
    UserJob(#[source] E),
}
