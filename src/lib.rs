//! `oraq`: a distributed, Redis-backed admission-control queue.
//!
//! Bounds concurrency across many independent worker processes — possibly
//! on different hosts — by sharing state through a Redis-compatible
//! backing store. Workers that construct a [`Queue`] with the same
//! `(prefix, id)` join the same logical queue: each call to
//! [`Queue::submit`] blocks until the admission protocol grants the
//! calling job a slot, then runs the job and releases the slot on return.
//!
//! The protocol composes a two-queue (pending → processing) state machine,
//! a lease/keep-alive scheme for crash detection, a stuck-job reaper, and
//! keyspace-event-driven wake-ups, all detailed in the crate's design
//! documentation. This crate implements only the admission-control core:
//! connection management, retries, and durable job retry are out of scope
//! (see [`Store`] and [`fred`] for the former).

mod config;
mod coordinator;
mod error;
mod events;
mod keys;
mod latch;
mod queue;
mod store;

pub use config::{Connection, QueueConfig, SubmitOptions, DEFAULT_PREFIX};
pub use error::{ConfigError, InitError, JobError, StoreError};
pub use queue::Queue;
pub use store::{AdmissionSnapshot, Store};
