//! # leaseq
//!
//! A work queue whose durability and mutual exclusion live entirely in the
//! backing store. Every state transition of a message (claim, ping, ack,
//! nack, dead-letter) is a single atomic find-and-update against the store;
//! the engine itself holds no locks and no state between calls.
//!
//! Ships a Postgres adapter (sqlx) and an in-memory adapter.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{Message, Record, RecordId};
pub use queue::{Queue, QueueOptions, QueueStats};
pub use store::{MemoryStore, RecordStore};
