//! Record store adapter.
//!
//! The queue engine talks to its backing store only through
//! [`RecordStore`]. Everything the engine needs for correctness is
//! [`RecordStore::find_one_and_update`]: the store must pick, modify and
//! return one record atomically, so that concurrent callers see mutually
//! exclusive outcomes.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{NewRecord, Record, RecordId, State};

/// Predicate over records in one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every record.
    All,
    /// Not deleted and `visible <= now`.
    Available { now: DateTime<Utc> },
    /// Not deleted, ack set and `visible > now`.
    InFlight { now: DateTime<Utc> },
    /// `ack == token`, not deleted and `visible > now`.
    Lease { ack: String, now: DateTime<Utc> },
    /// `ack == token` and not deleted, whatever `visible` is.
    Token { ack: String },
    /// Deleted.
    Done,
}

impl Filter {
    /// Evaluate the predicate against a record in process.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::Available { now } => record.state(*now) == State::Pending,
            Filter::InFlight { now } => record.state(*now) == State::InFlight,
            Filter::Lease { ack, now } => {
                record.state(*now) == State::InFlight && record.ack.as_deref() == Some(ack.as_str())
            }
            Filter::Token { ack } => {
                record.deleted.is_none() && record.ack.as_deref() == Some(ack.as_str())
            }
            Filter::Done => record.deleted.is_some(),
        }
    }
}

/// Modification applied by [`RecordStore::find_one_and_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Take a new lease: set `ack` and `visible`, increment `tries`.
    Claim { ack: String, visible: DateTime<Utc> },
    /// Move `visible`.
    Extend { visible: DateTime<Utc> },
    /// Mark the record resolved.
    Resolve { deleted: DateTime<Utc> },
}

impl Update {
    /// Apply the update to a record in process.
    pub fn apply(&self, record: &mut Record) {
        match self {
            Update::Claim { ack, visible } => {
                record.ack = Some(ack.clone());
                record.visible = *visible;
                record.tries = record.tries.saturating_add(1);
            }
            Update::Extend { visible } => record.visible = *visible,
            Update::Resolve { deleted } => record.deleted = Some(*deleted),
        }
    }
}

/// Which matching record `find_one_and_update` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    /// Whatever order the store finds cheapest.
    #[default]
    Natural,
    /// Smallest id first.
    IdAscending,
}

/// A handle on one named collection of message records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Name of the collection this handle is bound to.
    fn collection(&self) -> &str;

    /// Insert one record, returning its assigned id.
    async fn insert_one(&self, record: NewRecord) -> Result<RecordId>;

    /// Insert records, returning ids in input order.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyBatch`](crate::Error::EmptyBatch) if `records` is empty.
    async fn insert_many(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>>;

    /// Atomically select the first record matching `filter` under `sort`,
    /// apply `update` and return the record as it is after the update.
    async fn find_one_and_update(
        &self,
        filter: Filter,
        update: Update,
        sort: Sort,
    ) -> Result<Option<Record>>;

    async fn count(&self, filter: Filter) -> Result<u64>;

    async fn delete_many(&self, filter: Filter) -> Result<u64>;

    /// Create the claim-scan index on (deleted, visible) and the unique
    /// sparse index on `ack`. Idempotent.
    async fn ensure_indexes(&self) -> Result<()>;
}
