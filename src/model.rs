//! Core data model.
//!
//! A record is one message in one collection. Its lease state is never
//! stored explicitly; it is derived from `visible`, `ack` and `deleted`
//! relative to the current time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A message record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identity. Ordered; claims prefer the smallest.
    pub id: RecordId,

    /// Producer content. Never interpreted.
    pub payload: serde_json::Value,

    /// Earliest time the record may be claimed. While claimed this is the
    /// lease expiry.
    pub visible: DateTime<Utc>,

    /// Capability token of the most recent claim.
    pub ack: Option<String>,

    /// Number of successful claims.
    pub tries: u32,

    /// Set once acknowledged.
    pub deleted: Option<DateTime<Utc>>,
}

impl Record {
    /// Lease state of this record at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> State {
        match (&self.deleted, &self.ack) {
            (Some(_), _) => State::Done,
            (None, _) if self.visible <= now => State::Pending,
            (None, Some(_)) => State::InFlight,
            (None, None) => State::Scheduled,
        }
    }
}

/// A record about to be inserted. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub payload: serde_json::Value,
    pub visible: DateTime<Utc>,
}

impl NewRecord {
    pub fn new(payload: serde_json::Value, visible: DateTime<Utc>) -> Self {
        Self { payload, visible }
    }
}

/// Newtype for store-assigned record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse()
            .map(RecordId)
            .map_err(|e| Error::InvalidArgument(format!("invalid record id {s:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Derived lease state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Not yet visible and never claimed (added with a delay).
    Scheduled,
    /// Claimable. Includes leases that expired without an ack.
    Pending,
    /// Leased to a consumer that has not resolved it yet.
    InFlight,
    /// Acknowledged. Terminal.
    Done,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Scheduled => "scheduled",
            State::Pending => "pending",
            State::InFlight => "in_flight",
            State::Done => "done",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A claimed message as handed to a consumer.
///
/// This is also the document forwarded to a dead-letter queue, so a
/// dead-letter consumer can recover it with `serde_json::from_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Lease token; required by `ping`, `ack` and `nack`.
    pub ack: String,
    pub payload: serde_json::Value,
    pub tries: u32,
}

impl TryFrom<Record> for Message {
    type Error = Error;

    fn try_from(record: Record) -> Result<Self> {
        let ack = record
            .ack
            .ok_or_else(|| Error::Other(format!("record {} returned by claim has no ack", record.id)))?;
        Ok(Self {
            id: record.id.to_string(),
            ack,
            payload: record.payload,
            tries: record.tries,
        })
    }
}
