//! Error types for leaseq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The token does not name a live lease: never issued, expired, or
    /// already resolved. Expected when consumers race with lease expiry.
    #[error("{op}: unidentified ack: {ack}")]
    UnknownAck { op: &'static str, ack: String },

    #[error("insert_many called with an empty batch")]
    EmptyBatch,

    #[error("ack token already held by another record")]
    DuplicateAck,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn unknown_ack(op: &'static str, ack: impl Into<String>) -> Self {
        Self::UnknownAck {
            op,
            ack: ack.into(),
        }
    }

    /// True for errors that ordinary lease races produce.
    pub fn is_unknown_ack(&self) -> bool {
        matches!(self, Self::UnknownAck { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
