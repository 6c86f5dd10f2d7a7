//! Error kinds surfaced by the catalog, dedup index, backends and services.

use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("a live matter named `{name}` already exists in folder {parent_id}")]
    NameConflict { parent_id: Uuid, name: String },
    #[error("moving {matter_id} under {new_parent_id} would create a cycle")]
    CycleDetected { matter_id: Uuid, new_parent_id: Uuid },
    #[error("matter {0} belongs to another owner")]
    CrossOwnerForbidden(Uuid),
    #[error("name `{name}` invalid: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("share link not found")]
    Expired,
    #[error("share expiry {0} is not in the future")]
    InvalidExpiry(DateTime<Utc>),
    #[error("the root folder cannot be moved, renamed or deleted")]
    RootImmutable,
    #[error("bookkeeping invariant violated: {0}")]
    InvariantViolation(String),
    #[error("storage backend failure: {0}")]
    StorageIo(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DriveResult<T> = Result<T, DriveError>;

impl DriveError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Raise an invariant violation, logging it at error level first.
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(violation = %msg, "consistency invariant violated");
        Self::InvariantViolation(msg)
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<io::Error> for DriveError {
    fn from(err: io::Error) -> Self {
        DriveError::StorageIo(err.to_string())
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        DriveError::StorageIo(err.to_string())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
