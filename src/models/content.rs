//! Represents one physical blob shared by every matter with the same content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A deduplication index entry.
///
/// Keyed by the SHA-256 of the bytes. `ref_count` counts live matters
/// resolving to this hash; a record at zero is garbage awaiting reclamation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ContentRecord {
    /// Lowercase hex SHA-256 of the full byte stream.
    pub hash: String,

    /// Backend-relative location of the bytes.
    pub location: String,

    pub size_bytes: i64,

    /// Lowercase hex MD5 of the bytes, served as the HTTP ETag.
    pub md5: String,

    pub ref_count: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
