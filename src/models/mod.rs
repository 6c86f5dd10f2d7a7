//! Core data models for the drive.
//!
//! These entities represent the matter tree, the deduplicated content blobs
//! behind it, and share links. They map to database tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod content;
pub mod matter;
pub mod share;
