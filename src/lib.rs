//! Cloud drive core: a per-owner matter hierarchy over deduplicated,
//! reference-counted content stored in a pluggable backend.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use services::error::{DriveError, DriveResult};
pub use state::AppState;
