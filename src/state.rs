use crate::services::{matter_service::MatterService, share_service::ShareService};
use axum::extract::FromRef;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub matters: MatterService,
    pub shares: ShareService,
}

impl AppState {
    pub fn new(matters: MatterService) -> Self {
        let shares = ShareService::new(matters.clone());
        Self { matters, shares }
    }
}

impl FromRef<AppState> for MatterService {
    fn from_ref(state: &AppState) -> Self {
        state.matters.clone()
    }
}

impl FromRef<AppState> for ShareService {
    fn from_ref(state: &AppState) -> Self {
        state.shares.clone()
    }
}
