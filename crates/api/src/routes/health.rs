//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use saga::Catalog;
use serde::Serialize;
use store::{InventoryLedger, ReservationStore};

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
}

/// GET /health: liveness plus the storage backend in use.
pub async fn check<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
) -> Json<HealthResponse>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    Json(HealthResponse {
        status: "ok",
        storage: state.storage,
    })
}
