//! Reservation resolution and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use domain::Reservation;
use saga::Catalog;
use serde::Serialize;
use store::{InventoryLedger, ReservationStore};

use super::{AppState, parse_reservation_id};
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct ReservationResponse {
    pub reservation_id: String,
    pub showtime_id: String,
    pub quantity: u32,
    pub contact_email: String,
    pub amount_due_cents: i64,
    pub currency: String,
    pub status: String,
    pub payment_handle: Option<String>,
    pub release_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<&Reservation> for ReservationResponse {
    fn from(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id.to_string(),
            showtime_id: reservation.showtime_id.to_string(),
            quantity: reservation.quantity.get(),
            contact_email: reservation.contact_email.to_string(),
            amount_due_cents: reservation.amount_due.cents(),
            currency: reservation.currency.to_string(),
            status: reservation.state.to_string(),
            payment_handle: reservation.payment_handle.as_ref().map(|h| h.to_string()),
            release_reason: reservation.release_reason.map(|r| r.to_string()),
            failure_reason: reservation.failure_reason.clone(),
            requested_by: reservation.requested_by.clone(),
            created_at: reservation.created_at,
            expires_at: reservation.expires_at,
            updated_at: reservation.updated_at,
            version: reservation.version.as_i64(),
        }
    }
}

/// Status of a reservation after a confirm or cancel call.
#[derive(Serialize)]
pub struct ResolutionResponse {
    pub reservation_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_reason: Option<String>,
}

impl From<&Reservation> for ResolutionResponse {
    fn from(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id.to_string(),
            status: reservation.state.to_string(),
            release_reason: reservation.release_reason.map(|r| r.to_string()),
        }
    }
}

// -- Handlers --

/// POST /reservations/{id}/confirm: resolve a reservation from its payment outcome.
///
/// A `PENDING` status means payment is still processing and the call can be repeated.
#[tracing::instrument(skip(state))]
pub async fn confirm<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
) -> Result<Json<ResolutionResponse>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let reservation_id = parse_reservation_id(&id)?;
    let outcome = state.coordinator.confirm(reservation_id).await?;
    Ok(Json(outcome.reservation().into()))
}

/// POST /reservations/{id}/cancel: return a pending hold to inventory.
#[tracing::instrument(skip(state))]
pub async fn cancel<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
) -> Result<Json<ResolutionResponse>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state.coordinator.cancel(reservation_id).await?;
    Ok(Json((&reservation).into()))
}

/// GET /reservations/{id}: load a reservation by ID.
#[tracing::instrument(skip(state))]
pub async fn get<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let reservation_id = parse_reservation_id(&id)?;
    let reservation = state
        .coordinator
        .get_reservation(reservation_id)
        .await
        .map_err(|err| match err {
            saga::SagaError::ReservationNotFound(_) => {
                ApiError::NotFound(format!("Reservation {id} not found"))
            }
            other => other.into(),
        })?;
    Ok(Json((&reservation).into()))
}
