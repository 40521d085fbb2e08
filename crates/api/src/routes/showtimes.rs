//! Showtime registration, availability and purchase endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{ReservationId, ShowtimeId};
use domain::{Currency, Money, Showtime};
use saga::{Availability, Catalog, HoldReceipt, HoldRequest, ShowtimeAvailability};
use serde::{Deserialize, Serialize};
use store::{InventoryLedger, ReservationStore};

use super::reservations::ReservationResponse;
use super::{AppState, parse_showtime_id};
use crate::error::ApiError;

/// Header carrying the authenticated caller's subject.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterShowtimeRequest {
    pub showtime_id: Option<String>,
    pub total_tickets: u32,
    pub ticket_price_cents: i64,
    pub currency: Option<String>,
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub quantity: u32,
    pub contact_email: String,
    pub reservation_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub showtime_id: String,
    pub total: u32,
    pub held: u32,
    pub confirmed: u32,
    pub available: u32,
}

impl From<Availability> for AvailabilityResponse {
    fn from(availability: Availability) -> Self {
        Self {
            showtime_id: availability.showtime_id.to_string(),
            total: availability.total,
            held: availability.held,
            confirmed: availability.confirmed,
            available: availability.available,
        }
    }
}

#[derive(Serialize)]
pub struct ShowtimeResponse {
    pub showtime_id: String,
    pub total_tickets: u32,
    pub ticket_price_cents: i64,
    pub currency: String,
    pub available: u32,
}

impl From<ShowtimeAvailability> for ShowtimeResponse {
    fn from(entry: ShowtimeAvailability) -> Self {
        Self {
            showtime_id: entry.showtime.id.to_string(),
            total_tickets: entry.showtime.total_tickets,
            ticket_price_cents: entry.showtime.ticket_price.cents(),
            currency: entry.showtime.currency.to_string(),
            available: entry.availability.available,
        }
    }
}

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub reservation_id: String,
    pub payment_handle: String,
    pub amount_due_cents: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

impl From<HoldReceipt> for PurchaseResponse {
    fn from(receipt: HoldReceipt) -> Self {
        Self {
            reservation_id: receipt.reservation_id.to_string(),
            payment_handle: receipt.payment_handle.to_string(),
            amount_due_cents: receipt.amount_due.cents(),
            currency: receipt.currency.to_string(),
            expires_at: receipt.expires_at,
        }
    }
}

// -- Handlers --

/// POST /showtimes: register a showtime and open its inventory.
#[tracing::instrument(skip(state, req))]
pub async fn register<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Json(req): Json<RegisterShowtimeRequest>,
) -> Result<(StatusCode, Json<AvailabilityResponse>), ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let showtime_id = match req.showtime_id.as_deref() {
        Some(raw) => parse_showtime_id(raw)?,
        None => ShowtimeId::new(),
    };
    let currency = match req.currency.as_deref() {
        Some(code) => Currency::parse(code)?,
        None => Currency::usd(),
    };
    let showtime = Showtime::new(
        showtime_id,
        req.total_tickets,
        Money::from_cents(req.ticket_price_cents),
        currency,
    )?;

    let availability = state.coordinator.register_showtime(showtime).await?;
    Ok((StatusCode::CREATED, Json(availability.into())))
}

/// GET /showtimes: list every showtime with its remaining tickets.
#[tracing::instrument(skip(state))]
pub async fn list<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
) -> Result<Json<Vec<ShowtimeResponse>>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let showtimes = state.coordinator.list_showtimes().await?;
    Ok(Json(showtimes.into_iter().map(Into::into).collect()))
}

/// GET /showtimes/{id}/availability: current ticket counts.
#[tracing::instrument(skip(state))]
pub async fn availability<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let showtime_id = parse_showtime_id(&id)?;
    let availability = state.coordinator.availability(showtime_id).await?;
    Ok(Json(availability.into()))
}

/// POST /showtimes/{id}/purchase: hold tickets and start payment.
#[tracing::instrument(skip(state, headers, req))]
pub async fn purchase<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let showtime_id = parse_showtime_id(&id)?;
    let mut request = HoldRequest::new(showtime_id, req.quantity, req.contact_email);

    if let Some(raw) = req.reservation_id.as_deref() {
        let uuid = uuid::Uuid::parse_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("Invalid reservation_id: {e}")))?;
        request = request.with_reservation_id(ReservationId::from_uuid(uuid));
    }
    if let Some(caller) = headers.get(CALLER_ID_HEADER)
        && let Ok(subject) = caller.to_str()
        && !subject.trim().is_empty()
    {
        request = request.requested_by(subject.trim());
    }

    let receipt = state.coordinator.request_hold(request).await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

/// GET /showtimes/{id}/reservations: every reservation made for a showtime.
#[tracing::instrument(skip(state))]
pub async fn reservations<L, R, C>(
    State(state): State<Arc<AppState<L, R, C>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReservationResponse>>, ApiError>
where
    L: InventoryLedger + 'static,
    R: ReservationStore + 'static,
    C: Catalog + 'static,
{
    let showtime_id = parse_showtime_id(&id)?;
    let reservations = state
        .coordinator
        .reservations_for_showtime(showtime_id)
        .await?;
    Ok(Json(reservations.iter().map(ReservationResponse::from).collect()))
}
