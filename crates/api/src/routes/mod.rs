//! HTTP route handlers and the state they share.

pub mod health;
pub mod metrics;
pub mod reservations;
pub mod showtimes;

use common::{ReservationId, ShowtimeId};
use saga::{Catalog, InMemoryPaymentGateway, ReservationCoordinator};
use store::{InventoryLedger, ReservationStore};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<L, R, C>
where
    L: InventoryLedger,
    R: ReservationStore,
    C: Catalog,
{
    pub coordinator: ReservationCoordinator<L, R, InMemoryPaymentGateway, C>,
    /// Storage backend name reported by the health check.
    pub storage: &'static str,
}

pub(crate) fn parse_showtime_id(raw: &str) -> Result<ShowtimeId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(ShowtimeId::from_uuid)
        .map_err(|_| ApiError::BadRequest(format!("Invalid showtime ID: {raw}")))
}

pub(crate) fn parse_reservation_id(raw: &str) -> Result<ReservationId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(ReservationId::from_uuid)
        .map_err(|_| ApiError::BadRequest(format!("Invalid reservation ID: {raw}")))
}
