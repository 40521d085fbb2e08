//! Saga error types.

use common::{ReservationId, ShowtimeId};
use domain::{DomainError, ReservationState};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during reservation saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The hold request exceeds the tickets still available.
    #[error("Showtime {showtime_id} has {available} tickets left, {requested} requested")]
    InsufficientCapacity {
        showtime_id: ShowtimeId,
        requested: u32,
        available: u32,
    },

    /// The payment adapter could not be reached. Nothing was mutated; retry later.
    #[error("Payment adapter unavailable: {0}")]
    PaymentAdapterUnavailable(String),

    /// The payment was declined and the hold has been returned.
    #[error("Payment failed for reservation {reservation_id}: {reason}")]
    PaymentFailed {
        reservation_id: ReservationId,
        reason: String,
    },

    /// A compare-and-transition kept losing races.
    #[error("Concurrent update conflict on reservation {0}")]
    Conflict(ReservationId),

    /// The hold lapsed before it was confirmed.
    #[error("Reservation {0} has expired")]
    Expired(ReservationId),

    /// A reservation id was reused after that reservation reached a terminal state.
    #[error("Reservation {reservation_id} is already {state}")]
    ReservationClosed {
        reservation_id: ReservationId,
        state: ReservationState,
    },

    /// Showtime not found in the catalog.
    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(ShowtimeId),

    /// Showtime is already registered.
    #[error("Showtime already registered: {0}")]
    ShowtimeAlreadyRegistered(ShowtimeId),

    /// Reservation not found.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Ledger or reservation store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
