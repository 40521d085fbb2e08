use common::{ReservationId, ShowtimeId};
use domain::DomainError;
use thiserror::Error;

/// Errors that can occur when interacting with the ledger or reservation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No ledger counters exist for the showtime.
    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(ShowtimeId),

    /// Ledger counters already exist for the showtime.
    #[error("Showtime already registered: {0}")]
    ShowtimeAlreadyRegistered(ShowtimeId),

    /// A reservation with this id already exists.
    #[error("Duplicate reservation: {0}")]
    DuplicateReservation(ReservationId),

    /// A ledger operation would break the counter invariants.
    #[error("Ledger invariant violated for showtime {showtime_id}: {reason}")]
    LedgerInvariant {
        showtime_id: ShowtimeId,
        reason: String,
    },

    /// The requested transition is not allowed by the state machine.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A background store task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
