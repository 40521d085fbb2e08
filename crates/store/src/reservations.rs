use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ReservationId, ShowtimeId, Version};
use domain::{Reservation, ReservationState, Transition};
use futures_core::Stream;

use crate::{HoldOutcome, Result};

/// A stream of reservations.
pub type ReservationStream = Pin<Box<dyn Stream<Item = Result<Reservation>> + Send>>;

/// Result of a compare-and-transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition and its ledger effect were committed; carries the new record.
    Applied(Reservation),
    /// The stored state or version did not match; carries the record as it is now.
    Conflict(Reservation),
    /// No reservation has this id.
    NotFound,
}

/// Durable reservation records.
///
/// Records are never deleted. `compare_and_transition` is the only way to
/// change a record after `create`.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Stores a new reservation.
    ///
    /// Fails with `DuplicateReservation` if the id is taken, which is what
    /// makes a caller-supplied id safe to reuse across retries.
    async fn create(&self, reservation: Reservation) -> Result<ReservationId>;

    /// Takes a ledger hold for `reservation.quantity` and stores the record
    /// as one step.
    ///
    /// Either both happen or neither does, even if the caller stops polling
    /// part way: a hold is never left without a `PENDING` record to release
    /// it. An id that is already taken fails with `DuplicateReservation`
    /// before any hold is taken, and `InsufficientCapacity` stores nothing.
    async fn hold_and_create(&self, reservation: Reservation) -> Result<HoldOutcome>;

    /// Loads a reservation by id.
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Atomically applies `transition` if the record is still at
    /// `expected_state`/`expected_version`.
    ///
    /// The transition's ledger effect (confirm or release of the record's
    /// quantity) is applied inside the same atomic step, before the new
    /// state is recorded. If the ledger refuses, nothing is recorded and the
    /// error is returned, so the transition can be retried later.
    async fn compare_and_transition(
        &self,
        id: ReservationId,
        expected_state: ReservationState,
        expected_version: Version,
        transition: Transition,
    ) -> Result<TransitionOutcome>;

    /// Streams a fresh snapshot of `PENDING` reservations with `expires_at <= now`.
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<ReservationStream>;

    /// Loads every reservation for a showtime, oldest first.
    async fn list_for_showtime(&self, showtime_id: ShowtimeId) -> Result<Vec<Reservation>>;
}
