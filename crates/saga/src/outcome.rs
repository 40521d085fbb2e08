//! Inputs and results of coordinator operations.

use chrono::{DateTime, Utc};
use common::{ReservationId, ShowtimeId};
use domain::{Currency, Money, PaymentHandle, Reservation, ReservationState, Showtime};
use serde::{Deserialize, Serialize};
use store::InventoryCounters;

/// A customer's request to hold tickets.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub showtime_id: ShowtimeId,
    pub quantity: u32,
    pub contact_email: String,
    /// Caller-generated intent id, reused across retries of the same purchase.
    pub reservation_id: Option<ReservationId>,
    /// Caller subject for audit.
    pub requested_by: Option<String>,
}

impl HoldRequest {
    pub fn new(showtime_id: ShowtimeId, quantity: u32, contact_email: impl Into<String>) -> Self {
        Self {
            showtime_id,
            quantity,
            contact_email: contact_email.into(),
            reservation_id: None,
            requested_by: None,
        }
    }

    pub fn with_reservation_id(mut self, reservation_id: ReservationId) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    pub fn requested_by(mut self, subject: impl Into<String>) -> Self {
        self.requested_by = Some(subject.into());
        self
    }
}

/// What the customer needs to complete payment for a successful hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReceipt {
    pub reservation_id: ReservationId,
    pub payment_handle: PaymentHandle,
    pub amount_due: Money,
    pub currency: Currency,
    pub expires_at: DateTime<Utc>,
}

/// Result of a confirm call. Every variant carries the reservation as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(Reservation),
    Released(Reservation),
    Failed(Reservation),
    /// Payment is still processing; poll again.
    StillPending(Reservation),
}

impl ConfirmOutcome {
    pub(crate) fn from_record(reservation: Reservation) -> Self {
        match reservation.state {
            ReservationState::Pending => ConfirmOutcome::StillPending(reservation),
            ReservationState::Confirmed => ConfirmOutcome::Confirmed(reservation),
            ReservationState::Released => ConfirmOutcome::Released(reservation),
            ReservationState::Failed => ConfirmOutcome::Failed(reservation),
        }
    }

    pub fn reservation(&self) -> &Reservation {
        match self {
            ConfirmOutcome::Confirmed(r)
            | ConfirmOutcome::Released(r)
            | ConfirmOutcome::Failed(r)
            | ConfirmOutcome::StillPending(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            ConfirmOutcome::Confirmed(r)
            | ConfirmOutcome::Released(r)
            | ConfirmOutcome::Failed(r)
            | ConfirmOutcome::StillPending(r) => r,
        }
    }

    pub fn state(&self) -> ReservationState {
        self.reservation().state
    }
}

/// Ticket counts for one showtime. `available` is derived from the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub showtime_id: ShowtimeId,
    pub total: u32,
    pub held: u32,
    pub confirmed: u32,
    pub available: u32,
}

impl From<InventoryCounters> for Availability {
    fn from(counters: InventoryCounters) -> Self {
        Self {
            showtime_id: counters.showtime_id,
            total: counters.total_tickets,
            held: counters.held_tickets,
            confirmed: counters.confirmed_tickets,
            available: counters.available(),
        }
    }
}

/// A catalog entry together with its current availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowtimeAvailability {
    pub showtime: Showtime,
    pub availability: Availability,
}
