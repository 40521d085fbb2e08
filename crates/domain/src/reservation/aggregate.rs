//! The reservation record and its transitions.

use chrono::{DateTime, Duration, Utc};
use common::{ReservationId, ShowtimeId, Version};
use serde::{Deserialize, Serialize};

use super::state::{LedgerEffect, ReservationState};
use super::value_objects::{ContactEmail, Currency, Money, PaymentHandle, Quantity, ReleaseReason};
use crate::error::DomainError;

/// The inputs of a fresh hold, before it is stamped with times and a version.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: ReservationId,
    pub showtime_id: ShowtimeId,
    pub quantity: Quantity,
    pub contact_email: ContactEmail,
    pub amount_due: Money,
    pub currency: Currency,
    pub requested_by: Option<String>,
}

/// One purchase attempt: a hold on `quantity` tickets of one showtime.
///
/// Quantity, amount, and expiry are fixed at creation. Only the state and
/// the payment/outcome fields change, and only through [`Transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub showtime_id: ShowtimeId,
    pub quantity: Quantity,
    pub contact_email: ContactEmail,
    pub amount_due: Money,
    pub currency: Currency,
    pub state: ReservationState,
    pub payment_handle: Option<PaymentHandle>,
    pub release_reason: Option<ReleaseReason>,
    pub failure_reason: Option<String>,
    /// Caller subject supplied by the identity collaborator, for audit.
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: Version,
}

impl Reservation {
    /// Creates a `PENDING` reservation expiring `hold_ttl` after `now`.
    pub fn pending(new: NewReservation, now: DateTime<Utc>, hold_ttl: Duration) -> Self {
        Self {
            id: new.id,
            showtime_id: new.showtime_id,
            quantity: new.quantity,
            contact_email: new.contact_email,
            amount_due: new.amount_due,
            currency: new.currency,
            state: ReservationState::Pending,
            payment_handle: None,
            release_reason: None,
            failure_reason: None,
            requested_by: new.requested_by,
            created_at: now,
            expires_at: now + hold_ttl,
            updated_at: now,
            version: Version::first(),
        }
    }

    /// Returns true if the hold has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns true if the reservation is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if this record's state and version match the expectation.
    pub fn matches(&self, expected_state: ReservationState, expected_version: Version) -> bool {
        self.state == expected_state && self.version == expected_version
    }

    /// Validates `transition` against the state machine and returns its ledger effect
    /// without mutating the record.
    pub fn plan(&self, transition: &Transition) -> Result<LedgerEffect, DomainError> {
        if !self.state.can_transition_to(transition.to) {
            return Err(DomainError::InvalidTransition {
                from: self.state,
                to: transition.to,
            });
        }
        if transition.to == ReservationState::Pending && transition.payment_handle.is_none() {
            return Err(DomainError::InvalidTransition {
                from: self.state,
                to: transition.to,
            });
        }
        Ok(self.state.ledger_effect(transition.to))
    }

    /// Applies a planned transition, bumping the version.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.plan(&transition)?;
        self.state = transition.to;
        if let Some(handle) = transition.payment_handle {
            self.payment_handle = Some(handle);
        }
        if transition.release_reason.is_some() {
            self.release_reason = transition.release_reason;
        }
        if transition.failure_reason.is_some() {
            self.failure_reason = transition.failure_reason;
        }
        self.updated_at = now;
        self.version = self.version.next();
        Ok(())
    }
}

/// A requested change to a reservation, checked by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: ReservationState,
    pub payment_handle: Option<PaymentHandle>,
    pub release_reason: Option<ReleaseReason>,
    pub failure_reason: Option<String>,
}

impl Transition {
    /// Records the payment handle on a still-pending reservation.
    pub fn attach_handle(handle: PaymentHandle) -> Self {
        Self {
            to: ReservationState::Pending,
            payment_handle: Some(handle),
            release_reason: None,
            failure_reason: None,
        }
    }

    /// Marks the sale as complete.
    pub fn confirm() -> Self {
        Self {
            to: ReservationState::Confirmed,
            payment_handle: None,
            release_reason: None,
            failure_reason: None,
        }
    }

    /// Returns the held tickets to inventory.
    pub fn release(reason: ReleaseReason) -> Self {
        Self {
            to: ReservationState::Released,
            payment_handle: None,
            release_reason: Some(reason),
            failure_reason: None,
        }
    }

    /// Abandons a hold whose saga could not be started.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            to: ReservationState::Failed,
            payment_handle: None,
            release_reason: None,
            failure_reason: Some(reason.into()),
        }
    }
}
