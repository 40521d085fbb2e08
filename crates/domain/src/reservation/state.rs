//! Reservation state machine.

use serde::{Deserialize, Serialize};

/// The state of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING ──┬──► CONFIRMED
///           ├──► RELEASED
///           └──► FAILED
/// ```
///
/// `PENDING ──► PENDING` is allowed only to attach the payment handle.
/// All three non-pending states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    /// Tickets are held and payment is in flight.
    #[default]
    Pending,

    /// Payment succeeded and the tickets are sold (terminal state).
    Confirmed,

    /// The hold was returned to inventory (terminal state).
    Released,

    /// The hold could not be completed at creation time (terminal state).
    Failed,
}

/// The effect a state transition has on the showtime's ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerEffect {
    /// Counters are untouched.
    None,
    /// Held tickets become confirmed tickets.
    Confirm,
    /// Held tickets are returned to availability.
    Release,
}

impl ReservationState {
    /// Returns true if a reservation in this state may move to `next`.
    pub fn can_transition_to(&self, _next: ReservationState) -> bool {
        matches!(self, ReservationState::Pending)
    }

    /// Returns the ledger effect of moving from this state to `next`.
    ///
    /// Only meaningful for transitions accepted by [`can_transition_to`](Self::can_transition_to).
    pub fn ledger_effect(&self, next: ReservationState) -> LedgerEffect {
        match (self, next) {
            (ReservationState::Pending, ReservationState::Confirmed) => LedgerEffect::Confirm,
            (ReservationState::Pending, ReservationState::Released)
            | (ReservationState::Pending, ReservationState::Failed) => LedgerEffect::Release,
            _ => LedgerEffect::None,
        }
    }

    /// Returns true if this reservation currently holds capacity.
    pub fn holds_capacity(&self) -> bool {
        matches!(self, ReservationState::Pending | ReservationState::Confirmed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationState::Pending)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::Pending => "PENDING",
            ReservationState::Confirmed => "CONFIRMED",
            ReservationState::Released => "RELEASED",
            ReservationState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationState::Pending),
            "CONFIRMED" => Ok(ReservationState::Confirmed),
            "RELEASED" => Ok(ReservationState::Released),
            "FAILED" => Ok(ReservationState::Failed),
            other => Err(format!("unknown reservation state: {other}")),
        }
    }
}
