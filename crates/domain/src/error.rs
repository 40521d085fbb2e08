//! Domain error types.

use thiserror::Error;

use crate::reservation::ReservationState;

/// Errors raised by value-object validation and the reservation state machine.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A reservation must cover at least one ticket.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The contact email is not a plausible address.
    #[error("Invalid contact email: {0:?}")]
    InvalidEmail(String),

    /// The currency is not a three-letter code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// A showtime needs at least one ticket.
    #[error("Invalid capacity: {total_tickets} (must be greater than 0)")]
    InvalidCapacity { total_tickets: u32 },

    /// Ticket prices cannot be negative.
    #[error("Invalid price: {cents} (cannot be negative)")]
    InvalidPrice { cents: i64 },

    /// The amount due does not fit in the money representation.
    #[error("Amount due overflows")]
    AmountOverflow,

    /// The state machine forbids this transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ReservationState,
        to: ReservationState,
    },
}
