//! Reservation record, state machine, and value objects.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewReservation, Reservation, Transition};
pub use state::{LedgerEffect, ReservationState};
pub use value_objects::{ContactEmail, Currency, Money, PaymentHandle, Quantity, ReleaseReason};
