//! Domain model for showtime ticket reservations.
//!
//! This crate provides:
//! - `Reservation` and its `PENDING → CONFIRMED | RELEASED | FAILED` state machine
//! - `Transition`, the only way a reservation changes, and the `LedgerEffect` it implies
//! - `Showtime`, the catalog's view of capacity and price
//! - Validated value objects (`Quantity`, `ContactEmail`, `Currency`, `Money`)

pub mod error;
pub mod reservation;
pub mod showtime;

pub use error::DomainError;
pub use reservation::{
    ContactEmail, Currency, LedgerEffect, Money, NewReservation, PaymentHandle, Quantity,
    ReleaseReason, Reservation, ReservationState, Transition,
};
pub use showtime::Showtime;
