//! Showtime reservation saga.
//!
//! A purchase runs as hold, then external payment, then confirm or release:
//! 1. Hold tickets in the inventory ledger and record a `PENDING` reservation
//! 2. Create a payment intent and hand its handle to the customer
//! 3. Resolve the reservation from the payment outcome
//!
//! If the intent cannot be created, the hold is released and the reservation
//! is marked `FAILED`. Holds that are never resolved are released by the
//! [`ExpirySweeper`] once their TTL lapses.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod outcome;
pub mod services;
pub mod sweeper;

pub use config::{CoordinatorConfig, SweeperConfig};
pub use coordinator::ReservationCoordinator;
pub use error::{Result, SagaError};
pub use outcome::{Availability, ConfirmOutcome, HoldReceipt, HoldRequest, ShowtimeAvailability};
pub use services::{
    Catalog, InMemoryCatalog, InMemoryPaymentGateway, PaymentGateway, PaymentGatewayError,
    PaymentOutcome,
};
pub use sweeper::{ExpirySweeper, SweepReport};
