//! External collaborators the coordinator talks to.

pub mod catalog;
pub mod payment;

pub use catalog::{Catalog, InMemoryCatalog};
pub use payment::{InMemoryPaymentGateway, PaymentGateway, PaymentGatewayError, PaymentOutcome};
