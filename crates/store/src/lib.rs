//! Inventory ledger and reservation store.
//!
//! Two traits with two implementations each:
//! - [`InventoryLedger`]: per-showtime held/confirmed counters
//! - [`ReservationStore`]: reservation records with compare-and-transition
//!
//! [`InMemoryLedger`]/[`InMemoryReservationStore`] serve tests and local runs;
//! [`PostgresStore`] implements both traits over one connection pool so a
//! transition and its ledger effect commit in a single database transaction.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod reservations;

pub use error::{Result, StoreError};
pub use ledger::{HoldOutcome, InventoryCounters, InventoryLedger};
pub use memory::{InMemoryLedger, InMemoryReservationStore};
pub use postgres::PostgresStore;
pub use reservations::{ReservationStore, ReservationStream, TransitionOutcome};
