use async_trait::async_trait;
use common::{ShowtimeId, Version};
use domain::Quantity;
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Per-showtime inventory counters.
///
/// `held_tickets + confirmed_tickets <= total_tickets` holds for every
/// value a ledger ever stores. Availability is always derived, never kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCounters {
    pub showtime_id: ShowtimeId,
    pub total_tickets: u32,
    pub held_tickets: u32,
    pub confirmed_tickets: u32,
    /// Bumped on every change to the counters.
    pub version: Version,
}

impl InventoryCounters {
    /// Opens counters for a showtime with nothing held or sold.
    pub fn open(showtime_id: ShowtimeId, total_tickets: u32) -> Self {
        Self {
            showtime_id,
            total_tickets,
            held_tickets: 0,
            confirmed_tickets: 0,
            version: Version::first(),
        }
    }

    /// Tickets neither held nor sold.
    pub fn available(&self) -> u32 {
        self.total_tickets
            .saturating_sub(self.held_tickets)
            .saturating_sub(self.confirmed_tickets)
    }

    /// Holds `quantity` tickets if capacity allows. Leaves the counters
    /// untouched and returns the outcome otherwise.
    pub fn try_hold(&mut self, quantity: Quantity) -> HoldOutcome {
        let requested = quantity.get();
        if requested > self.available() {
            return HoldOutcome::InsufficientCapacity {
                available: self.available(),
            };
        }
        self.held_tickets += requested;
        self.version = self.version.next();
        HoldOutcome::Held(*self)
    }

    /// Moves `quantity` held tickets to confirmed.
    pub fn confirm(&mut self, quantity: Quantity) -> Result<()> {
        let requested = quantity.get();
        if requested > self.held_tickets {
            return Err(self.underflow("confirm", requested));
        }
        self.held_tickets -= requested;
        self.confirmed_tickets += requested;
        self.version = self.version.next();
        Ok(())
    }

    /// Returns `quantity` held tickets to availability.
    pub fn release(&mut self, quantity: Quantity) -> Result<()> {
        let requested = quantity.get();
        if requested > self.held_tickets {
            return Err(self.underflow("release", requested));
        }
        self.held_tickets -= requested;
        self.version = self.version.next();
        Ok(())
    }

    fn underflow(&self, operation: &'static str, requested: u32) -> StoreError {
        StoreError::LedgerInvariant {
            showtime_id: self.showtime_id,
            reason: format!(
                "cannot {operation} {requested} tickets, only {} held",
                self.held_tickets
            ),
        }
    }
}

/// Result of a hold attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The tickets are held; carries the counters after the hold.
    Held(InventoryCounters),
    /// Not enough tickets left; nothing was held.
    InsufficientCapacity { available: u32 },
}

/// Durable per-showtime ticket counters.
///
/// Every operation on one showtime is linearizable with respect to every
/// other operation on the same showtime. Operations on different showtimes
/// never contend.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Opens counters for a new showtime.
    ///
    /// Fails with `ShowtimeAlreadyRegistered` if counters already exist.
    async fn register_showtime(&self, showtime_id: ShowtimeId, total_tickets: u32) -> Result<()>;

    /// Atomically holds `quantity` tickets if `held + confirmed + quantity <= total`.
    ///
    /// Never holds a partial quantity.
    async fn try_hold(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<HoldOutcome>;

    /// Moves previously held tickets to confirmed. Not capacity-checked.
    async fn confirm(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()>;

    /// Returns previously held tickets to availability.
    ///
    /// Callers must consume each hold exactly once; the ledger only refuses
    /// releases that would drive `held_tickets` negative.
    async fn release(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()>;

    /// Reads the counters for one showtime.
    async fn counters(&self, showtime_id: ShowtimeId) -> Result<Option<InventoryCounters>>;

    /// Reads the counters for every registered showtime.
    async fn all_counters(&self) -> Result<Vec<InventoryCounters>>;
}
