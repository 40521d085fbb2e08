use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ReservationId, ShowtimeId, Version};
use domain::{LedgerEffect, Quantity, Reservation, ReservationState, Transition};
use tokio::sync::{Mutex, RwLock};

use crate::{
    HoldOutcome, InventoryCounters, Result, StoreError,
    ledger::InventoryLedger,
    reservations::{ReservationStore, ReservationStream, TransitionOutcome},
};

type Cell<T> = Arc<Mutex<T>>;

/// In-memory inventory ledger.
///
/// Each showtime's counters sit behind their own lock, so holds on
/// unrelated showtimes never wait on each other. The outer map lock is only
/// held long enough to find or insert a cell.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    showtimes: Arc<RwLock<HashMap<ShowtimeId, Cell<InventoryCounters>>>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, showtime_id: ShowtimeId) -> Result<Cell<InventoryCounters>> {
        self.showtimes
            .read()
            .await
            .get(&showtime_id)
            .cloned()
            .ok_or(StoreError::ShowtimeNotFound(showtime_id))
    }
}

#[async_trait]
impl InventoryLedger for InMemoryLedger {
    async fn register_showtime(&self, showtime_id: ShowtimeId, total_tickets: u32) -> Result<()> {
        let mut showtimes = self.showtimes.write().await;
        if showtimes.contains_key(&showtime_id) {
            return Err(StoreError::ShowtimeAlreadyRegistered(showtime_id));
        }
        showtimes.insert(
            showtime_id,
            Arc::new(Mutex::new(InventoryCounters::open(showtime_id, total_tickets))),
        );
        Ok(())
    }

    async fn try_hold(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<HoldOutcome> {
        let cell = self.cell(showtime_id).await?;
        let mut counters = cell.lock().await;
        Ok(counters.try_hold(quantity))
    }

    async fn confirm(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()> {
        let cell = self.cell(showtime_id).await?;
        let mut counters = cell.lock().await;
        counters.confirm(quantity)
    }

    async fn release(&self, showtime_id: ShowtimeId, quantity: Quantity) -> Result<()> {
        let cell = self.cell(showtime_id).await?;
        let mut counters = cell.lock().await;
        counters.release(quantity)
    }

    async fn counters(&self, showtime_id: ShowtimeId) -> Result<Option<InventoryCounters>> {
        let cell = self.showtimes.read().await.get(&showtime_id).cloned();
        match cell {
            Some(cell) => Ok(Some(*cell.lock().await)),
            None => Ok(None),
        }
    }

    async fn all_counters(&self) -> Result<Vec<InventoryCounters>> {
        let cells: Vec<_> = self.showtimes.read().await.values().cloned().collect();
        let mut all = Vec::with_capacity(cells.len());
        for cell in cells {
            all.push(*cell.lock().await);
        }
        Ok(all)
    }
}

/// In-memory reservation store.
///
/// Each record has its own lock. A compare-and-transition holds that lock
/// while it applies the ledger effect, so two racing transitions on one
/// reservation cannot both see `PENDING`.
#[derive(Clone)]
pub struct InMemoryReservationStore<L: InventoryLedger> {
    ledger: L,
    reservations: Arc<RwLock<HashMap<ReservationId, Cell<Reservation>>>>,
}

impl<L: InventoryLedger> InMemoryReservationStore<L> {
    /// Creates a store that applies transition effects to `ledger`.
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            reservations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the total number of reservations stored.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    async fn snapshot(&self) -> Vec<Reservation> {
        let cells: Vec<_> = self.reservations.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(cells.len());
        for cell in cells {
            records.push(cell.lock().await.clone());
        }
        records
    }

    /// Holds and inserts under the map write lock, so no other writer can
    /// claim the id between the duplicate check and the insert.
    async fn hold_and_insert(&self, reservation: Reservation) -> Result<HoldOutcome> {
        let id = reservation.id;
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&id) {
            return Err(StoreError::DuplicateReservation(id));
        }

        let outcome = self
            .ledger
            .try_hold(reservation.showtime_id, reservation.quantity)
            .await?;
        if let HoldOutcome::Held(_) = outcome {
            reservations.insert(id, Arc::new(Mutex::new(reservation)));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<L: InventoryLedger + Clone + 'static> ReservationStore for InMemoryReservationStore<L> {
    async fn create(&self, reservation: Reservation) -> Result<ReservationId> {
        if self.ledger.counters(reservation.showtime_id).await?.is_none() {
            return Err(StoreError::ShowtimeNotFound(reservation.showtime_id));
        }

        let id = reservation.id;
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&id) {
            return Err(StoreError::DuplicateReservation(id));
        }
        reservations.insert(id, Arc::new(Mutex::new(reservation)));
        Ok(id)
    }

    async fn hold_and_create(&self, reservation: Reservation) -> Result<HoldOutcome> {
        // Runs detached so a dropped caller cannot split the hold from the insert.
        let store = self.clone();
        tokio::spawn(async move { store.hold_and_insert(reservation).await }).await?
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let cell = self.reservations.read().await.get(&id).cloned();
        match cell {
            Some(cell) => Ok(Some(cell.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn compare_and_transition(
        &self,
        id: ReservationId,
        expected_state: ReservationState,
        expected_version: Version,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let Some(cell) = self.reservations.read().await.get(&id).cloned() else {
            return Ok(TransitionOutcome::NotFound);
        };

        let mut record = cell.lock().await;
        if !record.matches(expected_state, expected_version) {
            return Ok(TransitionOutcome::Conflict(record.clone()));
        }

        let mut next = record.clone();
        let effect = next.plan(&transition)?;
        next.apply(transition, Utc::now())?;

        // The record lock is still held here; a failed effect leaves it untouched.
        match effect {
            LedgerEffect::None => {}
            LedgerEffect::Confirm => self.ledger.confirm(next.showtime_id, next.quantity).await?,
            LedgerEffect::Release => self.ledger.release(next.showtime_id, next.quantity).await?,
        }

        *record = next;
        Ok(TransitionOutcome::Applied(record.clone()))
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<ReservationStream> {
        use futures_util::stream;

        let mut expired: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.state == ReservationState::Pending && r.is_expired(now))
            .collect();
        expired.sort_by_key(|r| (r.expires_at, r.id));

        Ok(Box::pin(stream::iter(expired.into_iter().map(Ok))))
    }

    async fn list_for_showtime(&self, showtime_id: ShowtimeId) -> Result<Vec<Reservation>> {
        let mut records: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|r| r.showtime_id == showtime_id)
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }
}
