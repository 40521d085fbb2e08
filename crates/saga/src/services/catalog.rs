//! Showtime catalog collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ShowtimeId;
use domain::Showtime;
use store::{PostgresStore, StoreError};
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Read access to showtime prices and capacities.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Adds a showtime. Fails if the id is already known.
    async fn register(&self, showtime: Showtime) -> Result<(), SagaError>;

    /// Looks up a showtime by id.
    async fn get(&self, showtime_id: ShowtimeId) -> Result<Option<Showtime>, SagaError>;

    /// Lists all showtimes in registration order.
    async fn list(&self) -> Result<Vec<Showtime>, SagaError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    showtimes: HashMap<ShowtimeId, Showtime>,
    order: Vec<ShowtimeId>,
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn register(&self, showtime: Showtime) -> Result<(), SagaError> {
        let mut state = self.state.write().await;
        if state.showtimes.contains_key(&showtime.id) {
            return Err(SagaError::ShowtimeAlreadyRegistered(showtime.id));
        }
        state.order.push(showtime.id);
        state.showtimes.insert(showtime.id, showtime);
        Ok(())
    }

    async fn get(&self, showtime_id: ShowtimeId) -> Result<Option<Showtime>, SagaError> {
        Ok(self.state.read().await.showtimes.get(&showtime_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Showtime>, SagaError> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.showtimes.get(id).cloned())
            .collect())
    }
}

/// Catalog entries kept in the `showtimes` table, so prices outlive a restart.
#[async_trait]
impl Catalog for PostgresStore {
    async fn register(&self, showtime: Showtime) -> Result<(), SagaError> {
        match self.insert_showtime(&showtime).await {
            Ok(()) => Ok(()),
            Err(StoreError::ShowtimeAlreadyRegistered(id)) => {
                Err(SagaError::ShowtimeAlreadyRegistered(id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, showtime_id: ShowtimeId) -> Result<Option<Showtime>, SagaError> {
        Ok(self.showtime(showtime_id).await?)
    }

    async fn list(&self) -> Result<Vec<Showtime>, SagaError> {
        Ok(self.showtimes().await?)
    }
}
