//! Payment gateway adapter trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::ReservationId;
use domain::{Currency, Money, PaymentHandle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a payment stands at the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    /// Returns true once the processor will never change its answer.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentOutcome::Pending)
    }
}

/// Errors from the payment gateway, already classified by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentGatewayError {
    /// Timeout or transient processor error; the call may be retried.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The processor refused the request; retrying will not help.
    #[error("payment rejected: {0}")]
    Rejected(String),
}

impl PaymentGatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PaymentGatewayError::Unavailable(_))
    }
}

/// The only way the reservation core reaches the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment intent for a reservation and returns its handle.
    ///
    /// Called at most once per reservation. Implementations key intents by
    /// `reservation_id` so a repeated call returns the same handle.
    async fn create_intent(
        &self,
        reservation_id: ReservationId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentHandle, PaymentGatewayError>;

    /// Returns the payment's current outcome. Stable once terminal.
    async fn get_outcome(
        &self,
        handle: &PaymentHandle,
    ) -> Result<PaymentOutcome, PaymentGatewayError>;
}

#[derive(Debug, Clone)]
struct Intent {
    handle: PaymentHandle,
    amount: Money,
    outcome: PaymentOutcome,
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<ReservationId, Intent>,
    by_handle: HashMap<PaymentHandle, ReservationId>,
    next_id: u32,
    initial_outcome: Option<PaymentOutcome>,
    unavailable: bool,
    reject_intents: bool,
    create_calls: usize,
    outcome_calls: usize,
}

/// In-memory payment gateway for tests and local runs.
///
/// New intents start `Pending` unless [`set_initial_outcome`](Self::set_initial_outcome)
/// says otherwise. Once an intent is terminal its outcome can no longer change.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the outcome newly created intents start with.
    pub fn set_initial_outcome(&self, outcome: PaymentOutcome) {
        self.state().initial_outcome = Some(outcome);
    }

    /// Settles the payment behind `handle`. Ignored once it is terminal.
    pub fn set_outcome(&self, handle: &PaymentHandle, outcome: PaymentOutcome) -> bool {
        let mut state = self.state();
        let Some(reservation_id) = state.by_handle.get(handle).copied() else {
            return false;
        };
        match state.intents.get_mut(&reservation_id) {
            Some(intent) if !intent.outcome.is_terminal() => {
                intent.outcome = outcome;
                true
            }
            _ => false,
        }
    }

    /// Makes every call fail with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Makes `create_intent` fail with `Rejected` while set.
    pub fn set_reject_intents(&self, reject: bool) {
        self.state().reject_intents = reject;
    }

    /// Returns the handle issued for a reservation, if any.
    pub fn handle_for(&self, reservation_id: ReservationId) -> Option<PaymentHandle> {
        self.state()
            .intents
            .get(&reservation_id)
            .map(|intent| intent.handle.clone())
    }

    /// Returns the amount charged for a reservation's intent.
    pub fn amount_for(&self, reservation_id: ReservationId) -> Option<Money> {
        self.state()
            .intents
            .get(&reservation_id)
            .map(|intent| intent.amount)
    }

    /// Returns the number of distinct intents created.
    pub fn intent_count(&self) -> usize {
        self.state().intents.len()
    }

    /// Returns how many times `create_intent` was called.
    pub fn create_intent_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Returns how many times `get_outcome` was called.
    pub fn get_outcome_calls(&self) -> usize {
        self.state().outcome_calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(
        &self,
        reservation_id: ReservationId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentHandle, PaymentGatewayError> {
        let mut state = self.state();
        state.create_calls += 1;

        if state.unavailable {
            return Err(PaymentGatewayError::Unavailable(
                "payment processor timed out".to_string(),
            ));
        }
        if state.reject_intents {
            return Err(PaymentGatewayError::Rejected(format!(
                "intent for {amount} {currency} declined"
            )));
        }
        if let Some(existing) = state.intents.get(&reservation_id) {
            return Ok(existing.handle.clone());
        }

        state.next_id += 1;
        let handle = PaymentHandle::new(format!("pi_{:06}_secret", state.next_id));
        let outcome = state.initial_outcome.unwrap_or(PaymentOutcome::Pending);
        state.intents.insert(
            reservation_id,
            Intent {
                handle: handle.clone(),
                amount,
                outcome,
            },
        );
        state.by_handle.insert(handle.clone(), reservation_id);

        Ok(handle)
    }

    async fn get_outcome(
        &self,
        handle: &PaymentHandle,
    ) -> Result<PaymentOutcome, PaymentGatewayError> {
        let mut state = self.state();
        state.outcome_calls += 1;

        if state.unavailable {
            return Err(PaymentGatewayError::Unavailable(
                "payment processor timed out".to_string(),
            ));
        }

        state
            .by_handle
            .get(handle)
            .and_then(|reservation_id| state.intents.get(reservation_id))
            .map(|intent| intent.outcome)
            // Unknown handles may predate a restart; the hold TTL settles them.
            .ok_or_else(|| {
                PaymentGatewayError::Unavailable(format!("no record of payment handle {handle}"))
            })
    }
}
