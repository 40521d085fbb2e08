//! Reservation coordinator for the hold, pay, confirm saga.

use std::time::Instant;

use chrono::Utc;
use common::{ReservationId, ShowtimeId, Version};
use domain::{
    ContactEmail, NewReservation, PaymentHandle, Quantity, ReleaseReason, Reservation,
    ReservationState, Showtime, Transition,
};
use store::{HoldOutcome, InventoryLedger, ReservationStore, StoreError, TransitionOutcome};

use crate::config::CoordinatorConfig;
use crate::error::{Result, SagaError};
use crate::outcome::{Availability, ConfirmOutcome, HoldReceipt, HoldRequest, ShowtimeAvailability};
use crate::services::catalog::Catalog;
use crate::services::payment::{PaymentGateway, PaymentGatewayError, PaymentOutcome};

/// Orchestrates ticket holds, payment intents and their resolution.
///
/// Every state change of a reservation goes through the store's
/// compare-and-transition, which also applies the matching ledger effect.
/// The coordinator can therefore be called from any number of tasks at
/// once, and races with the [`ExpirySweeper`](crate::ExpirySweeper) are
/// settled by whichever transition commits first.
pub struct ReservationCoordinator<L, R, P, C>
where
    L: InventoryLedger,
    R: ReservationStore,
    P: PaymentGateway,
    C: Catalog,
{
    ledger: L,
    store: R,
    payment: P,
    catalog: C,
    config: CoordinatorConfig,
}

impl<L, R, P, C> ReservationCoordinator<L, R, P, C>
where
    L: InventoryLedger,
    R: ReservationStore,
    P: PaymentGateway,
    C: Catalog,
{
    /// Creates a coordinator with the default policy.
    pub fn new(ledger: L, store: R, payment: P, catalog: C) -> Self {
        Self::with_config(ledger, store, payment, catalog, CoordinatorConfig::default())
    }

    /// Creates a coordinator with an explicit policy.
    pub fn with_config(
        ledger: L,
        store: R,
        payment: P,
        catalog: C,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            payment,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn payment(&self) -> &P {
        &self.payment
    }

    /// Registers a showtime with the catalog and opens its ledger counters.
    ///
    /// If the ledger already has counters for this id with the same
    /// capacity (a durable ledger after a restart), they are kept as they are.
    #[tracing::instrument(skip(self, showtime), fields(showtime_id = %showtime.id))]
    pub async fn register_showtime(&self, showtime: Showtime) -> Result<Availability> {
        match self
            .ledger
            .register_showtime(showtime.id, showtime.total_tickets)
            .await
        {
            Ok(()) => {}
            Err(StoreError::ShowtimeAlreadyRegistered(id)) => {
                let counters = self
                    .ledger
                    .counters(id)
                    .await?
                    .ok_or(SagaError::ShowtimeNotFound(id))?;
                if counters.total_tickets != showtime.total_tickets {
                    return Err(SagaError::ShowtimeAlreadyRegistered(id));
                }
                tracing::info!(
                    held = counters.held_tickets,
                    confirmed = counters.confirmed_tickets,
                    "reusing existing ledger counters"
                );
            }
            Err(err) => return Err(err.into()),
        }

        let showtime_id = showtime.id;
        self.catalog.register(showtime).await?;

        metrics::counter!("showtimes_registered_total").increment(1);
        tracing::info!("showtime registered");

        self.availability(showtime_id).await
    }

    /// Returns the current ticket counts of a showtime.
    pub async fn availability(&self, showtime_id: ShowtimeId) -> Result<Availability> {
        self.ledger
            .counters(showtime_id)
            .await?
            .map(Availability::from)
            .ok_or(SagaError::ShowtimeNotFound(showtime_id))
    }

    /// Lists every registered showtime with its availability.
    pub async fn list_showtimes(&self) -> Result<Vec<ShowtimeAvailability>> {
        let showtimes = self.catalog.list().await?;
        let mut listed = Vec::with_capacity(showtimes.len());
        for showtime in showtimes {
            let availability = self.availability(showtime.id).await?;
            listed.push(ShowtimeAvailability {
                showtime,
                availability,
            });
        }
        Ok(listed)
    }

    /// Holds tickets and creates the payment intent for them.
    ///
    /// On success a `PENDING` reservation with an attached payment handle
    /// exists and its tickets are counted as held. The hold and its record
    /// are stored together, so an abandoned call leaves at most a `PENDING`
    /// record for the sweeper. If the intent cannot be created, the hold is
    /// returned before the error is reported.
    #[tracing::instrument(
        skip(self, request),
        fields(showtime_id = %request.showtime_id, quantity = request.quantity)
    )]
    pub async fn request_hold(&self, request: HoldRequest) -> Result<HoldReceipt> {
        metrics::counter!("reservation_holds_total").increment(1);
        let started = Instant::now();

        let quantity = self.validate_quantity(request.quantity)?;
        let contact_email = ContactEmail::parse(&request.contact_email)?;
        let showtime = self
            .catalog
            .get(request.showtime_id)
            .await?
            .ok_or(SagaError::ShowtimeNotFound(request.showtime_id))?;
        let amount_due = showtime.amount_due(quantity)?;

        // A retried request with the same intent id never takes a second hold.
        if let Some(id) = request.reservation_id
            && let Some(existing) = self.store.get(id).await?
        {
            ensure_same_request(&existing, showtime.id, quantity)?;
            tracing::info!(reservation_id = %id, state = %existing.state, "duplicate hold request");
            return receipt_for_existing(existing);
        }

        let reservation = Reservation::pending(
            NewReservation {
                id: request.reservation_id.unwrap_or_else(ReservationId::new),
                showtime_id: showtime.id,
                quantity,
                contact_email,
                amount_due,
                currency: showtime.currency.clone(),
                requested_by: request.requested_by,
            },
            Utc::now(),
            self.config.hold_ttl,
        );
        let reservation_id = reservation.id;

        match self.store.hold_and_create(reservation).await {
            Ok(HoldOutcome::Held(_)) => {}
            Ok(HoldOutcome::InsufficientCapacity { available }) => {
                metrics::counter!("reservation_holds_rejected_total").increment(1);
                tracing::info!(available, "hold rejected, insufficient capacity");
                return Err(SagaError::InsufficientCapacity {
                    showtime_id: showtime.id,
                    requested: quantity.get(),
                    available,
                });
            }
            Err(StoreError::DuplicateReservation(id)) => {
                tracing::info!(reservation_id = %id, "lost duplicate hold race");
                let existing = self.load(id).await?;
                ensure_same_request(&existing, showtime.id, quantity)?;
                return receipt_for_existing(existing);
            }
            Err(err) => return Err(err.into()),
        }

        let handle = match self
            .payment
            .create_intent(reservation_id, amount_due, &showtime.currency)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.compensate_failed_intent(reservation_id, &err).await?;
                return Err(match err {
                    PaymentGatewayError::Unavailable(reason) => {
                        SagaError::PaymentAdapterUnavailable(reason)
                    }
                    PaymentGatewayError::Rejected(reason) => SagaError::PaymentFailed {
                        reservation_id,
                        reason,
                    },
                });
            }
        };

        let reservation = match self
            .store
            .compare_and_transition(
                reservation_id,
                ReservationState::Pending,
                Version::first(),
                Transition::attach_handle(handle),
            )
            .await?
        {
            TransitionOutcome::Applied(reservation) => reservation,
            TransitionOutcome::Conflict(current) => return receipt_for_existing(current),
            TransitionOutcome::NotFound => {
                return Err(SagaError::ReservationNotFound(reservation_id));
            }
        };

        metrics::histogram!("reservation_request_hold_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(%reservation_id, expires_at = %reservation.expires_at, "hold placed");

        receipt_for_existing(reservation)
    }

    /// Moves a `PENDING` reservation to `FAILED`, returning its tickets.
    #[tracing::instrument(skip(self, cause))]
    async fn compensate_failed_intent(
        &self,
        reservation_id: ReservationId,
        cause: &PaymentGatewayError,
    ) -> Result<()> {
        tracing::warn!(error = %cause, "payment intent failed, releasing hold");

        match self
            .store
            .compare_and_transition(
                reservation_id,
                ReservationState::Pending,
                Version::first(),
                Transition::fail(cause.to_string()),
            )
            .await?
        {
            TransitionOutcome::Applied(_) => {
                metrics::counter!("reservation_failures_total").increment(1);
                Ok(())
            }
            // Already released by the sweeper or a cancel; the tickets are back either way.
            TransitionOutcome::Conflict(current) => {
                tracing::debug!(state = %current.state, "hold already resolved");
                Ok(())
            }
            TransitionOutcome::NotFound => Err(SagaError::ReservationNotFound(reservation_id)),
        }
    }

    /// Resolves a reservation from its payment outcome.
    ///
    /// Terminal reservations report their recorded outcome without touching
    /// the ledger, so this is safe to call any number of times.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<ConfirmOutcome> {
        for attempt in 1..=self.config.max_transition_attempts {
            let reservation = self.load(reservation_id).await?;
            if reservation.is_terminal() {
                return Ok(ConfirmOutcome::from_record(reservation));
            }

            let Some(handle) = reservation.payment_handle.clone() else {
                return Ok(ConfirmOutcome::StillPending(reservation));
            };

            let transition = match self.payment_outcome(&handle).await {
                PaymentOutcome::Succeeded => Transition::confirm(),
                PaymentOutcome::Failed => Transition::release(ReleaseReason::PaymentFailed),
                PaymentOutcome::Pending if reservation.is_expired(Utc::now()) => {
                    Transition::release(ReleaseReason::Expired)
                }
                PaymentOutcome::Pending => return Ok(ConfirmOutcome::StillPending(reservation)),
            };

            match self
                .store
                .compare_and_transition(
                    reservation_id,
                    ReservationState::Pending,
                    reservation.version,
                    transition,
                )
                .await?
            {
                TransitionOutcome::Applied(resolved) => {
                    record_resolution(&resolved);
                    return Ok(ConfirmOutcome::from_record(resolved));
                }
                TransitionOutcome::Conflict(current) => {
                    tracing::debug!(attempt, state = %current.state, "confirm lost a race");
                }
                TransitionOutcome::NotFound => {
                    return Err(SagaError::ReservationNotFound(reservation_id));
                }
            }
        }

        tracing::warn!("confirm gave up after repeated conflicts");
        Err(SagaError::Conflict(reservation_id))
    }

    /// Releases a `PENDING` reservation at the customer's request.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        for attempt in 1..=self.config.max_transition_attempts {
            let reservation = self.load(reservation_id).await?;
            if reservation.is_terminal() {
                return Ok(reservation);
            }

            match self
                .store
                .compare_and_transition(
                    reservation_id,
                    ReservationState::Pending,
                    reservation.version,
                    Transition::release(ReleaseReason::Cancelled),
                )
                .await?
            {
                TransitionOutcome::Applied(released) => {
                    record_resolution(&released);
                    return Ok(released);
                }
                TransitionOutcome::Conflict(current) => {
                    tracing::debug!(attempt, state = %current.state, "cancel lost a race");
                }
                TransitionOutcome::NotFound => {
                    return Err(SagaError::ReservationNotFound(reservation_id));
                }
            }
        }

        Err(SagaError::Conflict(reservation_id))
    }

    /// Loads a reservation by id.
    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.load(reservation_id).await
    }

    /// Lists every reservation ever made for a showtime.
    pub async fn reservations_for_showtime(
        &self,
        showtime_id: ShowtimeId,
    ) -> Result<Vec<Reservation>> {
        if self.catalog.get(showtime_id).await?.is_none() {
            return Err(SagaError::ShowtimeNotFound(showtime_id));
        }
        Ok(self.store.list_for_showtime(showtime_id).await?)
    }

    async fn load(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .get(reservation_id)
            .await?
            .ok_or(SagaError::ReservationNotFound(reservation_id))
    }

    /// Asks the gateway for an outcome. Transient errors read as still pending.
    async fn payment_outcome(&self, handle: &PaymentHandle) -> PaymentOutcome {
        match self.payment.get_outcome(handle).await {
            Ok(outcome) => outcome,
            Err(PaymentGatewayError::Unavailable(reason)) => {
                tracing::warn!(%reason, "payment gateway unavailable, treating as pending");
                PaymentOutcome::Pending
            }
            Err(PaymentGatewayError::Rejected(reason)) => {
                tracing::warn!(%reason, "payment gateway rejected outcome query");
                PaymentOutcome::Failed
            }
        }
    }

    fn validate_quantity(&self, requested: u32) -> Result<Quantity> {
        let quantity = Quantity::new(requested)?;
        if requested > self.config.max_tickets_per_hold {
            return Err(SagaError::InvalidRequest(format!(
                "at most {} tickets per hold, requested {requested}",
                self.config.max_tickets_per_hold
            )));
        }
        Ok(quantity)
    }
}

/// Rejects reuse of a reservation id for a different showtime or quantity.
fn ensure_same_request(
    existing: &Reservation,
    showtime_id: ShowtimeId,
    quantity: Quantity,
) -> Result<()> {
    if existing.showtime_id != showtime_id || existing.quantity != quantity {
        return Err(SagaError::InvalidRequest(format!(
            "reservation id {} was already used for a different request",
            existing.id
        )));
    }
    Ok(())
}

/// Builds the answer for a hold request whose reservation already exists.
fn receipt_for_existing(reservation: Reservation) -> Result<HoldReceipt> {
    let reservation_id = reservation.id;
    match reservation.state {
        ReservationState::Pending => match reservation.payment_handle {
            Some(payment_handle) => Ok(HoldReceipt {
                reservation_id,
                payment_handle,
                amount_due: reservation.amount_due,
                currency: reservation.currency,
                expires_at: reservation.expires_at,
            }),
            None => Err(SagaError::PaymentAdapterUnavailable(format!(
                "payment intent for reservation {reservation_id} is still being created"
            ))),
        },
        ReservationState::Released => match reservation.release_reason {
            Some(ReleaseReason::Expired) => Err(SagaError::Expired(reservation_id)),
            Some(ReleaseReason::PaymentFailed) => Err(SagaError::PaymentFailed {
                reservation_id,
                reason: "payment was declined".to_string(),
            }),
            _ => Err(SagaError::ReservationClosed {
                reservation_id,
                state: reservation.state,
            }),
        },
        state => Err(SagaError::ReservationClosed {
            reservation_id,
            state,
        }),
    }
}

/// Emits metrics for a reservation that just reached a terminal state.
pub(crate) fn record_resolution(reservation: &Reservation) {
    let held_for = (reservation.updated_at - reservation.created_at)
        .to_std()
        .unwrap_or_default();
    metrics::histogram!("reservation_hold_duration_seconds").record(held_for.as_secs_f64());

    match reservation.state {
        ReservationState::Confirmed => {
            metrics::counter!("reservation_confirmations_total").increment(1);
            tracing::info!(
                reservation_id = %reservation.id,
                quantity = reservation.quantity.get(),
                "reservation confirmed"
            );
        }
        ReservationState::Released => {
            let reason = reservation
                .release_reason
                .map(|r| r.as_str())
                .unwrap_or("unknown");
            metrics::counter!("reservation_releases_total", "reason" => reason).increment(1);
            tracing::info!(reservation_id = %reservation.id, reason, "reservation released");
        }
        ReservationState::Failed | ReservationState::Pending => {}
    }
}
