//! Expiry sweeper: returns lapsed holds to inventory.

use chrono::{DateTime, Utc};
use domain::{ReleaseReason, ReservationState, Transition};
use futures_util::StreamExt;
use store::{ReservationStore, TransitionOutcome};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SweeperConfig;
use crate::coordinator::record_resolution;
use crate::error::Result;

/// Counts from a single sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired `PENDING` reservations seen.
    pub examined: usize,
    /// Reservations this pass moved to `RELEASED`.
    pub released: usize,
    /// Reservations another actor resolved first.
    pub conflicts: usize,
    /// Reservations left for the next pass after an error.
    pub errors: usize,
}

/// Periodically releases `PENDING` reservations whose hold has lapsed.
///
/// Any number of sweepers may run against the same store. Each release
/// is a compare-and-transition from the version the sweeper read, so a
/// reservation is credited back at most once.
pub struct ExpirySweeper<R: ReservationStore> {
    store: R,
    config: SweeperConfig,
}

impl<R: ReservationStore> ExpirySweeper<R> {
    pub fn new(store: R, config: SweeperConfig) -> Self {
        Self { store, config }
    }

    /// Runs one pass over the reservations expired at `now`.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        metrics::counter!("reservation_sweeps_total").increment(1);
        let mut report = SweepReport::default();
        let mut expired = self.store.list_expired_pending(now).await?;

        while let Some(next) = expired.next().await {
            report.examined += 1;
            let reservation = match next {
                Ok(reservation) => reservation,
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(error = %err, "failed to read expired reservation");
                    continue;
                }
            };

            let outcome = self
                .store
                .compare_and_transition(
                    reservation.id,
                    ReservationState::Pending,
                    reservation.version,
                    Transition::release(ReleaseReason::Expired),
                )
                .await;

            match outcome {
                Ok(TransitionOutcome::Applied(released)) => {
                    report.released += 1;
                    record_resolution(&released);
                }
                Ok(TransitionOutcome::Conflict(_)) | Ok(TransitionOutcome::NotFound) => {
                    report.conflicts += 1;
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::error!(
                        reservation_id = %reservation.id,
                        error = %err,
                        "failed to release expired hold, will retry next sweep"
                    );
                }
            }
        }

        if report.errors > 0 {
            metrics::counter!("reservation_sweep_errors_total").increment(report.errors as u64);
        }
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                released = report.released,
                conflicts = report.conflicts,
                errors = report.errors,
                "sweep finished"
            );
        }

        Ok(report)
    }

    /// Sweeps on every tick of the configured interval until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "expiry sweeper started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once(Utc::now()).await {
                        tracing::error!(error = %err, "sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}
