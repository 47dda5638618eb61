//! Background sweeper for expired checkouts and reservations.

use std::sync::Arc;
use std::time::Duration;

use inventory::{LedgerStore, ReservationStore};
use pricing::SnapshotStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::CheckoutOrchestrator;
use crate::store::CheckoutStore;

/// Runs [`CheckoutOrchestrator::sweep`] every `interval` until `shutdown`
/// flips to true or its sender is dropped.
pub fn spawn_sweeper<C, L, R, P>(
    orchestrator: Arc<CheckoutOrchestrator<C, L, R, P>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    C: CheckoutStore + 'static,
    L: LedgerStore + 'static,
    R: ReservationStore + 'static,
    P: SnapshotStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match orchestrator.sweep().await {
                Ok(report) => {
                    if report.checkouts_expired > 0 || report.reservations_released > 0 {
                        tracing::info!(
                            checkouts_expired = report.checkouts_expired,
                            reservations_released = report.reservations_released,
                            "sweep finished"
                        );
                    }
                    metrics::counter!("checkout_sweeps_total").increment(1);
                }
                Err(e) => tracing::warn!(error = %e, "sweep failed"),
            }
        }

        tracing::info!("sweeper stopped");
    })
}
