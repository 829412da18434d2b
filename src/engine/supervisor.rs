//! Stop-loss supervisor.
//!
//! Background reconciliation of working stop-loss orders against broker
//! state, independent of user interaction. Per position:
//!
//! - stop-loss COMPLETE/FILLED: the short is gone. Close the position at
//!   the recorded trigger price, notify the owner, then market-close every
//!   open BUY leg of the same owner+index (the hedges are pure cost once
//!   the short is flat).
//! - stop-loss REJECTED/CANCELLED: drop the stale reference so a new
//!   stop-loss can be set; the position stays open.
//! - anything else: still pending at the broker, no transition.
//!
//! Errors inside an iteration are logged and swallowed; the loop only ever
//! stops on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::Engine;
use crate::types::{OrderStatus, Position, Side};

/// What one reconciliation pass changed. A pass over an unchanged batch
/// reports zeros and performs zero writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Positions whose stop-loss order was polled.
    pub polled: usize,
    /// Main legs closed because their stop-loss filled.
    pub stops_filled: usize,
    /// Hedge legs auto-closed after a stop-loss fill.
    pub hedges_closed: usize,
    /// Stale stop-loss references cleared (rejected/cancelled).
    pub cleared: usize,
}

impl Engine {
    /// One supervisor pass over every OPEN position with a working
    /// stop-loss order. Per-position failures are logged and skipped.
    pub async fn reconcile_stop_losses(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let watched = match self.store.open_positions_with_stop_loss().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "Supervisor could not load watched positions");
                return report;
            }
        };

        for position in watched {
            let Ok(session) = self.sessions.session(position.owner).await else {
                // Owner not logged in: reconsidered once they return.
                debug!(
                    owner = position.owner,
                    symbol = %position.trading_symbol,
                    "Skipping stop-loss check, owner has no session"
                );
                continue;
            };

            let sl_order_id = position.sl_order_id.clone().unwrap_or_default();
            let history = match self.broker.order_history(&session, &sl_order_id).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(
                        owner = position.owner,
                        sl_order_id,
                        error = %e,
                        "Stop-loss status fetch failed"
                    );
                    continue;
                }
            };
            report.polled += 1;

            let Some(latest) = history.first() else {
                continue;
            };

            match latest.status {
                OrderStatus::Complete => {
                    report.stops_filled += 1;
                    report.hedges_closed += self.unwind_filled_stop(&position).await;
                }
                OrderStatus::Rejected | OrderStatus::Cancelled => {
                    match self.store.clear_stop_loss(position.id).await {
                        Ok(()) => {
                            report.cleared += 1;
                            info!(
                                owner = position.owner,
                                symbol = %position.trading_symbol,
                                "Stale stop-loss reference cleared"
                            );
                        }
                        Err(e) => {
                            warn!(position_id = position.id, error = %e, "Clear failed");
                        }
                    }
                }
                _ => {} // still working at the broker
            }
        }

        report
    }

    /// A stop-loss filled: close the main leg at the recorded trigger,
    /// tell the owner, and market-close the owner's hedges on that index.
    /// Returns how many hedges were closed.
    async fn unwind_filled_stop(&self, position: &Position) -> usize {
        if let Err(e) = self
            .store
            .mark_closed(position.id, position.sl_trigger)
            .await
        {
            // Leave the record untouched; the next pass retries.
            warn!(position_id = position.id, error = %e, "Stop-fill close failed");
            return 0;
        }

        info!(
            owner = position.owner,
            symbol = %position.trading_symbol,
            exit_price = position.sl_trigger,
            "Stop-loss filled, unwinding hedges"
        );
        self.notify_owner(
            position.owner,
            &format!(
                "SL HIT: {}\nClosing hedge automatically...",
                position.trading_symbol
            ),
        )
        .await;

        let hedges = match self
            .store
            .open_positions_by_side(position.owner, Side::Buy, &position.index)
            .await
        {
            Ok(hedges) => hedges,
            Err(e) => {
                error!(owner = position.owner, error = %e, "Hedge lookup failed");
                return 0;
            }
        };

        let Ok(session) = self.sessions.session(position.owner).await else {
            return 0;
        };

        let mut closed = 0usize;
        for hedge in &hedges {
            match self.close_position(&session, hedge).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!(
                        owner = hedge.owner,
                        symbol = %hedge.trading_symbol,
                        error = %e,
                        "Hedge auto-close failed"
                    );
                }
            }
        }
        closed
    }
}

/// Periodic supervisor task. Never terminates on error; only on shutdown.
pub async fn run_supervisor_task(
    engine: Arc<Engine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    info!(period_secs = period.as_secs(), "Stop-loss supervisor started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = engine.reconcile_stop_losses().await;
                if report != ReconcileReport::default() {
                    info!(
                        polled = report.polled,
                        stops_filled = report.stops_filled,
                        hedges_closed = report.hedges_closed,
                        cleared = report.cleared,
                        "Supervisor pass complete"
                    );
                }
            }
            _ = shutdown.changed() => {
                info!("Stop-loss supervisor stopping");
                break;
            }
        }
    }
}
