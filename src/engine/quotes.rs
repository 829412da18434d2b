//! Live quote refresh.
//!
//! Bulk-fetches price and open interest for an active instrument set,
//! batching requests to the upstream per-call size limit and merging
//! results back by token. Instruments missing from the merged responses
//! keep price 0 / OI 0: stale, not removed. A failed batch leaves its
//! instruments stale; the refresh as a whole fails only when every batch
//! failed. Availability over completeness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::Engine;
use crate::broker::{Broker, BrokerSession, QuoteRequest};
use crate::error::{Error, Result};
use crate::types::Instrument;

/// Upstream protocol limit on instruments per quote call.
pub const QUOTE_BATCH_SIZE: usize = 50;

/// Refresh `instruments` in place from bulk quotes.
pub async fn refresh_quotes(
    broker: &dyn Broker,
    session: &BrokerSession,
    exchange: &str,
    instruments: &mut [Instrument],
) -> Result<()> {
    if instruments.is_empty() {
        return Ok(());
    }

    let mut live: HashMap<String, (f64, i64)> = HashMap::new();
    let mut batches = 0usize;
    let mut failed = 0usize;

    for batch in instruments.chunks(QUOTE_BATCH_SIZE) {
        batches += 1;
        let request: Vec<QuoteRequest> = batch
            .iter()
            .map(|i| QuoteRequest {
                token: i.token.clone(),
                exchange: exchange.to_string(),
            })
            .collect();

        match broker.quotes(session, &request).await {
            Ok(ticks) => {
                for tick in ticks {
                    live.insert(tick.token, (tick.ltp, tick.oi));
                }
            }
            Err(e) => {
                // Tolerated: these instruments stay stale this round.
                warn!(error = %e, batch_size = batch.len(), "Quote batch failed");
                failed += 1;
            }
        }
    }

    if failed == batches {
        return Err(Error::Transport(format!(
            "all {batches} quote batches failed"
        )));
    }

    for instrument in instruments.iter_mut() {
        let (ltp, oi) = live
            .get(&instrument.token)
            .copied()
            .unwrap_or((0.0, 0));
        instrument.ltp = ltp;
        instrument.oi = oi;
    }

    debug!(
        merged = live.len(),
        total = instruments.len(),
        "Quotes merged"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine entry point and background task
// ---------------------------------------------------------------------------

impl Engine {
    /// Refresh the owner's active chain, building it first if empty.
    pub async fn refresh_owner(&self, owner: i64) -> Result<()> {
        {
            let state = self.sessions.owner(owner).await;
            let needs_build = {
                let state = state.lock().await;
                state.session.is_some() && state.chain.is_empty()
            };
            if needs_build {
                self.build_chain(owner).await?;
            }
        }

        let state = self.sessions.owner(owner).await;
        let mut state = state.lock().await;
        let session = state
            .session
            .clone()
            .ok_or_else(|| Error::no_session(owner))?;
        let exchange = self.cfg.index(&state.index)?.exchange.clone();

        refresh_quotes(
            self.broker.as_ref(),
            &session,
            &exchange,
            &mut state.chain,
        )
        .await
    }
}

/// Periodic task: refresh every logged-in owner's chain. Per-owner failures
/// are logged and skipped; the task only stops on shutdown.
pub async fn run_refresh_task(
    engine: Arc<Engine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    info!(period_secs = period.as_secs(), "Quote refresh task started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for owner in engine.sessions().logged_in_owners().await {
                    if let Err(e) = engine.refresh_owner(owner).await {
                        error!(owner, error = %e, "Owner refresh failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Quote refresh task stopping");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
