//! Order execution coordinator.
//!
//! Places the hedged pair, attaches stop-losses, and drives the exit-all
//! safety sequence. Two orderings are load-bearing and must never be
//! reordered:
//!
//! - the hedge (buy) order is placed BEFORE the main (sell) order, and the
//!   main order is never sent unless the hedge came back with a valid
//!   order id. An uncovered short must not exist even transiently;
//! - exit-all closes every SELL leg before touching any BUY leg, so a
//!   protective hedge is never closed while its short is still open.
//!
//! Each successful leg is recorded in the store immediately after the
//! broker acknowledgment, never batched.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::Engine;
use crate::broker::{BrokerSession, OrderRequest, QuoteRequest};
use crate::error::{Error, Result};
use crate::types::{Instrument, Position, PositionStatus, Side};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// One successfully placed and recorded leg.
#[derive(Debug, Clone)]
pub struct ExecutedLeg {
    pub order_id: String,
    pub position_id: i64,
    pub trading_symbol: String,
    pub entry_price: f64,
}

/// Both legs of a hedged trade went through.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub hedge: ExecutedLeg,
    pub main: ExecutedLeg,
}

/// A stop-loss order accepted by the broker.
#[derive(Debug, Clone)]
pub struct StopLossReceipt {
    pub sl_order_id: String,
    pub trigger: f64,
    pub limit: f64,
}

/// What an exit-all pass accomplished.
#[derive(Debug, Clone, Default)]
pub struct ExitReport {
    pub sl_cancelled: usize,
    pub sells_closed: usize,
    pub buys_closed: usize,
    /// True when a SELL close failed and the BUY phase was skipped.
    pub buys_skipped: bool,
    pub failures: Vec<String>,
}

// ---------------------------------------------------------------------------
// Price arithmetic
// ---------------------------------------------------------------------------

/// Stop-loss trigger: entry × (1 + pct/100), rounded to one decimal
/// (banker's, matching the broker's tick display).
pub fn stop_loss_trigger(entry: f64, pct: f64) -> f64 {
    let entry = Decimal::from_f64(entry).unwrap_or_default();
    let pct = Decimal::from_f64(pct).unwrap_or_default();
    let trigger = entry * (Decimal::ONE + pct / dec!(100));
    trigger.round_dp(1).to_f64().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

impl Engine {
    /// Execute a hedged pair: buy the hedge, then sell the main leg.
    ///
    /// If the hedge fails nothing has been sold and the error is terminal.
    /// If the hedge fills but the main leg fails, the hedge position stays
    /// open and `Error::PartialExecution` is surfaced; no auto-rollback.
    pub async fn execute_hedged_trade(
        &self,
        owner: i64,
        main: &Instrument,
        hedge: &Instrument,
        qty: i64,
    ) -> Result<TradeOutcome> {
        let session = self.sessions.session(owner).await?;
        let exchange = self.cfg.index(&main.index)?.exchange.clone();

        // Hedge first. Abort before selling if it does not go through.
        let hedge_order =
            OrderRequest::market(&exchange, &hedge.trading_symbol, Side::Buy, qty);
        let hedge_ack = self.broker.place_order(&session, &hedge_order).await?;

        let mut hedge_pos = Position::open(
            owner,
            &hedge.index,
            hedge,
            Side::Buy,
            qty,
            hedge.ltp,
            &hedge_ack.order_id,
        );
        hedge_pos.id = self.store.insert_position(&hedge_pos).await?;
        info!(
            owner,
            order_id = %hedge_ack.order_id,
            symbol = %hedge.trading_symbol,
            "Hedge leg filled"
        );

        let main_order =
            OrderRequest::market(&exchange, &main.trading_symbol, Side::Sell, qty);
        let main_ack = match self.broker.place_order(&session, &main_order).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(owner, error = %e, "Main leg failed after hedge fill");
                return Err(Error::PartialExecution {
                    hedge_order_id: hedge_ack.order_id,
                    reason: e.to_string(),
                });
            }
        };

        let mut main_pos = Position::open(
            owner,
            &main.index,
            main,
            Side::Sell,
            qty,
            main.ltp,
            &main_ack.order_id,
        );
        main_pos.id = self.store.insert_position(&main_pos).await?;
        info!(
            owner,
            order_id = %main_ack.order_id,
            symbol = %main.trading_symbol,
            "Main leg filled"
        );

        Ok(TradeOutcome {
            hedge: ExecutedLeg {
                order_id: hedge_ack.order_id,
                position_id: hedge_pos.id,
                trading_symbol: hedge_pos.trading_symbol,
                entry_price: hedge_pos.entry_price,
            },
            main: ExecutedLeg {
                order_id: main_ack.order_id,
                position_id: main_pos.id,
                trading_symbol: main_pos.trading_symbol,
                entry_price: main_pos.entry_price,
            },
        })
    }

    /// Attach (or replace) a stop-loss on the SELL leg entered by
    /// `order_id`, at `pct` percent above its entry price.
    ///
    /// Any existing stop-loss order is cancelled best-effort first; on
    /// placement failure the position's prior stop-loss state is left
    /// untouched.
    pub async fn set_stop_loss(
        &self,
        owner: i64,
        order_id: &str,
        pct: f64,
    ) -> Result<StopLossReceipt> {
        let session = self.sessions.session(owner).await?;
        let position = self
            .store
            .position_by_order_id(owner, order_id)
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!("no position for order {order_id}"))
            })?;

        if position.status != PositionStatus::Open || position.side != Side::Sell {
            return Err(Error::Configuration(
                "stop-loss applies to open SELL legs only".to_string(),
            ));
        }

        let exchange = self.cfg.index(&position.index)?.exchange.clone();

        if let Some(existing) = position.sl_order_id.as_deref().filter(|id| !id.is_empty()) {
            if let Err(e) = self.broker.cancel_order(&session, existing).await {
                warn!(
                    owner,
                    sl_order_id = existing,
                    error = %e,
                    "Existing stop-loss cancel failed, re-placing anyway"
                );
            }
        }

        let trigger = stop_loss_trigger(position.entry_price, pct);
        let limit = trigger + self.cfg.trading.sl_slippage_points;
        let order = OrderRequest::stop_loss(
            &exchange,
            &position.trading_symbol,
            position.qty,
            trigger,
            limit,
        );

        let ack = self.broker.place_order(&session, &order).await?;
        self.store
            .set_stop_loss(position.id, &ack.order_id, trigger)
            .await?;

        info!(
            owner,
            sl_order_id = %ack.order_id,
            symbol = %position.trading_symbol,
            trigger,
            "Stop-loss placed"
        );

        Ok(StopLossReceipt {
            sl_order_id: ack.order_id,
            trigger,
            limit,
        })
    }

    /// Cancel the working stop-loss of the position entered by `order_id`
    /// and clear its reference.
    pub async fn cancel_stop_loss(&self, owner: i64, order_id: &str) -> Result<()> {
        let session = self.sessions.session(owner).await?;
        let position = self
            .store
            .position_by_order_id(owner, order_id)
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!("no position for order {order_id}"))
            })?;

        if let Some(sl_id) = position.sl_order_id.as_deref().filter(|id| !id.is_empty()) {
            self.broker.cancel_order(&session, sl_id).await?;
            self.store.clear_stop_loss(position.id).await?;
            info!(owner, sl_order_id = sl_id, "Stop-loss cancelled");
        }
        Ok(())
    }

    /// Close everything the owner has open, in the safe order.
    ///
    /// 1. Best-effort cancel of every working stop-loss order.
    /// 2. Close every SELL leg with an opposite-side market order.
    /// 3. Only once every SELL close succeeded, close the BUY legs.
    ///
    /// A failed SELL close leaves that position open, is reported in the
    /// returned `ExitReport`, and causes the whole BUY phase to be skipped.
    pub async fn exit_all(&self, owner: i64) -> Result<ExitReport> {
        let session = self.sessions.session(owner).await?;
        let open = self.store.open_positions(owner).await?;
        let mut report = ExitReport::default();

        if open.is_empty() {
            return Ok(report);
        }

        // Phase 1: stop-loss teardown. A failed cancel keeps its reference;
        // the supervisor clears it when the broker reports CANCELLED.
        for position in open.iter().filter(|p| p.has_stop_loss()) {
            let sl_id = position.sl_order_id.as_deref().unwrap_or_default();
            match self.broker.cancel_order(&session, sl_id).await {
                Ok(()) => {
                    self.store.clear_stop_loss(position.id).await?;
                    report.sl_cancelled += 1;
                }
                Err(e) => {
                    warn!(owner, sl_order_id = sl_id, error = %e, "Stop-loss cancel failed");
                }
            }
        }

        // Phase 2: flatten shorts.
        let mut sell_failures = 0usize;
        for position in open.iter().filter(|p| p.side == Side::Sell) {
            match self.close_position(&session, position).await {
                Ok(()) => report.sells_closed += 1,
                Err(e) => {
                    sell_failures += 1;
                    report
                        .failures
                        .push(format!("{}: {e}", position.trading_symbol));
                }
            }
        }

        // Phase 3: only now release the hedges.
        if sell_failures == 0 {
            for position in open.iter().filter(|p| p.side == Side::Buy) {
                match self.close_position(&session, position).await {
                    Ok(()) => report.buys_closed += 1,
                    Err(e) => {
                        report
                            .failures
                            .push(format!("{}: {e}", position.trading_symbol));
                    }
                }
            }
        } else {
            report.buys_skipped = true;
            warn!(
                owner,
                sell_failures, "SELL closes failed; keeping hedges open"
            );
        }

        info!(
            owner,
            sl_cancelled = report.sl_cancelled,
            sells_closed = report.sells_closed,
            buys_closed = report.buys_closed,
            buys_skipped = report.buys_skipped,
            "Exit-all complete"
        );
        Ok(report)
    }

    /// Close one open position with an opposite-side market order and mark
    /// it CLOSED at the current live price (0.0 if the quote fails).
    pub(super) async fn close_position(
        &self,
        session: &BrokerSession,
        position: &Position,
    ) -> Result<()> {
        let exchange = self.cfg.index(&position.index)?.exchange.clone();
        let exit_price = self.last_price(session, &exchange, &position.token).await;

        let order = OrderRequest::market(
            &exchange,
            &position.trading_symbol,
            position.side.opposite(),
            position.qty,
        );
        self.broker.place_order(session, &order).await?;
        self.store.mark_closed(position.id, exit_price).await?;

        info!(
            owner = position.owner,
            symbol = %position.trading_symbol,
            side = %position.side,
            exit_price,
            "Position closed"
        );
        Ok(())
    }

    /// Best-effort single-token quote; 0.0 when the feed is unavailable.
    pub(super) async fn last_price(
        &self,
        session: &BrokerSession,
        exchange: &str,
        token: &str,
    ) -> f64 {
        let request = [QuoteRequest {
            token: token.to_string(),
            exchange: exchange.to_string(),
        }];
        match self.broker.quotes(session, &request).await {
            Ok(ticks) => ticks
                .iter()
                .find(|t| t.token == token)
                .map(|t| t.ltp)
                .unwrap_or(0.0),
            Err(e) => {
                warn!(token, error = %e, "Exit price fetch failed, recording 0");
                0.0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
