//! End-to-end lifecycle tests: chain build → selection → hedged execution
//! → stop-loss management → supervisor reconciliation → exit-all.

use chrono::{Duration, Local};
use std::sync::Arc;

use premia::broker::OrderType;
use premia::config::AppConfig;
use premia::engine::chain::{expiry_code, future_symbol};
use premia::engine::supervisor::ReconcileReport;
use premia::error::Error;
use premia::notify::NullNotifier;
use premia::store::{MasterRow, Store};
use premia::types::{OptionKind, OrderStatus, PositionStatus, Side, UserProfile};
use premia::Engine;

use crate::memory_store::MemoryStore;
use crate::mock_broker::MockBroker;

const OWNER: i64 = 42;
const FUT_TOKEN: &str = "100";

fn test_config() -> AppConfig {
    toml::from_str(
        r#"
        [service]
        name = "premia-test"
        default_index = "NIFTY"
        quote_refresh_secs = 180
        supervisor_poll_secs = 600
        health_port = 0

        [broker]
        base_url = "http://localhost:1"
        request_timeout_secs = 5

        [trading]
        sl_slippage_points = 10.0

        [store]
        database_url = "sqlite::memory:"

        [alerts]

        [indices.NIFTY]
        exchange = "nse_fo"
        lot_size = 65
        strike_gap = 50
        master_url = "http://localhost:1/master"
        "#,
    )
    .unwrap()
}

fn ce_token(strike: i64) -> String {
    format!("CE{strike}")
}

fn pe_token(strike: i64) -> String {
    format!("PE{strike}")
}

struct Harness {
    engine: Arc<Engine>,
    broker: Arc<MockBroker>,
    store: Arc<MemoryStore>,
    expiry: String,
}

/// Future quoted at 24875 (ATM 24900, gap 50); calls priced per
/// `ce_prices`, puts listed but left stale.
async fn harness(ce_prices: &[(i64, f64)]) -> Harness {
    let broker = Arc::new(MockBroker::new());
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(
        Engine::new(
            test_config(),
            broker.clone(),
            store.clone(),
            Arc::new(NullNotifier),
        )
        .unwrap(),
    );

    let today = Local::now().date_naive();
    let expiry = expiry_code(today + Duration::days(6));
    let fut_symbol = future_symbol("NIFTY", today);

    let mut rows = vec![MasterRow {
        token: FUT_TOKEN.to_string(),
        trading_symbol: fut_symbol.clone(),
        ref_key: fut_symbol,
    }];
    for &(strike, _) in ce_prices {
        rows.push(MasterRow {
            token: ce_token(strike),
            trading_symbol: format!("NIFTY-{strike}-CE"),
            ref_key: format!("NIFTY{expiry}{strike}.00CE"),
        });
        rows.push(MasterRow {
            token: pe_token(strike),
            trading_symbol: format!("NIFTY-{strike}-PE"),
            ref_key: format!("NIFTY{expiry}{strike}.00PE"),
        });
    }
    store.replace_master("NIFTY", &rows).await.unwrap();

    broker.set_quote(FUT_TOKEN, 24875.0, 0);
    for &(strike, price) in ce_prices {
        broker.set_quote(&ce_token(strike), price, 1_000);
    }

    store
        .upsert_user(&UserProfile {
            owner: OWNER,
            name: "Asha".to_string(),
            consumer_key: "ck".to_string(),
            mobile: "+911234567890".to_string(),
            ucc: "UC1".to_string(),
            mpin: "123456".to_string(),
        })
        .await
        .unwrap();
    engine.login(OWNER, "654321").await.unwrap();

    Harness {
        engine,
        broker,
        store,
        expiry,
    }
}

/// The §8 worked scenario chain: calls [160, 140, 110, 80] at and below
/// the money, cheap wings [30, 20, 10] above. The ATM strike (24900) must
/// be listed or no expiry resolves.
fn scenario_prices() -> Vec<(i64, f64)> {
    vec![
        (24700, 160.0),
        (24750, 140.0),
        (24800, 110.0),
        (24850, 80.0),
        (24900, 30.0),
        (24950, 20.0),
        (25000, 10.0),
    ]
}

// ---------------------------------------------------------------------------
// Chain building and selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chain_build_resolves_atm_and_expiry() {
    let h = harness(&scenario_prices()).await;

    let summary = h.engine.build_chain(OWNER).await.unwrap();
    assert_eq!(summary.atm, 24_900); // 24875 rounded to the 50 grid
    assert_eq!(summary.expiry, h.expiry);
    assert_eq!(summary.instruments, scenario_prices().len() * 2);
    assert_eq!(summary.to_string(), format!("ATM: 24900 | Exp: {}", h.expiry));
}

#[tokio::test]
async fn test_selector_pairs_premium_target_with_cheap_wing() {
    let h = harness(&scenario_prices()).await;

    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();

    // Highest price at or below 120 is 110; 0.20 * 110 = 22 -> wing at 20.
    assert_eq!(main.ltp, 110.0);
    assert_eq!(main.strike, 24_800);
    assert_eq!(hedge.ltp, 20.0);
    assert_eq!(hedge.strike, 24_950);
}

#[tokio::test]
async fn test_quantity_for_multiplies_lot_size() {
    let h = harness(&scenario_prices()).await;
    assert_eq!(h.engine.quantity_for("NIFTY", 2).unwrap(), 130);
    assert!(h.engine.quantity_for("BANKNIFTY", 1).is_err());
}

// ---------------------------------------------------------------------------
// Hedged execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_execution_places_hedge_before_main() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();

    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();

    let orders = h.broker.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].trading_symbol, hedge.trading_symbol);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[1].trading_symbol, main.trading_symbol);
    assert_eq!(orders[1].side, Side::Sell);
    assert!(orders
        .iter()
        .all(|o| o.order_type == OrderType::Market && o.qty == 65));

    // Both legs recorded immediately, entry = live premium at execution.
    let positions = h.store.all_positions();
    assert_eq!(positions.len(), 2);
    let hedge_pos = positions.iter().find(|p| p.side == Side::Buy).unwrap();
    let main_pos = positions.iter().find(|p| p.side == Side::Sell).unwrap();
    assert_eq!(hedge_pos.entry_price, 20.0);
    assert_eq!(hedge_pos.order_id, outcome.hedge.order_id);
    assert_eq!(main_pos.entry_price, 110.0);
    assert_eq!(main_pos.order_id, outcome.main.order_id);
    assert!(positions.iter().all(|p| p.status == PositionStatus::Open));
}

#[tokio::test]
async fn test_hedge_failure_aborts_before_selling() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();

    h.broker.fail_orders_for(&hedge.trading_symbol);
    let err = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap_err();

    // A failed hedge is a plain transport error, not partial execution:
    // nothing was sold, nothing was recorded.
    assert!(!matches!(err, Error::PartialExecution { .. }));
    let orders = h.broker.orders();
    assert_eq!(orders.len(), 1);
    assert!(!orders[0].accepted);
    assert!(h.store.all_positions().is_empty());
}

#[tokio::test]
async fn test_main_failure_surfaces_partial_execution() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();

    h.broker.fail_orders_for(&main.trading_symbol);
    let err = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap_err();

    let hedge_order_id = match err {
        Error::PartialExecution { hedge_order_id, .. } => hedge_order_id,
        other => panic!("expected PartialExecution, got {other}"),
    };

    // The hedge stays open on the book, recorded with its order id.
    let positions = h.store.all_positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].side, Side::Buy);
    assert_eq!(positions[0].order_id, hedge_order_id);
    assert_eq!(positions[0].status, PositionStatus::Open);
}

// ---------------------------------------------------------------------------
// Stop-loss attachment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_set_stop_loss_places_trigger_order() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();

    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();
    assert_eq!(receipt.trigger, 137.5); // 110 * 1.25
    assert_eq!(receipt.limit, 147.5); // trigger + 10 slippage points

    let sl_order = h.broker.orders().pop().unwrap();
    assert_eq!(sl_order.order_type, OrderType::StopLoss);
    assert_eq!(sl_order.side, Side::Buy);
    assert_eq!(sl_order.trading_symbol, main.trading_symbol);
    assert_eq!(sl_order.trigger_price, Some(137.5));
    assert_eq!(sl_order.price, 147.5);
    assert_eq!(sl_order.qty, 65);

    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.sl_order_id.as_deref(), Some(receipt.sl_order_id.as_str()));
    assert_eq!(pos.sl_trigger, 137.5);

    // Stop-losses only make sense on the short leg.
    let err = h
        .engine
        .set_stop_loss(OWNER, &outcome.hedge.order_id, 25.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_replacing_stop_loss_cancels_previous_order() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();

    let first = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();
    let second = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 50.0)
        .await
        .unwrap();

    assert_eq!(h.broker.cancels(), vec![first.sl_order_id.clone()]);
    assert_eq!(second.trigger, 165.0);

    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.sl_order_id.as_deref(), Some(second.sl_order_id.as_str()));
    assert_eq!(pos.sl_trigger, 165.0);
}

#[tokio::test]
async fn test_cancel_stop_loss_clears_reference() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    h.engine
        .cancel_stop_loss(OWNER, &outcome.main.order_id)
        .await
        .unwrap();

    assert_eq!(h.broker.cancels(), vec![receipt.sl_order_id]);
    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!pos.has_stop_loss());
    assert_eq!(pos.status, PositionStatus::Open);
}

#[tokio::test]
async fn test_stop_loss_placement_failure_leaves_prior_state() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let first = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    // Every further order on the main symbol fails, so re-placement fails.
    h.broker.fail_orders_for(&main.trading_symbol);
    let err = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 50.0)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.sl_order_id.as_deref(), Some(first.sl_order_id.as_str()));
    assert_eq!(pos.sl_trigger, 137.5);
}

// ---------------------------------------------------------------------------
// Exit-all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_exit_all_closes_sells_before_buys() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    let report = h.engine.exit_all(OWNER).await.unwrap();
    assert_eq!(report.sl_cancelled, 1);
    assert_eq!(report.sells_closed, 1);
    assert_eq!(report.buys_closed, 1);
    assert!(!report.buys_skipped);
    assert!(report.failures.is_empty());

    assert!(h.broker.cancels().contains(&receipt.sl_order_id));

    // Every SELL-side close precedes every BUY-side close.
    let orders = h.broker.orders();
    let closes = &orders[3..]; // after hedge entry, main entry, SL order
    let main_close = closes
        .iter()
        .position(|o| o.trading_symbol == main.trading_symbol && o.side == Side::Buy)
        .unwrap();
    let hedge_close = closes
        .iter()
        .position(|o| o.trading_symbol == hedge.trading_symbol && o.side == Side::Sell)
        .unwrap();
    assert!(main_close < hedge_close);

    let positions = h.store.all_positions();
    assert!(positions.iter().all(|p| p.status == PositionStatus::Closed));
    assert!(positions.iter().all(|p| !p.has_stop_loss()));
    let main_pos = positions.iter().find(|p| p.side == Side::Sell).unwrap();
    let hedge_pos = positions.iter().find(|p| p.side == Side::Buy).unwrap();
    assert_eq!(main_pos.exit_price, 110.0); // live quote at close
    assert_eq!(hedge_pos.exit_price, 20.0);
}

#[tokio::test]
async fn test_exit_all_keeps_hedges_when_a_sell_close_fails() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    h.engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();

    h.broker.fail_orders_for(&main.trading_symbol);
    let report = h.engine.exit_all(OWNER).await.unwrap();

    assert_eq!(report.sells_closed, 0);
    assert_eq!(report.buys_closed, 0);
    assert!(report.buys_skipped);
    assert_eq!(report.failures.len(), 1);

    // Nothing was closed: the short is still open, so the hedge stays.
    let positions = h.store.all_positions();
    assert!(positions.iter().all(|p| p.status == PositionStatus::Open));
}

#[tokio::test]
async fn test_exit_all_tolerates_stop_loss_cancel_failure() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    h.engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    h.broker.fail_cancels();
    let report = h.engine.exit_all(OWNER).await.unwrap();

    // The cancel failure is swallowed; the close sequence runs regardless.
    assert_eq!(report.sl_cancelled, 0);
    assert_eq!(report.sells_closed, 1);
    assert_eq!(report.buys_closed, 1);
    let positions = h.store.all_positions();
    assert!(positions.iter().all(|p| p.status == PositionStatus::Closed));
}

// ---------------------------------------------------------------------------
// Stop-loss supervisor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_supervisor_pending_status_makes_no_transition() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    h.engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    let writes_before = h.store.write_count();
    let report = h.engine.reconcile_stop_losses().await;

    assert_eq!(report.polled, 1);
    assert_eq!(report.stops_filled, 0);
    assert_eq!(report.cleared, 0);
    assert_eq!(h.store.write_count(), writes_before);
}

#[tokio::test]
async fn test_supervisor_fill_closes_main_and_unwinds_hedge() {
    // §8 scenario: entry 100, SL 25% -> trigger 125.0, limit 135.0;
    // on fill the main closes at 125.0 and the hedge is market-closed.
    let mut prices = scenario_prices();
    prices[2] = (24_800, 100.0); // main leg now collects 100
    let h = harness(&prices).await;

    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    assert_eq!(main.ltp, 100.0);
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();
    assert_eq!(receipt.trigger, 125.0);
    assert_eq!(receipt.limit, 135.0);

    h.broker
        .set_order_status(&receipt.sl_order_id, OrderStatus::Complete);
    let report = h.engine.reconcile_stop_losses().await;

    assert_eq!(
        report,
        ReconcileReport {
            polled: 1,
            stops_filled: 1,
            hedges_closed: 1,
            cleared: 0,
        }
    );

    let positions = h.store.all_positions();
    let main_pos = positions.iter().find(|p| p.side == Side::Sell).unwrap();
    let hedge_pos = positions.iter().find(|p| p.side == Side::Buy).unwrap();
    assert_eq!(main_pos.status, PositionStatus::Closed);
    assert_eq!(main_pos.exit_price, 125.0); // recorded trigger, not live price
    assert!(!main_pos.has_stop_loss());
    assert_eq!(hedge_pos.status, PositionStatus::Closed);
    assert_eq!(hedge_pos.exit_price, 20.0); // live price at unwind

    // The hedge unwind went to the broker as an opposite-side market order.
    let unwind = h.broker.orders().pop().unwrap();
    assert_eq!(unwind.trading_symbol, hedge.trading_symbol);
    assert_eq!(unwind.side, Side::Sell);
    assert_eq!(unwind.order_type, OrderType::Market);
}

#[tokio::test]
async fn test_supervisor_second_pass_is_idempotent() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    h.broker
        .set_order_status(&receipt.sl_order_id, OrderStatus::Complete);
    let first = h.engine.reconcile_stop_losses().await;
    assert_eq!(first.stops_filled, 1);

    let writes_after_first = h.store.write_count();
    let second = h.engine.reconcile_stop_losses().await;
    assert_eq!(second, ReconcileReport::default());
    assert_eq!(h.store.write_count(), writes_after_first);
}

#[tokio::test]
async fn test_supervisor_rejection_clears_reference_without_closing() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();

    h.broker
        .set_order_status(&receipt.sl_order_id, OrderStatus::Rejected);
    let report = h.engine.reconcile_stop_losses().await;
    assert_eq!(report.cleared, 1);
    assert_eq!(report.stops_filled, 0);

    // Back to the no-stop-loss state, position still open: a fresh
    // stop-loss can now be attached.
    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.status, PositionStatus::Open);
    assert!(!pos.has_stop_loss());

    let second = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 50.0)
        .await
        .unwrap();
    assert_eq!(second.trigger, 165.0);
}

#[tokio::test]
async fn test_supervisor_skips_owners_without_session() {
    let h = harness(&scenario_prices()).await;
    let (main, hedge) = h
        .engine
        .select_pair(OWNER, OptionKind::Call, 120.0)
        .await
        .unwrap();
    let outcome = h
        .engine
        .execute_hedged_trade(OWNER, &main, &hedge, 65)
        .await
        .unwrap();
    let receipt = h
        .engine
        .set_stop_loss(OWNER, &outcome.main.order_id, 25.0)
        .await
        .unwrap();
    h.broker
        .set_order_status(&receipt.sl_order_id, OrderStatus::Complete);

    h.engine.logout(OWNER).await;
    let writes_before = h.store.write_count();
    let report = h.engine.reconcile_stop_losses().await;

    // Nothing polled, nothing written; the fill is picked up after the
    // owner logs back in.
    assert_eq!(report, ReconcileReport::default());
    assert_eq!(h.store.write_count(), writes_before);
    let pos = h
        .store
        .position_by_order_id(OWNER, &outcome.main.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pos.status, PositionStatus::Open);
}
