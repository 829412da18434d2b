//! Mock broker for integration testing.
//!
//! Deterministic in-memory `Broker` implementation: quotes come from a
//! settable token map, orders are recorded (attempts included, in call
//! order) and assigned sequential ids, and order statuses are scripted
//! from test code. No external dependencies.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use premia::broker::{
    Broker, BrokerSession, Credentials, OrderAck, OrderRequest, OrderType, OrderUpdate,
    QuoteRequest, QuoteTick,
};
use premia::error::{Error, Result};
use premia::types::{OrderStatus, Side};

/// One `place_order` call as the broker saw it.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub trading_symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: i64,
    pub price: f64,
    pub trigger_price: Option<f64>,
    /// False when the call was scripted to fail.
    pub accepted: bool,
}

#[derive(Default)]
pub struct MockBroker {
    quotes: Mutex<HashMap<String, (f64, i64)>>,
    orders: Mutex<Vec<RecordedOrder>>,
    cancels: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, OrderStatus>>,
    fail_symbols: Mutex<HashSet<String>>,
    fail_cancels: Mutex<bool>,
    next_order: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the live quote for a token.
    pub fn set_quote(&self, token: &str, ltp: f64, oi: i64) {
        self.quotes.lock().unwrap().insert(token.to_string(), (ltp, oi));
    }

    /// Make every order on this trading symbol fail.
    pub fn fail_orders_for(&self, trading_symbol: &str) {
        self.fail_symbols
            .lock()
            .unwrap()
            .insert(trading_symbol.to_string());
    }

    /// Make all cancel calls fail.
    pub fn fail_cancels(&self) {
        *self.fail_cancels.lock().unwrap() = true;
    }

    /// Script the status `order_history` reports for an order id.
    pub fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(order_id.to_string(), status);
    }

    /// Every `place_order` call so far, attempts included, in call order.
    pub fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().unwrap().clone()
    }

    /// Every cancelled order id, in call order.
    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn login(&self, _credentials: &Credentials, totp: &str) -> Result<BrokerSession> {
        if totp.is_empty() {
            return Err(Error::Configuration("empty TOTP".to_string()));
        }
        Ok(BrokerSession {
            auth_token: "mock-token".to_string(),
            session_id: "mock-sid".to_string(),
        })
    }

    async fn quotes(
        &self,
        _session: &BrokerSession,
        instruments: &[QuoteRequest],
    ) -> Result<Vec<QuoteTick>> {
        let quotes = self.quotes.lock().unwrap();
        Ok(instruments
            .iter()
            .filter_map(|req| {
                quotes.get(&req.token).map(|&(ltp, oi)| QuoteTick {
                    token: req.token.clone(),
                    ltp,
                    oi,
                })
            })
            .collect())
    }

    async fn place_order(
        &self,
        _session: &BrokerSession,
        order: &OrderRequest,
    ) -> Result<OrderAck> {
        let accepted = !self
            .fail_symbols
            .lock()
            .unwrap()
            .contains(&order.trading_symbol);

        self.orders.lock().unwrap().push(RecordedOrder {
            trading_symbol: order.trading_symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            qty: order.qty,
            price: order.price,
            trigger_price: order.trigger_price,
            accepted,
        });

        if !accepted {
            return Err(Error::transport(format!(
                "RMS rejected {}",
                order.trading_symbol
            )));
        }

        let id = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        let order_id = format!("ORD{id}");
        self.statuses
            .lock()
            .unwrap()
            .insert(order_id.clone(), OrderStatus::Pending);
        Ok(OrderAck { order_id })
    }

    async fn cancel_order(&self, _session: &BrokerSession, order_id: &str) -> Result<()> {
        if *self.fail_cancels.lock().unwrap() {
            return Err(Error::transport("cancel gateway down"));
        }
        self.cancels.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn order_history(
        &self,
        _session: &BrokerSession,
        order_id: &str,
    ) -> Result<Vec<OrderUpdate>> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .map(|status| vec![OrderUpdate { status }])
            .unwrap_or_default())
    }
}
