//! Broker integration.
//!
//! Defines the `Broker` trait (the full capability set the engine consumes
//! from the trading venue) and provides the REST implementation for the
//! vendor Neo API. Integration tests substitute a deterministic in-memory
//! implementation.

pub mod neo;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Result;
use crate::types::{OrderStatus, Side, UserProfile};

/// Broker login credentials. Secret material stays wrapped until the wire.
pub struct Credentials {
    pub consumer_key: SecretString,
    pub mobile: String,
    pub ucc: String,
    pub mpin: SecretString,
}

impl Credentials {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            consumer_key: SecretString::new(profile.consumer_key.clone()),
            mobile: profile.mobile.clone(),
            ucc: profile.ucc.clone(),
            mpin: SecretString::new(profile.mpin.clone()),
        }
    }
}

/// An authenticated broker session. Lives from login until logout or
/// process restart; never persisted.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    pub auth_token: String,
    pub session_id: String,
}

/// One instrument in a bulk quote request.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub token: String,
    pub exchange: String,
}

/// One instrument's live data in a bulk quote response.
#[derive(Debug, Clone)]
pub struct QuoteTick {
    pub token: String,
    pub ltp: f64,
    pub oi: i64,
}

/// Order flavour on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    StopLoss,
}

impl OrderType {
    pub fn wire_code(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::StopLoss => "SL",
        }
    }
}

/// A new order to place.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub exchange: String,
    pub product: String,
    /// Limit price; 0.0 for market orders.
    pub price: f64,
    pub order_type: OrderType,
    pub qty: i64,
    pub validity: String,
    pub trading_symbol: String,
    pub side: Side,
    /// Stop-loss trigger; only set for `OrderType::StopLoss`.
    pub trigger_price: Option<f64>,
}

impl OrderRequest {
    /// A plain NRML day market order.
    pub fn market(exchange: &str, trading_symbol: &str, side: Side, qty: i64) -> Self {
        Self {
            exchange: exchange.to_string(),
            product: "NRML".to_string(),
            price: 0.0,
            order_type: OrderType::Market,
            qty,
            validity: "DAY".to_string(),
            trading_symbol: trading_symbol.to_string(),
            side,
            trigger_price: None,
        }
    }

    /// A buy-side stop-loss order covering a short leg.
    pub fn stop_loss(
        exchange: &str,
        trading_symbol: &str,
        qty: i64,
        trigger_price: f64,
        limit_price: f64,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            product: "NRML".to_string(),
            price: limit_price,
            order_type: OrderType::StopLoss,
            qty,
            validity: "DAY".to_string(),
            trading_symbol: trading_symbol.to_string(),
            side: Side::Buy,
            trigger_price: Some(trigger_price),
        }
    }
}

/// Broker acknowledgment of a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// One entry of an order's history, newest first.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub status: OrderStatus,
}

/// Abstraction over the trading venue.
///
/// Every call is a bounded round trip; implementations surface timeouts as
/// retryable `Error::Transport`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Two-step TOTP + MPIN login.
    async fn login(&self, credentials: &Credentials, totp: &str) -> Result<BrokerSession>;

    /// Bulk live quotes. Callers must respect the upstream per-call size
    /// limit; the engine batches at [`crate::engine::quotes::QUOTE_BATCH_SIZE`].
    async fn quotes(
        &self,
        session: &BrokerSession,
        instruments: &[QuoteRequest],
    ) -> Result<Vec<QuoteTick>>;

    /// Place an order; returns the broker order id on acceptance.
    async fn place_order(&self, session: &BrokerSession, order: &OrderRequest)
        -> Result<OrderAck>;

    /// Cancel a working order.
    async fn cancel_order(&self, session: &BrokerSession, order_id: &str) -> Result<()>;

    /// Status history for an order, newest first.
    async fn order_history(
        &self,
        session: &BrokerSession,
        order_id: &str,
    ) -> Result<Vec<OrderUpdate>>;
}
