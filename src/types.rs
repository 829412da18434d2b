//! Shared types for the PREMIA engine.
//!
//! These types form the data model used across all modules: the tradable
//! instrument universe, persisted positions, and the broker-facing enums.
//! They are designed to be stable so that broker, store, and engine modules
//! can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Which kind of contract an instrument is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
    Future,
}

impl OptionKind {
    /// The suffix the vendor reference key carries for this kind
    /// (options only).
    pub fn ref_suffix(&self) -> &'static str {
        match self {
            OptionKind::Call => "CE",
            OptionKind::Put => "PE",
            OptionKind::Future => "FUT",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ref_suffix())
    }
}

impl std::str::FromStr for OptionKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CE" | "CALL" => Ok(OptionKind::Call),
            "PE" | "PUT" => Ok(OptionKind::Put),
            "FUT" | "FUTURE" => Ok(OptionKind::Future),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown option kind: {other}"
            ))),
        }
    }
}

/// One tradable contract in the active universe.
///
/// Rebuilt wholesale whenever the chain is regenerated; `ltp` and `oi` are
/// the only fields the quote refresher mutates in place. The vendor
/// reference key is parsed into `kind`/`strike` exactly once at build time;
/// nothing downstream scans strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange token, unique per contract.
    pub token: String,
    /// Symbol orders are placed against.
    pub trading_symbol: String,
    /// Underlying index name ("NIFTY", "SENSEX").
    pub index: String,
    pub kind: OptionKind,
    pub strike: i64,
    /// Vendor reference key the identity was parsed from.
    pub ref_key: String,
    /// Last traded price; 0.0 until the first quote merge, and again
    /// whenever the contract goes missing from a quote response (stale).
    pub ltp: f64,
    /// Open interest; same staleness rules as `ltp`.
    pub oi: i64,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {:.2} (OI {})",
            self.trading_symbol, self.strike, self.kind, self.ltp, self.oi
        )
    }
}

impl Instrument {
    /// Helper to build a test instrument with sensible defaults.
    #[cfg(test)]
    pub fn sample(kind: OptionKind, strike: i64, ltp: f64) -> Self {
        Instrument {
            token: format!("tok-{strike}-{kind}"),
            trading_symbol: format!("NIFTY26AUG{strike}{kind}"),
            index: "NIFTY".to_string(),
            kind,
            strike,
            ref_key: format!("NIFTY07AUG26{strike}.00{kind}"),
            ltp,
            oi: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders and positions
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened on this side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown side: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a persisted position. Closed positions remain in the
/// store as history; nothing is ever deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

impl std::str::FromStr for PositionStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown position status: {other}"
            ))),
        }
    }
}

/// A persisted trade leg.
///
/// Invariant: `sl_order_id` is non-empty only while `status == Open` and
/// `side == Sell`. It is cleared on stop-loss fill, rejection, cancellation,
/// and when the position is closed, so the supervisor never polls a stale
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Store-assigned id; 0 before the first insert.
    pub id: i64,
    /// Owner chat id.
    pub owner: i64,
    pub index: String,
    pub trading_symbol: String,
    pub token: String,
    pub kind: OptionKind,
    pub side: Side,
    pub qty: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub status: PositionStatus,
    /// Broker order id of the entry order.
    pub order_id: String,
    /// Broker order id of the active stop-loss order, if one is working.
    pub sl_order_id: Option<String>,
    /// Trigger price of the active stop-loss order; 0.0 when none.
    pub sl_trigger: f64,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// A freshly opened leg, before any stop-loss is attached.
    pub fn open(
        owner: i64,
        index: &str,
        instrument: &Instrument,
        side: Side,
        qty: i64,
        entry_price: f64,
        order_id: &str,
    ) -> Self {
        Position {
            id: 0,
            owner,
            index: index.to_string(),
            trading_symbol: instrument.trading_symbol.clone(),
            token: instrument.token.clone(),
            kind: instrument.kind,
            side,
            qty,
            entry_price,
            exit_price: 0.0,
            status: PositionStatus::Open,
            order_id: order_id.to_string(),
            sl_order_id: None,
            sl_trigger: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Whether a stop-loss order is currently working for this leg.
    pub fn has_stop_loss(&self) -> bool {
        self.sl_order_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Broker-reported status of an order, normalised from vendor text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Complete,
    Rejected,
    Cancelled,
    Other(String),
}

impl OrderStatus {
    /// Normalise a vendor status string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "COMPLETE" | "FILLED" => OrderStatus::Complete,
            "REJECTED" => OrderStatus::Rejected,
            "CANCELLED" | "CANCELED" => OrderStatus::Cancelled,
            "PENDING" | "OPEN" | "TRIGGER PENDING" => OrderStatus::Pending,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A registered owner and their broker credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Chat id; doubles as the owner key everywhere.
    pub owner: i64,
    pub name: String,
    pub consumer_key: String,
    pub mobile: String,
    /// Unique client code at the broker.
    pub ucc: String,
    pub mpin: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
