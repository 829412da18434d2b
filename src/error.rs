//! Typed error taxonomy for the engine.
//!
//! Four families: configuration (missing credentials/session, unknown
//! index), upstream data (the chain cannot be built or a pair cannot be
//! selected from what the feed returned), transport (broker, persistence or
//! HTTP round trip failed), and partial execution (the hedge leg filled but
//! the main leg did not). Transport failures are retryable; the rest are
//! terminal for the action that raised them.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing credentials, unknown index, or no active broker session.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream feed returned data the engine cannot act on.
    #[error(transparent)]
    UpstreamData(#[from] UpstreamDataError),

    /// A broker, persistence, or HTTP round trip failed. Retryable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The hedge (buy) leg filled but the main (sell) leg could not be
    /// placed. The hedge stays open; manual intervention is expected.
    #[error("hedge order {hedge_order_id} filled but main leg failed: {reason}")]
    PartialExecution {
        hedge_order_id: String,
        reason: String,
    },
}

impl Error {
    /// Transport error from anything displayable.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }

    /// Configuration error for an owner with no live broker session.
    pub fn no_session(owner: i64) -> Self {
        Error::Configuration(format!("owner {owner} has no active broker session"))
    }

    /// Whether a retry of the same call could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Transport(format!("request timed out: {err}"))
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Transport(format!("store: {err}"))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Transport(format!("master feed: {err}"))
    }
}

/// Chain-building and pair-selection failures. All occur before any
/// persisted write, so they never leave partial state behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamDataError {
    #[error("no cached master data for {0}")]
    MasterEmpty(String),

    #[error("future contract {0} not found in master data")]
    FutureNotFound(String),

    #[error("future {0} quoted at zero (upstream feed outage)")]
    ZeroPrice(String),

    #[error("no listed expiry within {window} days for {index} at strike {atm}")]
    ExpiryNotFound {
        index: String,
        atm: i64,
        window: i64,
    },

    #[error("no live quotes for the requested option type")]
    NoLiveData,

    #[error("no hedge candidate beyond the main strike")]
    NoHedge,
}
