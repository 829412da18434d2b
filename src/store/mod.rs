//! Persistence layer.
//!
//! Defines the `Store` trait: the capability set the engine consumes over
//! the three collections it owns: users (owner profiles), trades (position
//! records, append-and-update, never deleted), and the per-index master
//! reference snapshot. The SQLite implementation lives in [`sqlite`];
//! integration tests substitute an in-memory one.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Position, Side, UserProfile};

/// One row of the cached exchange master snapshot: just enough to resolve
/// symbols, tokens, and expiries. Live prices never come from here.
#[derive(Debug, Clone)]
pub struct MasterRow {
    pub token: String,
    pub trading_symbol: String,
    pub ref_key: String,
}

/// Abstraction over the persistence store.
#[async_trait]
pub trait Store: Send + Sync {
    // -- users -----------------------------------------------------------

    async fn upsert_user(&self, user: &UserProfile) -> Result<()>;

    async fn find_user(&self, owner: i64) -> Result<Option<UserProfile>>;

    // -- positions -------------------------------------------------------

    /// Insert a new position record; returns the store-assigned id.
    async fn insert_position(&self, position: &Position) -> Result<i64>;

    /// All OPEN positions of one owner.
    async fn open_positions(&self, owner: i64) -> Result<Vec<Position>>;

    /// OPEN positions with a working stop-loss order, across all owners.
    /// This is the supervisor's work queue.
    async fn open_positions_with_stop_loss(&self) -> Result<Vec<Position>>;

    /// OPEN positions of one owner on one side of one index.
    async fn open_positions_by_side(
        &self,
        owner: i64,
        side: Side,
        index: &str,
    ) -> Result<Vec<Position>>;

    /// Look up an owner's position by the entry order's broker id.
    async fn position_by_order_id(&self, owner: i64, order_id: &str)
        -> Result<Option<Position>>;

    /// Transition a position to CLOSED with the given exit price. Also
    /// clears any stop-loss reference: a closed position must never be
    /// polled by the supervisor.
    async fn mark_closed(&self, id: i64, exit_price: f64) -> Result<()>;

    /// Record a working stop-loss order against a position.
    async fn set_stop_loss(&self, id: i64, sl_order_id: &str, trigger: f64) -> Result<()>;

    /// Drop a position's stop-loss reference (order rejected, cancelled,
    /// or filled), returning it to the no-stop-loss state.
    async fn clear_stop_loss(&self, id: i64) -> Result<()>;

    // -- master reference data -------------------------------------------

    /// Replace the cached master snapshot for an index.
    async fn replace_master(&self, index: &str, rows: &[MasterRow]) -> Result<()>;

    async fn master_rows(&self, index: &str) -> Result<Vec<MasterRow>>;

    async fn master_count(&self, index: &str) -> Result<i64>;
}
