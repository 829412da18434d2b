//! In-memory store for integration testing.
//!
//! Mirrors the SQLite store's semantics (including the "mark_closed clears
//! the stop-loss reference" rule) and counts position writes so tests can
//! assert supervisor idempotence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use premia::error::Result;
use premia::store::{MasterRow, Store};
use premia::types::{Position, PositionStatus, Side, UserProfile};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<i64, UserProfile>>,
    positions: Mutex<Vec<Position>>,
    master: Mutex<HashMap<String, Vec<MasterRow>>>,
    next_id: AtomicI64,
    /// Position-mutating writes (insert, close, set/clear stop-loss).
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.positions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.users.lock().unwrap().insert(user.owner, user.clone());
        Ok(())
    }

    async fn find_user(&self, owner: i64) -> Result<Option<UserProfile>> {
        Ok(self.users.lock().unwrap().get(&owner).cloned())
    }

    async fn insert_position(&self, position: &Position) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = position.clone();
        stored.id = id;
        self.positions.lock().unwrap().push(stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn open_positions(&self, owner: i64) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.owner == owner && p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn open_positions_with_stop_loss(&self) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.status == PositionStatus::Open && p.has_stop_loss())
            .cloned()
            .collect())
    }

    async fn open_positions_by_side(
        &self,
        owner: i64,
        side: Side,
        index: &str,
    ) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| {
                p.owner == owner
                    && p.status == PositionStatus::Open
                    && p.side == side
                    && p.index == index
            })
            .cloned()
            .collect())
    }

    async fn position_by_order_id(
        &self,
        owner: i64,
        order_id: &str,
    ) -> Result<Option<Position>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.owner == owner && p.order_id == order_id)
            .cloned())
    }

    async fn mark_closed(&self, id: i64, exit_price: f64) -> Result<()> {
        let mut positions = self.positions.lock().unwrap();
        if let Some(position) = positions.iter_mut().find(|p| p.id == id) {
            position.status = PositionStatus::Closed;
            position.exit_price = exit_price;
            position.sl_order_id = None;
            position.sl_trigger = 0.0;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_stop_loss(&self, id: i64, sl_order_id: &str, trigger: f64) -> Result<()> {
        let mut positions = self.positions.lock().unwrap();
        if let Some(position) = positions.iter_mut().find(|p| p.id == id) {
            position.sl_order_id = Some(sl_order_id.to_string());
            position.sl_trigger = trigger;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn clear_stop_loss(&self, id: i64) -> Result<()> {
        let mut positions = self.positions.lock().unwrap();
        if let Some(position) = positions.iter_mut().find(|p| p.id == id) {
            position.sl_order_id = None;
            position.sl_trigger = 0.0;
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn replace_master(&self, index: &str, rows: &[MasterRow]) -> Result<()> {
        self.master
            .lock()
            .unwrap()
            .insert(index.to_string(), rows.to_vec());
        Ok(())
    }

    async fn master_rows(&self, index: &str) -> Result<Vec<MasterRow>> {
        Ok(self
            .master
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default())
    }

    async fn master_count(&self, index: &str) -> Result<i64> {
        Ok(self
            .master
            .lock()
            .unwrap()
            .get(index)
            .map(|rows| rows.len() as i64)
            .unwrap_or(0))
    }
}
