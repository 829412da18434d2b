//! Per-owner session state.
//!
//! The original design kept sessions, settings, and active instruments in
//! ambient shared maps mutated from three threads. Here every owner's state
//! lives behind its own async mutex inside the `SessionManager`, so the
//! interactive handler, the quote-refresh task, and the supervisor get
//! single-writer access per owner and a chain rebuild can never interleave
//! with a quote merge for the same owner.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::broker::BrokerSession;
use crate::error::{Error, Result};
use crate::types::Instrument;

/// Everything the engine tracks for one owner between requests.
#[derive(Debug)]
pub struct OwnerState {
    /// Currently selected index.
    pub index: String,
    /// Cached at-the-money strike from the last chain build.
    pub atm: Option<i64>,
    /// The active instrument universe; empty until a chain is built.
    pub chain: Vec<Instrument>,
    /// Live broker session; `None` before login and after logout.
    pub session: Option<BrokerSession>,
}

impl OwnerState {
    fn new(index: &str) -> Self {
        Self {
            index: index.to_string(),
            atm: None,
            chain: Vec::new(),
            session: None,
        }
    }
}

/// Owns all per-owner state. Cheap to clone handles out of; the outer map
/// lock is held only long enough to fetch or create an owner's entry.
pub struct SessionManager {
    default_index: String,
    owners: RwLock<HashMap<i64, Arc<Mutex<OwnerState>>>>,
}

impl SessionManager {
    pub fn new(default_index: &str) -> Self {
        Self {
            default_index: default_index.to_string(),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch (or lazily create) the state handle for an owner.
    pub async fn owner(&self, owner: i64) -> Arc<Mutex<OwnerState>> {
        if let Some(state) = self.owners.read().await.get(&owner) {
            return state.clone();
        }

        let mut owners = self.owners.write().await;
        owners
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(OwnerState::new(&self.default_index))))
            .clone()
    }

    /// A clone of the owner's broker session, or a configuration error if
    /// they are not logged in.
    pub async fn session(&self, owner: i64) -> Result<BrokerSession> {
        let state = self.owner(owner).await;
        let state = state.lock().await;
        state
            .session
            .clone()
            .ok_or_else(|| Error::no_session(owner))
    }

    /// Drop an owner's broker session (logout). Chain and index survive;
    /// they are rebuilt or reused on the next login.
    pub async fn drop_session(&self, owner: i64) {
        let state = self.owner(owner).await;
        state.lock().await.session = None;
    }

    /// Owners that currently hold a live broker session. The quote-refresh
    /// task iterates this.
    pub async fn logged_in_owners(&self) -> Vec<i64> {
        let handles: Vec<(i64, Arc<Mutex<OwnerState>>)> = {
            let owners = self.owners.read().await;
            owners.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        let mut logged_in = Vec::new();
        for (owner, state) in handles {
            if state.lock().await.session.is_some() {
                logged_in.push(owner);
            }
        }
        logged_in
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
