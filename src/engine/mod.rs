//! The hedged-order lifecycle engine.
//!
//! `Engine` is the surface the chat frontend drives: login/logout, chain
//! builds, quote refreshes, pair selection, hedged execution, stop-loss
//! management, exit-all, and reports. The background tasks (quote refresh,
//! stop-loss supervisor) run against the same `Engine` behind an `Arc`.
//!
//! Module map: `chain` builds the universe, `quotes` keeps it live,
//! `selector` picks the pair, `executor` talks orders, `supervisor`
//! reconciles stop-losses, `report` computes the P&L/OI summaries.

pub mod chain;
pub mod executor;
pub mod quotes;
pub mod report;
pub mod selector;
pub mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{Broker, Credentials, QuoteRequest};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::session::SessionManager;
use crate::store::Store;
use crate::types::{Instrument, OptionKind, UserProfile};

use self::report::{oi_summary, pnl_report, OiSummary, PnlReport};

/// The engine facade. Construct once, share behind `Arc`.
pub struct Engine {
    cfg: Arc<AppConfig>,
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    sessions: SessionManager,
    /// Plain HTTP client for the master-data feed (not broker-authed).
    http: reqwest::Client,
}

impl Engine {
    pub fn new(
        cfg: AppConfig,
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let sessions = SessionManager::new(&cfg.service.default_index);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.broker.request_timeout_secs))
            .build()?;

        Ok(Self {
            cfg: Arc::new(cfg),
            broker,
            store,
            notifier,
            sessions,
            http,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Order quantity for a number of lots of the given index.
    pub fn quantity_for(&self, index: &str, lots: i64) -> Result<i64> {
        Ok(lots * self.cfg.index(index)?.lot_size)
    }

    // -- users and sessions ----------------------------------------------

    /// Register (or update) an owner's profile and credentials.
    pub async fn register_user(&self, profile: &UserProfile) -> Result<()> {
        self.store.upsert_user(profile).await?;
        info!(owner = profile.owner, "User registered");
        Ok(())
    }

    /// Two-step broker login with the owner's stored credentials, then a
    /// best-effort chain build so the owner lands on a ready universe.
    pub async fn login(&self, owner: i64, totp: &str) -> Result<()> {
        let profile = self
            .store
            .find_user(owner)
            .await?
            .ok_or_else(|| Error::Configuration(format!("owner {owner} is not registered")))?;

        let credentials = Credentials::from_profile(&profile);
        let session = self.broker.login(&credentials, totp).await?;

        {
            let state = self.sessions.owner(owner).await;
            state.lock().await.session = Some(session);
        }
        info!(owner, "Logged in");

        if let Err(e) = self.build_chain(owner).await {
            warn!(owner, error = %e, "Post-login chain build failed");
        }
        Ok(())
    }

    /// Drop the owner's broker session.
    pub async fn logout(&self, owner: i64) {
        self.sessions.drop_session(owner).await;
        info!(owner, "Logged out");
    }

    /// Switch the owner's index. Clears the active chain; if the owner is
    /// logged in, a rebuild for the new index is attempted right away.
    pub async fn set_index(&self, owner: i64, index: &str) -> Result<()> {
        self.cfg.index(index)?; // validate before touching state

        let logged_in = {
            let state = self.sessions.owner(owner).await;
            let mut state = state.lock().await;
            state.index = index.to_string();
            state.atm = None;
            state.chain.clear();
            state.session.is_some()
        };
        info!(owner, index, "Index switched");

        if logged_in {
            if let Err(e) = self.build_chain(owner).await {
                warn!(owner, index, error = %e, "Chain build after index switch failed");
            }
        }
        Ok(())
    }

    // -- selection -------------------------------------------------------

    /// Pick a (main, hedge) pair from the owner's refreshed chain.
    pub async fn select_pair(
        &self,
        owner: i64,
        kind: OptionKind,
        target_premium: f64,
    ) -> Result<(Instrument, Instrument)> {
        self.refresh_owner(owner).await?;

        let state = self.sessions.owner(owner).await;
        let state = state.lock().await;
        let (main, hedge) = selector::select_pair(&state.chain, kind, target_premium)?;
        Ok((main.clone(), hedge.clone()))
    }

    // -- reports ---------------------------------------------------------

    /// Live mark-to-market over the owner's open positions.
    pub async fn pnl(&self, owner: i64) -> Result<PnlReport> {
        let session = self.sessions.session(owner).await?;
        let open = self.store.open_positions(owner).await?;
        if open.is_empty() {
            return Ok(PnlReport::default());
        }

        let mut requests = Vec::with_capacity(open.len());
        for position in &open {
            requests.push(QuoteRequest {
                token: position.token.clone(),
                exchange: self.cfg.index(&position.index)?.exchange.clone(),
            });
        }

        let ticks = self.broker.quotes(&session, &requests).await?;
        let ltp_by_token: HashMap<String, f64> =
            ticks.into_iter().map(|t| (t.token, t.ltp)).collect();

        Ok(pnl_report(&open, &ltp_by_token))
    }

    /// Open-interest support/resistance totals over ±`range` strikes of
    /// the owner's chain, refreshed first.
    pub async fn oi(&self, owner: i64, range: usize) -> Result<OiSummary> {
        self.refresh_owner(owner).await?;

        let state = self.sessions.owner(owner).await;
        let state = state.lock().await;
        Ok(oi_summary(&state.chain, range))
    }

    // -- notifications ---------------------------------------------------

    /// Push a message to the owner, logging (not propagating) delivery
    /// failures: a dead chat must not stall the engine.
    pub(crate) async fn notify_owner(&self, owner: i64, text: &str) {
        if let Err(e) = self.notifier.notify(owner, text).await {
            warn!(owner, error = %e, "Notification failed");
        }
    }
}
