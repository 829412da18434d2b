//! Instrument universe construction.
//!
//! Resolves the current-month future, computes the at-the-money strike,
//! probes forward for the nearest listed expiry, and materializes the
//! active option chain around the ATM strike. The vendor reference key is
//! parsed into an explicit (strike, kind) identity exactly once here;
//! everything downstream works on typed fields.
//!
//! Re-running fully rebuilds the chain from scratch; all failures happen
//! before any session-state write.

use chrono::{Duration, Local, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use tracing::info;

use super::Engine;
use crate::broker::QuoteRequest;
use crate::config::IndexConfig;
use crate::error::{Error, Result, UpstreamDataError};
use crate::store::MasterRow;
use crate::types::{Instrument, OptionKind};

/// How many calendar days ahead to probe for a listed expiry.
pub const EXPIRY_SEARCH_DAYS: i64 = 45;

/// Chain depth in strikes on each side of ATM.
pub const STRIKE_WINDOW: i64 = 20;

/// What a successful chain build resolved.
#[derive(Debug, Clone)]
pub struct ChainSummary {
    pub atm: i64,
    /// Expiry in vendor DDMONYY form, e.g. "13AUG26".
    pub expiry: String,
    pub instruments: usize,
}

impl fmt::Display for ChainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ATM: {} | Exp: {}", self.atm, self.expiry)
    }
}

// ---------------------------------------------------------------------------
// Pure resolution helpers
// ---------------------------------------------------------------------------

/// Trading symbol of the current-month future: index + 2-digit year +
/// 3-letter month + "FUT".
pub fn future_symbol(index: &str, today: NaiveDate) -> String {
    format!(
        "{index}{}{}FUT",
        today.format("%y"),
        today.format("%b").to_string().to_uppercase()
    )
}

/// Vendor date code used inside option reference keys: DDMONYY.
pub fn expiry_code(date: NaiveDate) -> String {
    date.format("%d%b%y").to_string().to_uppercase()
}

/// At-the-money strike: price rounded to the nearest multiple of the strike
/// gap. Ties round to even (banker's), e.g. gap 50: 24875 -> 24900 but
/// 24925 -> 24900 as well.
pub fn atm_strike(price: f64, gap: i64) -> i64 {
    if gap <= 0 {
        return 0;
    }
    let price = Decimal::from_f64(price).unwrap_or_default();
    let gap = Decimal::from(gap);
    ((price / gap).round() * gap).to_i64().unwrap_or(0)
}

/// Probe forward day-by-day for the first date whose ATM call reference key
/// exists in the master set. Returns the vendor expiry code.
pub fn resolve_expiry(
    index: &str,
    atm: i64,
    today: NaiveDate,
    ref_keys: &HashSet<String>,
) -> Option<String> {
    for offset in 0..EXPIRY_SEARCH_DAYS {
        let code = expiry_code(today + Duration::days(offset));
        let probe = format!("{index}{code}{atm}.00CE");
        if ref_keys.contains(&probe) {
            return Some(code);
        }
    }
    None
}

/// Parse the (strike, kind) identity out of a reference key, given the
/// index+expiry prefix. Returns `None` for anything that is not a plain
/// integer-strike option of this expiry (futures, spreads, other expiries).
fn parse_identity(ref_key: &str, prefix: &str) -> Option<(i64, OptionKind)> {
    let tail = ref_key.strip_prefix(prefix)?;
    let (body, kind) = if let Some(body) = tail.strip_suffix("CE") {
        (body, OptionKind::Call)
    } else if let Some(body) = tail.strip_suffix("PE") {
        (body, OptionKind::Put)
    } else {
        return None;
    };
    let strike = body.strip_suffix(".00")?;
    strike.parse::<i64>().ok().map(|s| (s, kind))
}

/// Materialize the active instrument set: options of the resolved expiry
/// whose strikes sit on the gap grid within ±STRIKE_WINDOW of ATM. Live
/// price and OI start zeroed; the quote refresher fills them in.
pub fn build_instruments(
    index: &str,
    rows: &[MasterRow],
    expiry: &str,
    atm: i64,
    gap: i64,
) -> Vec<Instrument> {
    if gap <= 0 {
        return Vec::new();
    }
    let prefix = format!("{index}{expiry}");
    let window = STRIKE_WINDOW * gap;

    rows.iter()
        .filter_map(|row| {
            let ref_key = row.ref_key.trim();
            let (strike, kind) = parse_identity(ref_key, &prefix)?;
            if (strike - atm).abs() > window || (strike - atm) % gap != 0 {
                return None;
            }
            Some(Instrument {
                token: row.token.clone(),
                trading_symbol: row.trading_symbol.trim().to_string(),
                index: index.to_string(),
                kind,
                strike,
                ref_key: ref_key.to_string(),
                ltp: 0.0,
                oi: 0,
            })
        })
        .collect()
}

/// Parse the vendor scrip-master CSV (headerless; token in column 0,
/// trading symbol in column 5, reference key in column 7).
pub(crate) fn parse_master_csv(text: &str) -> Result<Vec<MasterRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let token = record.get(0).unwrap_or("").trim();
        let symbol = record.get(5).unwrap_or("").trim();
        let ref_key = record.get(7).unwrap_or("").trim();
        if token.is_empty() || ref_key.is_empty() {
            continue;
        }
        rows.push(MasterRow {
            token: token.to_string(),
            trading_symbol: symbol.to_string(),
            ref_key: ref_key.to_string(),
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Engine entry points
// ---------------------------------------------------------------------------

impl Engine {
    /// Rebuild the owner's active instrument universe from scratch.
    ///
    /// Replaces the owner's chain and cached ATM strike on success; leaves
    /// both untouched on any failure.
    pub async fn build_chain(&self, owner: i64) -> Result<ChainSummary> {
        let state = self.sessions.owner(owner).await;
        let mut state = state.lock().await;
        let session = state
            .session
            .clone()
            .ok_or_else(|| Error::no_session(owner))?;
        let index = state.index.clone();
        let index_cfg = self.cfg.index(&index)?.clone();

        self.ensure_master(&index, &index_cfg).await?;
        let rows = self.store.master_rows(&index).await?;
        if rows.is_empty() {
            return Err(UpstreamDataError::MasterEmpty(index).into());
        }

        let today = Local::now().date_naive();
        let fut_symbol = future_symbol(&index, today);
        let future = rows
            .iter()
            .find(|r| r.trading_symbol.trim() == fut_symbol)
            .ok_or_else(|| UpstreamDataError::FutureNotFound(fut_symbol.clone()))?;

        let ticks = self
            .broker
            .quotes(
                &session,
                &[QuoteRequest {
                    token: future.token.clone(),
                    exchange: index_cfg.exchange.clone(),
                }],
            )
            .await?;
        let future_ltp = ticks.first().map(|t| t.ltp).unwrap_or(0.0);
        if future_ltp == 0.0 {
            return Err(UpstreamDataError::ZeroPrice(fut_symbol).into());
        }

        let atm = atm_strike(future_ltp, index_cfg.strike_gap);
        let ref_keys: HashSet<String> =
            rows.iter().map(|r| r.ref_key.trim().to_string()).collect();
        let expiry = resolve_expiry(&index, atm, today, &ref_keys).ok_or_else(|| {
            UpstreamDataError::ExpiryNotFound {
                index: index.clone(),
                atm,
                window: EXPIRY_SEARCH_DAYS,
            }
        })?;

        let instruments = build_instruments(&index, &rows, &expiry, atm, index_cfg.strike_gap);
        info!(
            owner,
            index = %index,
            atm,
            expiry = %expiry,
            count = instruments.len(),
            "Chain rebuilt"
        );

        let summary = ChainSummary {
            atm,
            expiry,
            instruments: instruments.len(),
        };
        state.atm = Some(atm);
        state.chain = instruments;
        Ok(summary)
    }

    /// Fetch and cache the master snapshot for an index if it is not
    /// already cached. A no-op once rows exist.
    pub(super) async fn ensure_master(&self, index: &str, cfg: &IndexConfig) -> Result<()> {
        if self.store.master_count(index).await? > 0 {
            return Ok(());
        }

        info!(index, url = %cfg.master_url, "Fetching master snapshot");
        let resp = self.http.get(&cfg.master_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "master feed for {index} returned {status}"
            )));
        }
        let text = resp.text().await?;

        let rows = parse_master_csv(&text)?;
        self.store.replace_master(index, &rows).await?;
        info!(index, rows = rows.len(), "Master snapshot cached");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
