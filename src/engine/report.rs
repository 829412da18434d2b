//! Position and chain reports.
//!
//! Pure computations behind the owner-facing "P&L" and "OI data" actions:
//! live mark-to-market over open positions, and the put-support /
//! call-resistance open-interest totals around the at-the-money strike.

use std::collections::HashMap;

use crate::types::{Instrument, OptionKind, Position, Side};

// ---------------------------------------------------------------------------
// P&L
// ---------------------------------------------------------------------------

/// One open position marked to the live price.
#[derive(Debug, Clone)]
pub struct PnlLine {
    pub trading_symbol: String,
    pub side: Side,
    pub qty: i64,
    pub entry_price: f64,
    pub ltp: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PnlReport {
    pub lines: Vec<PnlLine>,
    pub total: f64,
}

/// Mark every position to the prices in `ltp_by_token`. Tokens missing
/// from the map are marked at 0.0, visibly stale rather than hidden.
pub fn pnl_report(positions: &[Position], ltp_by_token: &HashMap<String, f64>) -> PnlReport {
    let mut report = PnlReport::default();

    for position in positions {
        let ltp = ltp_by_token.get(&position.token).copied().unwrap_or(0.0);
        let qty = position.qty as f64;
        let pnl = match position.side {
            Side::Sell => (position.entry_price - ltp) * qty,
            Side::Buy => (ltp - position.entry_price) * qty,
        };

        report.total += pnl;
        report.lines.push(PnlLine {
            trading_symbol: position.trading_symbol.clone(),
            side: position.side,
            qty: position.qty,
            entry_price: position.entry_price,
            ltp,
            pnl,
        });
    }

    report
}

// ---------------------------------------------------------------------------
// Open interest
// ---------------------------------------------------------------------------

/// Aggregate OI in a ±`range`-strike window around ATM. Put OI below the
/// money reads as support, call OI above as resistance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OiSummary {
    pub range: usize,
    pub put_oi: i64,
    pub call_oi: i64,
}

impl OiSummary {
    /// Positive when put writers dominate (support below the spot).
    pub fn difference(&self) -> i64 {
        self.put_oi - self.call_oi
    }
}

/// Sum open interest over `range` strikes each side of the chain's middle:
/// puts at and below the money, calls at and above.
pub fn oi_summary(chain: &[Instrument], range: usize) -> OiSummary {
    let mut calls: Vec<&Instrument> =
        chain.iter().filter(|i| i.kind == OptionKind::Call).collect();
    let mut puts: Vec<&Instrument> =
        chain.iter().filter(|i| i.kind == OptionKind::Put).collect();
    calls.sort_by_key(|i| i.strike);
    puts.sort_by_key(|i| i.strike);

    let call_oi = {
        let mid = calls.len() / 2;
        let end = (mid + range + 1).min(calls.len());
        calls[mid..end].iter().map(|i| i.oi).sum()
    };
    let put_oi = {
        let mid = puts.len() / 2;
        let start = mid.saturating_sub(range);
        let end = (mid + 1).min(puts.len());
        puts[start..end].iter().map(|i| i.oi).sum()
    };

    OiSummary {
        range,
        put_oi,
        call_oi,
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Compact Indian-market magnitude formatting: crores, lakhs, or grouped
/// units.
pub fn format_compact(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 10_000_000.0 {
        format!("{:.2} Cr", value / 10_000_000.0)
    } else if magnitude >= 100_000.0 {
        format!("{:.2} L", value / 100_000.0)
    } else {
        group_digits(value.round() as i64)
    }
}

fn group_digits(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
