//! Premium-target strike selection.
//!
//! Picks the main (sell) leg closest to the owner's target premium without
//! exceeding it, then a hedge (buy) leg strictly further out-of-the-money
//! whose price sits nearest to 20% of the main premium. The hedge caps the
//! worst-case loss while staying cheap relative to the premium collected.
//!
//! Pure functions over instrument state; no side effects, no orders.

use crate::error::{Result, UpstreamDataError};
use crate::types::{Instrument, OptionKind};

/// Target hedge cost as a fraction of the main leg's premium.
pub const HEDGE_COST_RATIO: f64 = 0.20;

/// Select a (main, hedge) pair for the requested option kind and target
/// premium.
///
/// Main leg: highest-priced instrument at or below the target; if nothing
/// qualifies, the cheapest live instrument of that kind. Hedge leg: among
/// instruments strictly further out-of-the-money than the main (higher
/// strike for calls, lower for puts), the one whose price is closest to
/// `HEDGE_COST_RATIO * main.ltp`, ties to the cheaper candidate.
pub fn select_pair(
    instruments: &[Instrument],
    kind: OptionKind,
    target_premium: f64,
) -> Result<(&Instrument, &Instrument)> {
    let live: Vec<&Instrument> = instruments
        .iter()
        .filter(|i| i.kind == kind && i.ltp > 0.0)
        .collect();

    if live.is_empty() {
        return Err(UpstreamDataError::NoLiveData.into());
    }

    let under_target = live
        .iter()
        .filter(|i| i.ltp <= target_premium)
        .max_by(|a, b| a.ltp.total_cmp(&b.ltp))
        .copied();
    let main = match under_target {
        Some(main) => main,
        // Nothing under the target: fall back to the cheapest available.
        None => live
            .iter()
            .min_by(|a, b| a.ltp.total_cmp(&b.ltp))
            .copied()
            .ok_or(UpstreamDataError::NoLiveData)?,
    };

    let hedge_target = HEDGE_COST_RATIO * main.ltp;
    let hedge = live
        .iter()
        .filter(|i| is_further_otm(i, main, kind))
        .min_by(|a, b| {
            let da = (a.ltp - hedge_target).abs();
            let db = (b.ltp - hedge_target).abs();
            da.total_cmp(&db).then(a.ltp.total_cmp(&b.ltp))
        })
        .copied()
        .ok_or(UpstreamDataError::NoHedge)?;

    Ok((main, hedge))
}

/// Whether `candidate` is strictly further out-of-the-money than `main`.
fn is_further_otm(candidate: &Instrument, main: &Instrument, kind: OptionKind) -> bool {
    match kind {
        OptionKind::Call => candidate.strike > main.strike,
        OptionKind::Put => candidate.strike < main.strike,
        OptionKind::Future => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
