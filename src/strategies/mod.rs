//! Signal strategies
//!
//! Every regime-specific signal source implements [`SignalStrategy`]. The
//! decision manager holds one strategy per regime, created by name from the
//! registry, so strategy variants are chosen in configuration instead of by
//! editing the pipeline.

pub mod statistical_grid;
pub mod trend_voting;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::config::StrategySlot;
use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorSet;
use crate::regime::MarketRegime;
use crate::{Bar, Signal};

pub use statistical_grid::{GridDecision, GridHoldReason};
pub use trend_voting::{TrendDecision, Vote};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Everything a strategy may look at for one evaluation.
/// `bars` and `indicators` are aligned row for row and end at the current bar.
#[derive(Debug, Clone, Copy)]
pub struct MarketContext<'a> {
    pub bars: &'a [Bar],
    pub indicators: &'a [IndicatorSet],
    pub regime: &'a MarketRegime,
}

impl<'a> MarketContext<'a> {
    pub fn new(bars: &'a [Bar], indicators: &'a [IndicatorSet], regime: &'a MarketRegime) -> Self {
        Self {
            bars,
            indicators,
            regime,
        }
    }

    /// Callers guarantee at least one row
    pub fn latest(&self) -> &IndicatorSet {
        &self.indicators[self.indicators.len() - 1]
    }

    pub fn latest_bar(&self) -> &Bar {
        &self.bars[self.bars.len() - 1]
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.latest_bar().time
    }

    pub fn price(&self) -> f64 {
        self.latest_bar().close
    }
}

/// Diagnostics of the path that produced a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecisionDetail {
    Grid(GridDecision),
    Trend(TrendDecision),
}

/// A strategy's answer for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalVote {
    pub signal: Signal,
    /// In [0, 1]
    pub confidence: f64,
    pub detail: DecisionDetail,
}

// =============================================================================
// Strategy Trait
// =============================================================================

pub trait SignalStrategy: Send {
    /// Registry name of this strategy
    fn name(&self) -> &'static str;

    /// Produce a vote for the last bar of `ctx`. May update internal
    /// bookkeeping such as cooldown timers.
    fn compute_signal(&mut self, ctx: &MarketContext<'_>) -> SignalVote;

    /// Called once a position opened from this strategy's signal
    fn on_entry(&mut self, _time: DateTime<Utc>) {}

    /// Bars of history this strategy needs before its output is meaningful
    fn required_history(&self) -> usize {
        0
    }
}

// =============================================================================
// Strategy Registry
// =============================================================================

/// Factory function type for creating strategies from a configuration slot
pub type StrategyFactory = fn(&StrategySlot) -> EngineResult<Box<dyn SignalStrategy>>;

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(
            statistical_grid::NAME,
            statistical_grid::create as StrategyFactory,
        );
        map.insert(
            statistical_grid::TUNED_NAME,
            statistical_grid::create_tuned as StrategyFactory,
        );
        map.insert(trend_voting::NAME, trend_voting::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create a strategy from its configuration slot
pub fn create_strategy(slot: &StrategySlot) -> EngineResult<Box<dyn SignalStrategy>> {
    let registry = get_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner);

    let factory = registry.get(slot.name.as_str()).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        EngineError::UnknownStrategy {
            name: slot.name.clone(),
            available: available.join(", "),
        }
    })?;

    factory(slot)
}

/// Get list of available strategy names
pub fn available_strategies() -> Vec<&'static str> {
    let mut names: Vec<_> = get_registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .copied()
        .collect();
    names.sort_unstable();
    names
}

/// Overlay `params` on top of a serialized base configuration
pub(crate) fn merge_params(base: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
    match (base, params) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                base.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(base)
        }
        (base, _) => base,
    }
}
