//! Statistical Grid Strategy
//!
//! Ranging-market signal: a dynamic grid around the recent mean, confirmed by
//! statistical filters.
//!
//! Pipeline per bar:
//! 1. Volatility regime from short vs long ATR
//! 2. Z-score mean reversion and lag-1 return autocorrelation
//! 3. Grid rebuild; an invalid grid holds
//! 4. Nearest touched level on the price's side of the center, gated by touch
//!    confidence (relaxed when starved)
//! 5. Edge probability and five gate conditions, the touch among them; any
//!    `min_conditions` of the five fire
//!
//! The cooldown starts when an entry is actually opened, see
//! [`SignalStrategy::on_entry`]. Bars without an entry count towards
//! starvation, which relaxes the touch gate and adds a small edge bonus.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{CooldownClock, StatisticalGridConfig};
use super::grid::{build_grid, Grid, Touch};
use super::statistics::{mean_reversion, reversal_check, volatility_regime, MeanReversion};
use crate::strategies::{DecisionDetail, MarketContext, SignalStrategy, SignalVote};
use crate::{Signal, VolatilityRegime};

/// Why the grid path held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridHoldReason {
    InvalidGrid,
    NoTouch,
    WeakTouch,
    Cooldown,
    GateNotMet,
    /// The touched layer already holds a position
    LayerOccupied,
    /// Open layers in this direction reached the cap
    LayerCapReached,
}

/// Outcome of the five gate conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConditions {
    pub touch: bool,
    pub mean_reversion: bool,
    pub probability: bool,
    pub reversal: bool,
    pub outside_volatility_window: bool,
}

impl GateConditions {
    pub fn conditions_met(&self) -> usize {
        [
            self.touch,
            self.mean_reversion,
            self.probability,
            self.reversal,
            self.outside_volatility_window,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

/// Diagnostics of one grid evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDecision {
    pub grid: Option<Grid>,
    pub touch: Option<Touch>,
    pub mean_reversion: MeanReversion,
    pub autocorrelation: f64,
    pub reversal_valid: bool,
    pub reversal_score: f64,
    pub edge_probability: f64,
    pub volatility_regime: VolatilityRegime,
    pub conditions: GateConditions,
    /// Bars without an entry before this bar
    pub starved_bars: usize,
    pub hold_reason: Option<GridHoldReason>,
}

impl GridDecision {
    /// Level index of the touched layer
    pub fn level_index(&self) -> Option<usize> {
        self.touch.map(|t| t.level_index)
    }

    pub fn grid_width(&self) -> Option<f64> {
        self.grid.as_ref().map(|g| g.width)
    }
}

pub struct StatisticalGridStrategy {
    name: &'static str,
    config: StatisticalGridConfig,
    last_entry_time: Option<DateTime<Utc>>,
    bars_since_entry: usize,
}

impl StatisticalGridStrategy {
    pub fn new(config: StatisticalGridConfig) -> Self {
        Self::with_name(super::NAME, config)
    }

    pub(crate) fn with_name(name: &'static str, config: StatisticalGridConfig) -> Self {
        Self {
            name,
            config,
            last_entry_time: None,
            bars_since_entry: 0,
        }
    }

    pub fn config(&self) -> &StatisticalGridConfig {
        &self.config
    }

    pub fn starved_bars(&self) -> usize {
        self.bars_since_entry
    }

    fn is_starved(&self) -> bool {
        self.bars_since_entry >= self.config.starvation_bars
    }

    fn clock(&self, bar_time: DateTime<Utc>) -> DateTime<Utc> {
        match self.config.cooldown_clock {
            CooldownClock::Bar => bar_time,
            CooldownClock::Wall => Utc::now(),
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_entry_time
            .is_some_and(|last| now - last < Duration::minutes(self.config.cooldown_minutes))
    }

    fn volatility_edge(&self, regime: VolatilityRegime) -> f64 {
        match regime {
            VolatilityRegime::Normal => self.config.normal_vol_edge,
            VolatilityRegime::Low => self.config.low_vol_edge,
            VolatilityRegime::High => self.config.high_vol_edge,
        }
    }

    /// Sum of the edge contributions for a touch, capped at 1
    fn edge_probability(
        &self,
        signal: Signal,
        mr: &MeanReversion,
        reversal_score: f64,
        regime: VolatilityRegime,
    ) -> f64 {
        let c = &self.config;
        let z_edge = if mr.signal == signal && mr.zscore.abs() > c.z_weak {
            (mr.zscore.abs() / 4.0).min(c.z_edge_cap)
        } else {
            0.0
        };
        let reversal_edge = reversal_score.min(c.reversal_edge_cap);
        let starvation = if self.is_starved() {
            c.starvation_bonus
        } else {
            0.0
        };
        (z_edge + reversal_edge + self.volatility_edge(regime) + c.grid_edge + starvation).min(1.0)
    }

    fn evaluate(&self, ctx: &MarketContext<'_>) -> (Signal, f64, GridDecision) {
        let c = &self.config;
        let closes: Vec<f64> = ctx.bars.iter().map(|b| b.close).collect();
        let atr: Vec<f64> = ctx.indicators.iter().map(|i| i.atr).collect();

        let vol_regime = volatility_regime(&atr, c);
        let mr = mean_reversion(&closes, c);
        let reversal = reversal_check(&closes, c);

        let mut decision = GridDecision {
            grid: None,
            touch: None,
            mean_reversion: mr,
            autocorrelation: reversal.autocorrelation,
            reversal_valid: reversal.valid,
            reversal_score: reversal.score,
            edge_probability: 0.0,
            volatility_regime: vol_regime,
            conditions: GateConditions::default(),
            starved_bars: self.bars_since_entry,
            hold_reason: None,
        };
        let hold = |mut decision: GridDecision, reason| {
            decision.hold_reason = Some(reason);
            (Signal::Hold, 0.0, decision)
        };

        let grid = match build_grid(ctx.bars, ctx.latest().atr, vol_regime, c) {
            Ok(grid) => grid,
            Err(e) => {
                debug!(error = %e, "Grid rejected");
                return hold(decision, GridHoldReason::InvalidGrid);
            }
        };

        let price = ctx.price();
        let touch = grid.find_touch(price, c.touch_tolerance);
        decision.grid = Some(grid);
        let Some(touch) = touch else {
            return hold(decision, GridHoldReason::NoTouch);
        };
        decision.touch = Some(touch);

        if self.in_cooldown(self.clock(ctx.time())) {
            return hold(decision, GridHoldReason::Cooldown);
        }

        let min_touch = if self.is_starved() {
            c.starved_touch_confidence
        } else {
            c.min_touch_confidence
        };
        if touch.confidence < min_touch {
            return hold(decision, GridHoldReason::WeakTouch);
        }

        let signal = match touch.direction {
            crate::Direction::Long => Signal::Buy,
            crate::Direction::Short => Signal::Sell,
        };
        let edge = self.edge_probability(signal, &mr, reversal.score, vol_regime);
        decision.edge_probability = edge;

        let mr_agrees = mr.signal == signal;
        let outside_window = c
            .extreme_volatility_window
            .map_or(true, |w| !w.contains(ctx.time().time()));
        decision.conditions = GateConditions {
            touch: touch.confidence > c.touch_gate,
            mean_reversion: mr_agrees && mr.strength > c.mean_reversion_gate,
            probability: edge > c.probability_threshold,
            reversal: reversal.valid && reversal.score > c.reversal_gate,
            outside_volatility_window: outside_window,
        };

        if decision.conditions.conditions_met() < c.min_conditions {
            return hold(decision, GridHoldReason::GateNotMet);
        }

        let mr_strength = if mr_agrees { mr.strength } else { 0.0 };
        let confidence = (c.grid_weight * touch.confidence
            + c.mean_reversion_weight * mr_strength
            + c.edge_weight * edge)
            .clamp(0.0, 1.0);

        (signal, confidence, decision)
    }
}

impl SignalStrategy for StatisticalGridStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn compute_signal(&mut self, ctx: &MarketContext<'_>) -> SignalVote {
        let (signal, confidence, decision) = self.evaluate(ctx);

        self.bars_since_entry += 1;
        if !signal.is_hold() {
            debug!(
                signal = ?signal,
                level = ?decision.level_index(),
                confidence = format!("{:.3}", confidence),
                edge = format!("{:.3}", decision.edge_probability),
                conditions = decision.conditions.conditions_met(),
                "Grid signal"
            );
        }

        SignalVote {
            signal,
            confidence,
            detail: DecisionDetail::Grid(decision),
        }
    }

    fn on_entry(&mut self, time: DateTime<Utc>) {
        self.last_entry_time = Some(self.clock(time));
        self.bars_since_entry = 0;
    }

    fn required_history(&self) -> usize {
        self.config.range_window.max(self.config.autocorr_window)
    }
}
