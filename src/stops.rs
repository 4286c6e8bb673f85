//! Stop-loss and take-profit management
//!
//! Initial levels:
//! ```text
//! grid  SL = ATR * {1.0 LOW, 1.5 NORMAL, 2.0 HIGH}     TP = max(width * 2.5, ATR * 3)
//! trend SL = ATR * 1.8                                 TP = ATR * 4
//! ```
//!
//! Per bar, for every open position and in this order:
//! 1. Breakeven: at 0.8 ATR in profit the stop moves to entry, once
//! 2. Trailing: beyond 1.2 ATR the stop follows the best price at 1.5 ATR
//! 3. Partial take-profit: half the lot at 80% of the target distance, once
//! 4. Exit when price crosses the stop or the target
//!
//! Stops only ever tighten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StopsConfig;
use crate::{CloseReason, Direction, Position, StopAdjustment, StopAdjustmentKind, VolatilityRegime};

/// Stop and target prices for a new position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialStops {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub stop_distance: f64,
    pub target_distance: f64,
}

impl InitialStops {
    pub fn new(direction: Direction, entry: f64, stop_distance: f64, target_distance: f64) -> Self {
        let sign = direction.sign();
        Self {
            stop_loss: entry - sign * stop_distance,
            take_profit: entry + sign * target_distance,
            stop_distance,
            target_distance,
        }
    }
}

/// Depth-calibrated stop parameters of one grid layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerStops {
    pub level: usize,
    pub depth_ratio: f64,
    pub sl_multiplier: f64,
    pub stop_distance: f64,
    pub target_distance: f64,
    pub lot_multiplier: f64,
    pub risk_reward: f64,
    /// Expected move per unit lot at the assumed win rate, in price units
    pub expected_return: f64,
}

/// What happened to a position during one management pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManageOutcome {
    pub adjustments: Vec<StopAdjustment>,
    /// Lot to close at the partial target
    pub partial_close: Option<f64>,
    pub exit: Option<CloseReason>,
}

#[derive(Debug, Clone)]
pub struct StopsManager {
    config: StopsConfig,
    min_lot: f64,
}

impl StopsManager {
    pub fn new(config: StopsConfig, min_lot: f64) -> Self {
        Self { config, min_lot }
    }

    pub fn config(&self) -> &StopsConfig {
        &self.config
    }

    // =========================================================================
    // Initial levels
    // =========================================================================

    pub fn grid_sl_multiplier(&self, regime: VolatilityRegime) -> f64 {
        match regime {
            VolatilityRegime::Low => self.config.grid_sl_low,
            VolatilityRegime::Normal => self.config.grid_sl_normal,
            VolatilityRegime::High => self.config.grid_sl_high,
        }
    }

    /// (stop distance, target distance) of a grid entry
    pub fn grid_distances(&self, atr: f64, grid_width: f64, regime: VolatilityRegime) -> (f64, f64) {
        let stop = atr * self.grid_sl_multiplier(regime);
        let target = (grid_width * self.config.grid_tp_width_multiplier)
            .max(atr * self.config.grid_tp_atr_multiplier);
        (stop, target)
    }

    /// (stop distance, target distance) of a trend entry
    pub fn trend_distances(&self, atr: f64) -> (f64, f64) {
        (
            atr * self.config.trend_sl_multiplier,
            atr * self.config.trend_tp_multiplier,
        )
    }

    /// Stops scaled by layer depth: deeper layers get wider stops, nearer
    /// targets and larger lots.
    pub fn grid_level_stops(&self, level: usize, levels: usize, grid_width: f64, atr: f64) -> LayerStops {
        let depth_ratio = if levels == 0 {
            0.0
        } else {
            (level as f64 / levels as f64).clamp(0.0, 1.0)
        };
        let sl_multiplier = 1.5 + 0.5 * depth_ratio;
        let stop_distance = atr * sl_multiplier;
        let target_distance = grid_width * (2.5 - 0.5 * depth_ratio);
        let risk_reward = if stop_distance > 0.0 {
            target_distance / stop_distance
        } else {
            0.0
        };
        let win_rate = self.config.assumed_win_rate;
        LayerStops {
            level,
            depth_ratio,
            sl_multiplier,
            stop_distance,
            target_distance,
            lot_multiplier: 1.0 + depth_ratio,
            risk_reward,
            expected_return: win_rate * target_distance - (1.0 - win_rate) * stop_distance,
        }
    }

    /// Depth-calibrated stops for every layer of a grid
    pub fn grid_stop_report(&self, levels: usize, grid_width: f64, atr: f64) -> Vec<LayerStops> {
        (0..levels)
            .map(|level| self.grid_level_stops(level, levels, grid_width, atr))
            .collect()
    }

    // =========================================================================
    // Position management
    // =========================================================================

    /// Move the stop to entry once the trade is `breakeven_trigger` ATR in profit
    pub fn apply_breakeven(
        &self,
        position: &mut Position,
        price: f64,
        atr: f64,
        time: DateTime<Utc>,
    ) -> Option<StopAdjustment> {
        if position.breakeven_triggered || atr <= 0.0 {
            return None;
        }
        if position.favorable_distance(price) < self.config.breakeven_trigger * atr {
            return None;
        }

        position.breakeven_triggered = true;
        let tighter = (position.entry_price - position.stop_loss) * position.direction.sign() > 0.0;
        if !tighter {
            return None;
        }

        let adjustment = StopAdjustment {
            time,
            kind: StopAdjustmentKind::Breakeven,
            old_stop: position.stop_loss,
            new_stop: position.entry_price,
            price,
        };
        position.stop_loss = position.entry_price;
        position.adjustment_history.push(adjustment.clone());
        debug!(id = position.id, stop = position.stop_loss, "Stop moved to breakeven");
        Some(adjustment)
    }

    /// Trail the stop behind the best favourable price; never loosens
    pub fn apply_trailing(
        &self,
        position: &mut Position,
        price: f64,
        atr: f64,
        time: DateTime<Utc>,
    ) -> Option<StopAdjustment> {
        if !self.config.trailing_enabled || atr <= 0.0 {
            return None;
        }
        if position.favorable_distance(price) <= self.config.trailing_min_profit * atr {
            return None;
        }

        let sign = position.direction.sign();
        if (price - position.best_favorable_price) * sign > 0.0 {
            position.best_favorable_price = price;
        }
        let candidate = position.best_favorable_price - sign * self.config.trailing_distance * atr;
        if (candidate - position.stop_loss) * sign <= 0.0 {
            return None;
        }

        let adjustment = StopAdjustment {
            time,
            kind: StopAdjustmentKind::Trailing,
            old_stop: position.stop_loss,
            new_stop: candidate,
            price,
        };
        position.stop_loss = candidate;
        position.trailing_active = true;
        position.adjustment_history.push(adjustment.clone());
        debug!(id = position.id, stop = candidate, "Trailing stop advanced");
        Some(adjustment)
    }

    /// Lot to close at the partial target, if it fires now
    pub fn partial_take_profit(&self, position: &mut Position, price: f64) -> Option<f64> {
        if !self.config.partial_tp_enabled || position.partial_tp_triggered {
            return None;
        }
        let target = position.target_distance();
        if target <= 0.0 || position.favorable_distance(price) < self.config.partial_tp_trigger * target
        {
            return None;
        }

        position.partial_tp_triggered = true;
        let lot = (position.lot_size * self.config.partial_tp_fraction * 100.0).round() / 100.0;
        // Too small to split: keep the whole position for the final target
        (lot >= self.min_lot && position.lot_size - lot >= self.min_lot - 1e-9).then_some(lot)
    }

    /// Exit reason if `price` crossed the target or the stop
    pub fn check_exit(&self, position: &Position, price: f64) -> Option<CloseReason> {
        let sign = position.direction.sign();
        if (price - position.take_profit) * sign >= 0.0 {
            return Some(CloseReason::TakeProfit);
        }
        if (price - position.stop_loss) * sign <= 0.0 {
            let reason = if position.trailing_active {
                CloseReason::TrailingSl
            } else if position.breakeven_triggered {
                CloseReason::BreakevenSl
            } else {
                CloseReason::StopLoss
            };
            return Some(reason);
        }
        None
    }

    /// One management pass over a position at the exit-side `price`
    pub fn manage(
        &self,
        position: &mut Position,
        price: f64,
        atr: f64,
        time: DateTime<Utc>,
    ) -> ManageOutcome {
        let mut outcome = ManageOutcome::default();
        outcome
            .adjustments
            .extend(self.apply_breakeven(position, price, atr, time));
        outcome
            .adjustments
            .extend(self.apply_trailing(position, price, atr, time));
        outcome.partial_close = self.partial_take_profit(position, price);
        outcome.exit = self.check_exit(position, price);
        outcome
    }
}
