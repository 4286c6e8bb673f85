//! Dynamic grid construction and level touches

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::config::StatisticalGridConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::window_extremes;
use crate::{Bar, Direction, VolatilityRegime};

/// Price grid around the recent mean; rebuilt every bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub center: f64,
    /// Strictly decreasing
    pub buy_levels: Vec<f64>,
    /// Strictly increasing
    pub sell_levels: Vec<f64>,
    pub width: f64,
    pub total_range: f64,
    pub volatility_regime: VolatilityRegime,
    /// Target level count per side after volatility scaling
    pub level_count: usize,
}

/// Number of levels per side for a volatility regime
pub fn level_count(config: &StatisticalGridConfig, regime: VolatilityRegime) -> usize {
    let factor = match regime {
        VolatilityRegime::High => config.high_vol_level_factor,
        VolatilityRegime::Low => config.low_vol_level_factor,
        VolatilityRegime::Normal => 1.0,
    };
    let scaled = (config.grid_levels as f64 * factor).round() as usize;
    scaled.clamp(config.min_levels, config.max_levels.max(config.min_levels))
}

fn key_levels_near(config: &StatisticalGridConfig, price: f64) -> impl Iterator<Item = f64> + '_ {
    let round = config
        .round_number_step
        .filter(|step| *step > 0.0)
        .map(|step| (price / step).round() * step);
    config.key_levels.iter().copied().chain(round)
}

/// Push a level away from any key level closer than `offset`, on its own side
fn snap_level(config: &StatisticalGridConfig, level: f64, offset: f64, direction: Direction) -> f64 {
    let nearest = key_levels_near(config, level)
        .filter(|key| (level - key).abs() < offset)
        .min_by(|a, b| (level - a).abs().total_cmp(&(level - b).abs()));
    match (nearest, direction) {
        (Some(key), Direction::Long) => key - offset,
        (Some(key), Direction::Short) => key + offset,
        (None, _) => level,
    }
}

/// Build the grid for the last bar of `bars`. `atr` is the current ATR.
pub fn build_grid(
    bars: &[Bar],
    atr: f64,
    regime: VolatilityRegime,
    config: &StatisticalGridConfig,
) -> EngineResult<Grid> {
    let invalid = |buy: usize, sell: usize| EngineError::GridConstruction {
        buy_levels: buy,
        sell_levels: sell,
        minimum: config.min_levels_per_side,
    };

    let window = &bars[bars.len().saturating_sub(config.range_window.max(1))..];
    if window.is_empty() || !(atr.is_finite() && atr > 0.0) {
        return Err(invalid(0, 0));
    }
    let (Some((recent_low, _)), Some((_, recent_high))) = (
        window_extremes(window.iter().map(|b| b.low)),
        window_extremes(window.iter().map(|b| b.high)),
    ) else {
        return Err(invalid(0, 0));
    };

    let total_range = (config.range_fraction * (recent_high - recent_low))
        .max(config.min_range_atr * atr)
        .max(config.range_floor_atr * atr);
    let count = level_count(config, regime);
    let width = (total_range / count as f64)
        .clamp(config.min_width_atr * atr, config.max_width_atr * atr);
    if !(width.is_finite() && width > 0.0) {
        return Err(invalid(0, 0));
    }

    let center = window.iter().map(|b| b.close).mean();
    let lower_bound = recent_low * config.clip_low;
    let upper_bound = recent_high * config.clip_high;
    let offset = config.key_level_offset * width;

    let mut buy_levels: Vec<f64> = Vec::with_capacity(count);
    for i in 0..count {
        let level = snap_level(config, center - width * (i + 1) as f64, offset, Direction::Long);
        let descending = buy_levels.last().map_or(level < center, |prev| level < *prev);
        if level < lower_bound || !descending {
            break;
        }
        buy_levels.push(level);
    }

    let mut sell_levels: Vec<f64> = Vec::with_capacity(count);
    for i in 0..count {
        let level = snap_level(config, center + width * (i + 1) as f64, offset, Direction::Short);
        let ascending = sell_levels.last().map_or(level > center, |prev| level > *prev);
        if level > upper_bound || !ascending {
            break;
        }
        sell_levels.push(level);
    }

    if buy_levels.len() < config.min_levels_per_side || sell_levels.len() < config.min_levels_per_side
    {
        return Err(invalid(buy_levels.len(), sell_levels.len()));
    }

    Ok(Grid {
        center,
        buy_levels,
        sell_levels,
        width,
        total_range,
        volatility_regime: regime,
        level_count: count,
    })
}

/// A grid level reached by the current price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Touch {
    pub direction: Direction,
    pub level_index: usize,
    pub level: f64,
    pub confidence: f64,
}

impl Grid {
    /// Touched level nearest to `price`, on the side of the center the price
    /// is on. Buy levels count as touched at or below `level * (1 + tolerance)`,
    /// sell levels at or above `level * (1 - tolerance)`. A price exactly at the
    /// center touches nothing.
    pub fn find_touch(&self, price: f64, tolerance: f64) -> Option<Touch> {
        let (direction, levels) = if price < self.center {
            (Direction::Long, &self.buy_levels)
        } else if price > self.center {
            (Direction::Short, &self.sell_levels)
        } else {
            return None;
        };
        let touched = |level: f64| match direction {
            Direction::Long => price <= level * (1.0 + tolerance),
            Direction::Short => price >= level * (1.0 - tolerance),
        };

        let (level_index, level) = levels
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, level)| touched(*level))
            .min_by(|(_, a), (_, b)| (price - a).abs().total_cmp(&(price - b).abs()))?;

        let proximity = (1.0 - (price - level).abs() / self.width).clamp(0.0, 1.0);
        let depth = level_index as f64 / levels.len() as f64;
        Some(Touch {
            direction,
            level_index,
            level,
            confidence: ((proximity + depth) / 2.0).clamp(0.0, 1.0),
        })
    }
}
