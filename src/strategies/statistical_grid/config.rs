//! Statistical grid configuration

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Clock the signal cooldown is measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownClock {
    /// Timestamp of the evaluated bar; replays are independent of execution speed
    #[default]
    Bar,
    /// Wall-clock time of the evaluation
    Wall,
}

/// Daily UTC window in which entries lose the time-of-day condition.
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalGridConfig {
    // --- Volatility regime ---
    /// ATR bars in the long baseline (default: 200)
    pub vol_lookback: usize,
    /// ATR bars in the short window (default: 20)
    pub short_atr_window: usize,
    /// Positive ATR values needed before a regime other than NORMAL (default: 60)
    pub min_vol_history: usize,
    /// short/long ratio above which volatility is HIGH (default: 1.3)
    pub high_vol_ratio: f64,
    /// short/long ratio below which volatility is LOW (default: 0.7)
    pub low_vol_ratio: f64,

    // --- Mean reversion ---
    /// Closes in the z-score window (default: 100)
    pub zscore_window: usize,
    /// |z| for a full-strength signal (default: 2.0)
    pub z_strong: f64,
    /// |z| for a half-strength signal (default: 1.5)
    pub z_weak: f64,

    // --- Reversal validity ---
    /// Closes used for the lag-1 return autocorrelation (default: 50)
    pub autocorr_window: usize,
    /// Autocorrelation must be below this (default: -0.10)
    pub autocorr_threshold: f64,

    // --- Grid geometry ---
    /// Bars defining the recent range and the grid center (default: 50)
    pub range_window: usize,
    /// Share of the recent high-low range the grid spans (default: 0.8)
    pub range_fraction: f64,
    /// Minimum span in ATR (default: 6.0)
    pub min_range_atr: f64,
    /// Absolute floor of the span in ATR (default: 4.0)
    pub range_floor_atr: f64,
    /// Levels per side before volatility scaling (default: 10)
    pub grid_levels: usize,
    pub min_levels: usize,
    pub max_levels: usize,
    /// Level count scale in HIGH volatility (default: 0.8)
    pub high_vol_level_factor: f64,
    /// Level count scale in LOW volatility (default: 0.7)
    pub low_vol_level_factor: f64,
    /// Width clamp in ATR (default: 0.4 .. 1.5)
    pub min_width_atr: f64,
    pub max_width_atr: f64,
    /// Levels must stay above recent low * clip_low (default: 0.97)
    pub clip_low: f64,
    /// Levels must stay below recent high * clip_high (default: 1.03)
    pub clip_high: f64,
    /// Explicit support/resistance prices
    pub key_levels: Vec<f64>,
    /// Treat every multiple of this step as a key level (default: none)
    pub round_number_step: Option<f64>,
    /// Distance in grid widths a level keeps from a key level (default: 0.3)
    pub key_level_offset: f64,
    /// Grids with fewer levels on either side are discarded (default: 4)
    pub min_levels_per_side: usize,

    // --- Touch ---
    /// Relative tolerance for a level touch (default: 0.002)
    pub touch_tolerance: f64,
    /// Touch confidence needed to proceed (default: 0.55)
    pub min_touch_confidence: f64,
    /// Relaxed touch confidence once starved (default: 0.45)
    pub starved_touch_confidence: f64,
    /// Consecutive holds after which the engine counts as starved (default: 5)
    pub starvation_bars: usize,

    // --- Edge probability ---
    pub z_edge_cap: f64,
    pub reversal_edge_cap: f64,
    pub grid_edge: f64,
    pub normal_vol_edge: f64,
    pub low_vol_edge: f64,
    pub high_vol_edge: f64,
    pub starvation_bonus: f64,
    /// Edge needed for the probability condition (default: 0.65)
    pub probability_threshold: f64,

    // --- Gate ---
    pub touch_gate: f64,
    pub mean_reversion_gate: f64,
    pub reversal_gate: f64,
    /// Gate conditions that must hold, the touch included (default: 2)
    pub min_conditions: usize,

    // --- Confidence blend ---
    pub grid_weight: f64,
    pub mean_reversion_weight: f64,
    pub edge_weight: f64,

    // --- Timing ---
    /// Minutes between emitted signals (default: 20)
    pub cooldown_minutes: i64,
    pub cooldown_clock: CooldownClock,
    /// UTC window of scheduled volatility (default: 12:25-12:45)
    pub extreme_volatility_window: Option<TimeWindow>,
}

impl Default for StatisticalGridConfig {
    fn default() -> Self {
        Self {
            vol_lookback: 200,
            short_atr_window: 20,
            min_vol_history: 60,
            high_vol_ratio: 1.3,
            low_vol_ratio: 0.7,
            zscore_window: 100,
            z_strong: 2.0,
            z_weak: 1.5,
            autocorr_window: 50,
            autocorr_threshold: -0.10,
            range_window: 50,
            range_fraction: 0.8,
            min_range_atr: 6.0,
            range_floor_atr: 4.0,
            grid_levels: 10,
            min_levels: 6,
            max_levels: 12,
            high_vol_level_factor: 0.8,
            low_vol_level_factor: 0.7,
            min_width_atr: 0.4,
            max_width_atr: 1.5,
            clip_low: 0.97,
            clip_high: 1.03,
            key_levels: Vec::new(),
            round_number_step: None,
            key_level_offset: 0.3,
            min_levels_per_side: 4,
            touch_tolerance: 0.002,
            min_touch_confidence: 0.55,
            starved_touch_confidence: 0.45,
            starvation_bars: 5,
            z_edge_cap: 0.30,
            reversal_edge_cap: 0.20,
            grid_edge: 0.20,
            normal_vol_edge: 0.20,
            low_vol_edge: 0.10,
            high_vol_edge: 0.0,
            starvation_bonus: 0.05,
            probability_threshold: 0.65,
            touch_gate: 0.5,
            mean_reversion_gate: 0.25,
            reversal_gate: 0.15,
            min_conditions: 2,
            grid_weight: 0.4,
            mean_reversion_weight: 0.3,
            edge_weight: 0.3,
            cooldown_minutes: 20,
            cooldown_clock: CooldownClock::Bar,
            extreme_volatility_window: Some(TimeWindow {
                start: hm(12, 25),
                end: hm(12, 45),
            }),
        }
    }
}

impl StatisticalGridConfig {
    /// Stricter reversal filter with larger edge contributions
    pub fn tuned() -> Self {
        Self {
            autocorr_threshold: -0.12,
            z_edge_cap: 0.35,
            reversal_edge_cap: 0.25,
            grid_edge: 0.25,
            ..Self::default()
        }
    }
}
