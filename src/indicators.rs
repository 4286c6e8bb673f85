//! Technical indicators
//!
//! Two paths produce the same numbers:
//! - batch functions (`sma`, `ema`, `rsi`, ...) that turn a whole series into a
//!   column, used for cold starts and reports;
//! - [`IndicatorState`], which advances every indicator by one closed bar and is
//!   what the simulator and the live session drive.
//!
//! Both feed values through the same `ta` primitives and the same window
//! statistics in the same order, so a series replayed through either path
//! yields identical [`IndicatorSet`] rows.
//!
//! Indicators:
//! - Moving averages: SMA, EMA (seeded with the first value)
//! - Momentum: RSI (simple rolling means of gains and losses), MACD, Momentum, Stochastic
//! - Volatility: Bollinger Bands (sample standard deviation), ATR (simple mean of true range)
//!
//! The ATR here is a plain rolling mean. The regime classifier keeps its own
//! Wilder-smoothed ATR; stop distances are calibrated against this one.

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use ta::indicators::{
    ExponentialMovingAverage, MovingAverageConvergenceDivergence, SimpleMovingAverage,
};
use ta::Next;

use crate::config::IndicatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::regime::{directional_index, DirectionalIndex};
use crate::Bar;

// =============================================================================
// Type Aliases for Complex Return Types
// =============================================================================

/// Type alias for band indicators (upper, middle, lower) or (macd, signal, histogram)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Type alias for two-line indicators (line1, line2)
pub type DualLineOutput = (Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple moving average; `None` until the window is full
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = indicator.next(value);
            (i + 1 >= period).then_some(avg)
        })
        .collect()
}

/// Exponential moving average, α = 2/(period+1), seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values.iter().map(|&v| Some(indicator.next(v))).collect()
}

// =============================================================================
// Volatility Indicators
// =============================================================================

/// True range; undefined on the first bar because there is no previous close
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<Option<f64>> {
    (0..high.len())
        .map(|i| (i > 0).then(|| bar_true_range(high[i], low[i], close[i - 1])))
        .collect()
}

fn bar_true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Average true range as a simple rolling mean of true range
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }

    let mut mean = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; high.len()],
    };

    let mut seen = 0;
    true_range(high, low, close)
        .into_iter()
        .map(|tr| {
            tr.and_then(|tr| {
                seen += 1;
                let avg = mean.next(tr);
                (seen >= period).then_some(avg)
            })
        })
        .collect()
}

/// Sample standard deviation of a window, `None` below two observations
pub fn sample_std(window: &[f64]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let sd = window.std_dev();
    sd.is_finite().then_some(sd)
}

/// Bollinger Bands: SMA middle ± `num_std` sample standard deviations
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    let middle = sma(values, period);
    let mut upper = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, mid) in middle.iter().enumerate() {
        let band = mid.and_then(|_| sample_std(&values[i + 1 - period..=i]));
        match (mid, band) {
            (Some(m), Some(sd)) => {
                upper.push(Some(m + num_std * sd));
                lower.push(Some(m - num_std * sd));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    (upper, middle, lower)
}

// =============================================================================
// Momentum Indicators
// =============================================================================

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// RSI from simple rolling means of gains and losses over `period` changes
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let (mut gains, mut losses) =
        match (SimpleMovingAverage::new(period), SimpleMovingAverage::new(period)) {
            (Ok(g), Ok(l)) => (g, l),
            _ => return vec![None; values.len()],
        };

    let mut result = Vec::with_capacity(values.len());
    result.push(None);
    for (i, pair) in values.windows(2).enumerate() {
        let change = pair[1] - pair[0];
        let avg_gain = gains.next(change.max(0.0));
        let avg_loss = losses.next((-change).max(0.0));
        result.push((i + 1 >= period).then(|| rsi_value(avg_gain, avg_loss)));
    }

    result
}

/// MACD line, signal line and histogram
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> BandOutput {
    if values.is_empty() {
        return (vec![], vec![], vec![]);
    }

    let mut indicator =
        match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
            Ok(i) => i,
            Err(_) => {
                return (
                    vec![None; values.len()],
                    vec![None; values.len()],
                    vec![None; values.len()],
                )
            }
        };

    let mut macd_line = Vec::with_capacity(values.len());
    let mut signal_line = Vec::with_capacity(values.len());
    let mut histogram = Vec::with_capacity(values.len());

    for &value in values {
        let out = indicator.next(value);
        macd_line.push(Some(out.macd));
        signal_line.push(Some(out.signal));
        histogram.push(Some(out.histogram));
    }

    (macd_line, signal_line, histogram)
}

/// close[t] - close[t - period]
pub fn momentum(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| (period > 0 && i >= period).then(|| values[i] - values[i - period]))
        .collect()
}

/// Lowest and highest value of a window
pub fn window_extremes(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    match values.minmax() {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(v) => Some((v, v)),
        MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
    }
}

fn percent_k(close: f64, lows: impl Iterator<Item = f64>, highs: impl Iterator<Item = f64>) -> f64 {
    let (Some((lowest, _)), Some((_, highest))) = (window_extremes(lows), window_extremes(highs))
    else {
        return 0.0;
    };
    let range = highest - lowest;
    if range > 0.0 {
        100.0 * (close - lowest) / range
    } else {
        0.0
    }
}

/// Stochastic %K and %D; %K is 0 when the window has no range
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> DualLineOutput {
    if close.is_empty() || k_period == 0 || d_period == 0 {
        return (vec![], vec![]);
    }

    let mut d_sma = match SimpleMovingAverage::new(d_period) {
        Ok(i) => i,
        Err(_) => return (vec![None; close.len()], vec![None; close.len()]),
    };

    let mut k_values = Vec::with_capacity(close.len());
    let mut d_values = Vec::with_capacity(close.len());
    let mut k_seen = 0;

    for i in 0..close.len() {
        if i + 1 < k_period {
            k_values.push(None);
            d_values.push(None);
            continue;
        }
        let start = i + 1 - k_period;
        let k = percent_k(
            close[i],
            low[start..=i].iter().copied(),
            high[start..=i].iter().copied(),
        );
        k_seen += 1;
        let d = d_sma.next(k);
        k_values.push(Some(k));
        d_values.push((k_seen >= d_period).then_some(d));
    }

    (k_values, d_values)
}

// =============================================================================
// Window helpers
// =============================================================================

/// Mean of the last `n` values, `None` if fewer are available
pub fn tail_mean(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let mean = values[values.len() - n..].mean();
    mean.is_finite().then_some(mean)
}

/// Replace undefined entries with 0
pub fn fill_zero(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(0.0)).collect()
}

// =============================================================================
// Indicator rows
// =============================================================================

/// All indicator values for one bar. Undefined values are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub close: f64,
    pub ema_fast: f64,
    pub ema_medium: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub momentum: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

impl IndicatorSet {
    /// Position of the close inside the Bollinger band, `None` for a zero-width band
    pub fn bb_position(&self) -> Option<f64> {
        let width = self.bb_upper - self.bb_lower;
        (width > 0.0).then(|| (self.close - self.bb_lower) / width)
    }
}

/// Batch computation of indicator rows for a bar series
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    adx_period: usize,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig, adx_period: usize) -> Self {
        Self { config, adx_period }
    }

    /// One row per bar
    pub fn compute(&self, bars: &[Bar]) -> Vec<IndicatorSet> {
        if bars.is_empty() {
            return vec![];
        }

        let c = &self.config;
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();

        let ema_fast = fill_zero(&ema(&close, c.ema_fast));
        let ema_medium = fill_zero(&ema(&close, c.ema_medium));
        let ema_slow = fill_zero(&ema(&close, c.ema_slow));
        let rsi = fill_zero(&rsi(&close, c.rsi_period));
        let (macd_line, signal, hist) = macd(&close, c.macd_fast, c.macd_slow, c.macd_signal);
        let (macd_line, signal, hist) = (fill_zero(&macd_line), fill_zero(&signal), fill_zero(&hist));
        let (upper, middle, lower) = bollinger_bands(&close, c.bb_period, c.bb_std);
        let (upper, middle, lower) = (fill_zero(&upper), fill_zero(&middle), fill_zero(&lower));
        let atr = fill_zero(&atr(&high, &low, &close, c.atr_period));
        let mom = fill_zero(&momentum(&close, c.momentum_period));
        let (k, d) = stochastic(&high, &low, &close, c.stoch_k, c.stoch_d);
        let (k, d) = (fill_zero(&k), fill_zero(&d));
        let dmi = directional_index(bars, self.adx_period);

        (0..bars.len())
            .map(|i| IndicatorSet {
                close: close[i],
                ema_fast: ema_fast[i],
                ema_medium: ema_medium[i],
                ema_slow: ema_slow[i],
                rsi: rsi[i],
                macd: macd_line[i],
                macd_signal: signal[i],
                macd_hist: hist[i],
                bb_upper: upper[i],
                bb_middle: middle[i],
                bb_lower: lower[i],
                atr: atr[i],
                momentum: mom[i],
                stoch_k: k[i],
                stoch_d: d[i],
                adx: dmi[i].adx,
                plus_di: dmi[i].plus_di,
                minus_di: dmi[i].minus_di,
            })
            .collect()
    }
}

// =============================================================================
// Incremental Indicators
// =============================================================================

fn ta_err(e: ta::errors::TaError) -> EngineError {
    EngineError::InvalidConfig(format!("indicator period rejected: {:?}", e))
}

fn push_window(window: &mut VecDeque<f64>, value: f64, len: usize) {
    window.push_back(value);
    while window.len() > len {
        window.pop_front();
    }
}

/// Per-bar indicator state. Each `next` call is O(window) with small fixed
/// windows and never revisits history.
#[derive(Debug, Clone)]
pub struct IndicatorState {
    config: IndicatorConfig,
    ema_fast: ExponentialMovingAverage,
    ema_medium: ExponentialMovingAverage,
    ema_slow: ExponentialMovingAverage,
    macd: MovingAverageConvergenceDivergence,
    gains: SimpleMovingAverage,
    losses: SimpleMovingAverage,
    bb_middle: SimpleMovingAverage,
    bb_window: VecDeque<f64>,
    tr_mean: SimpleMovingAverage,
    closes: VecDeque<f64>,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    k_mean: SimpleMovingAverage,
    dmi: DirectionalIndex,
    prev_close: Option<f64>,
    bars_seen: usize,
    tr_seen: usize,
    k_seen: usize,
}

impl IndicatorState {
    pub fn new(config: &IndicatorConfig, adx_period: usize) -> EngineResult<Self> {
        Ok(Self {
            config: config.clone(),
            ema_fast: ExponentialMovingAverage::new(config.ema_fast).map_err(ta_err)?,
            ema_medium: ExponentialMovingAverage::new(config.ema_medium).map_err(ta_err)?,
            ema_slow: ExponentialMovingAverage::new(config.ema_slow).map_err(ta_err)?,
            macd: MovingAverageConvergenceDivergence::new(
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
            )
            .map_err(ta_err)?,
            gains: SimpleMovingAverage::new(config.rsi_period).map_err(ta_err)?,
            losses: SimpleMovingAverage::new(config.rsi_period).map_err(ta_err)?,
            bb_middle: SimpleMovingAverage::new(config.bb_period).map_err(ta_err)?,
            bb_window: VecDeque::with_capacity(config.bb_period + 1),
            tr_mean: SimpleMovingAverage::new(config.atr_period).map_err(ta_err)?,
            closes: VecDeque::with_capacity(config.momentum_period + 2),
            highs: VecDeque::with_capacity(config.stoch_k + 1),
            lows: VecDeque::with_capacity(config.stoch_k + 1),
            k_mean: SimpleMovingAverage::new(config.stoch_d).map_err(ta_err)?,
            dmi: DirectionalIndex::new(adx_period),
            prev_close: None,
            bars_seen: 0,
            tr_seen: 0,
            k_seen: 0,
        })
    }

    /// Build state by replaying a history, returning the rows produced
    pub fn warm_up(
        config: &IndicatorConfig,
        adx_period: usize,
        bars: &[Bar],
    ) -> EngineResult<(Self, Vec<IndicatorSet>)> {
        let mut state = Self::new(config, adx_period)?;
        let rows = bars.iter().map(|bar| state.next(bar)).collect();
        Ok((state, rows))
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }

    /// Advance every indicator by one closed bar
    pub fn next(&mut self, bar: &Bar) -> IndicatorSet {
        let c = &self.config;
        self.bars_seen += 1;
        let n = self.bars_seen;

        let ema_fast = self.ema_fast.next(bar.close);
        let ema_medium = self.ema_medium.next(bar.close);
        let ema_slow = self.ema_slow.next(bar.close);
        let macd = self.macd.next(bar.close);

        let mut rsi = 0.0;
        let mut atr = 0.0;
        if let Some(prev) = self.prev_close {
            let change = bar.close - prev;
            let avg_gain = self.gains.next(change.max(0.0));
            let avg_loss = self.losses.next((-change).max(0.0));
            if n > c.rsi_period {
                rsi = rsi_value(avg_gain, avg_loss);
            }

            self.tr_seen += 1;
            let avg_tr = self.tr_mean.next(bar_true_range(bar.high, bar.low, prev));
            if self.tr_seen >= c.atr_period {
                atr = avg_tr;
            }
        }

        let middle = self.bb_middle.next(bar.close);
        push_window(&mut self.bb_window, bar.close, c.bb_period);
        let (bb_upper, bb_middle, bb_lower) = if n >= c.bb_period {
            let window: Vec<f64> = self.bb_window.iter().copied().collect();
            match sample_std(&window) {
                Some(sd) => (middle + c.bb_std * sd, middle, middle - c.bb_std * sd),
                None => (0.0, middle, 0.0),
            }
        } else {
            (0.0, 0.0, 0.0)
        };

        push_window(&mut self.closes, bar.close, c.momentum_period + 1);
        let momentum = if n > c.momentum_period {
            self.closes.back().copied().unwrap_or(0.0) - self.closes.front().copied().unwrap_or(0.0)
        } else {
            0.0
        };

        push_window(&mut self.highs, bar.high, c.stoch_k);
        push_window(&mut self.lows, bar.low, c.stoch_k);
        let (stoch_k, stoch_d) = if n >= c.stoch_k {
            let k = percent_k(
                bar.close,
                self.lows.iter().copied(),
                self.highs.iter().copied(),
            );
            self.k_seen += 1;
            let d = self.k_mean.next(k);
            (k, if self.k_seen >= c.stoch_d { d } else { 0.0 })
        } else {
            (0.0, 0.0)
        };

        let dmi = self.dmi.next(bar);
        self.prev_close = Some(bar.close);

        IndicatorSet {
            close: bar.close,
            ema_fast,
            ema_medium,
            ema_slow,
            rsi,
            macd: macd.macd,
            macd_signal: macd.signal,
            macd_hist: macd.histogram,
            bb_upper,
            bb_middle,
            bb_lower,
            atr,
            momentum,
            stoch_k,
            stoch_d,
            adx: dmi.adx,
            plus_di: dmi.plus_di,
            minus_di: dmi.minus_di,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn wave_bars(count: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let x = i as f64;
                let close = 2000.0 + 15.0 * (x / 9.0).sin() + 0.4 * x + 3.0 * (x / 2.3).cos();
                let open = close - 1.5 * (x / 4.0).sin();
                let high = open.max(close) + 2.0 + (x / 5.0).cos().abs();
                let low = open.min(close) - 2.0 - (x / 7.0).sin().abs();
                Bar::new_unchecked(start + Duration::minutes(15 * i as i64), open, high, low, close, 0.0)
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert!((result[2].unwrap() - 2.0).abs() < 0.001);
        assert!((result[3].unwrap() - 3.0).abs() < 0.001);
        assert!((result[4].unwrap() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_ema_is_seeded_with_first_value() {
        let values = vec![10.0, 11.0, 12.0];
        let result = ema(&values, 3);
        // alpha = 0.5
        assert_relative_eq!(result[0].unwrap(), 10.0);
        assert_relative_eq!(result[1].unwrap(), 10.5);
        assert_relative_eq!(result[2].unwrap(), 11.25);
    }

    #[test]
    fn test_rsi_uses_simple_means() {
        let values = vec![10.0, 11.0, 10.0, 12.0, 11.0];
        let result = rsi(&values, 2);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // changes +1, -1: gain 0.5, loss 0.5
        assert_relative_eq!(result[2].unwrap(), 50.0);
        // changes -1, +2: gain 1.0, loss 0.5
        assert_relative_eq!(result[3].unwrap(), 100.0 - 100.0 / 3.0);
    }

    #[test]
    fn test_rsi_no_losses_is_100() {
        let values: Vec<f64> = (0..20).map(|x| 100.0 + x as f64).collect();
        let result = rsi(&values, 14);
        assert_relative_eq!(result[19].unwrap(), 100.0);
    }

    #[test]
    fn test_atr_is_simple_mean_and_skips_first_bar() {
        let high = vec![10.0, 11.0, 12.0, 11.5];
        let low = vec![9.0, 10.0, 11.0, 10.5];
        let close = vec![9.5, 10.5, 11.5, 11.0];
        let result = atr(&high, &low, &close, 2);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // TR1 = max(1, 1.5, 0.5) = 1.5, TR2 = max(1, 1.5, 0.5) = 1.5
        assert_relative_eq!(result[2].unwrap(), 1.5);
        // TR3 = max(1, 0, 1) = 1.0
        assert_relative_eq!(result[3].unwrap(), 1.25);
    }

    #[test]
    fn test_bollinger_uses_sample_std() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let (upper, middle, lower) = bollinger_bands(&values, 4, 2.0);
        let sd = (5.0f64 / 3.0).sqrt();
        assert_relative_eq!(middle[3].unwrap(), 2.5);
        assert_relative_eq!(upper[3].unwrap(), 2.5 + 2.0 * sd, epsilon = 1e-12);
        assert_relative_eq!(lower[3].unwrap(), 2.5 - 2.0 * sd, epsilon = 1e-12);
        assert_eq!(upper[2], None);
    }

    #[test]
    fn test_momentum() {
        let values = vec![1.0, 2.0, 4.0, 7.0];
        let result = momentum(&values, 2);
        assert_eq!(result, vec![None, None, Some(3.0), Some(5.0)]);
    }

    #[test]
    fn test_stochastic_flat_window_is_zero() {
        let flat = vec![5.0; 6];
        let (k, d) = stochastic(&flat, &flat, &flat, 3, 2);
        assert_eq!(k[2], Some(0.0));
        assert_eq!(d[2], None);
        assert_eq!(d[3], Some(0.0));
    }

    #[test]
    fn test_stochastic_range() {
        let high = vec![5.0, 6.0, 7.0, 8.0, 9.0, 8.0, 7.0, 8.0, 9.0, 10.0];
        let low = vec![4.0, 5.0, 6.0, 7.0, 8.0, 7.0, 6.0, 7.0, 8.0, 9.0];
        let close = vec![4.5, 5.5, 6.5, 7.5, 8.5, 7.5, 6.5, 7.5, 8.5, 9.5];
        let (k, d) = stochastic(&high, &low, &close, 5, 3);
        let k_val = k.last().unwrap().unwrap();
        assert!((0.0..=100.0).contains(&k_val));
        assert!(d.last().unwrap().is_some());
    }

    #[test]
    fn test_macd_histogram() {
        let values: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        let (line, signal, hist) = macd(&values, 12, 26, 9);
        let (l, s, h) = (line[49].unwrap(), signal[49].unwrap(), hist[49].unwrap());
        assert_relative_eq!(h, l - s, epsilon = 1e-12);
        assert!(l > 0.0);
    }

    #[test]
    fn test_incremental_matches_batch() {
        let bars = wave_bars(260);
        let config = IndicatorConfig::default();
        let batch = IndicatorEngine::new(config.clone(), 14).compute(&bars);
        let (_, incremental) = IndicatorState::warm_up(&config, 14, &bars).unwrap();

        assert_eq!(batch.len(), incremental.len());
        for (b, s) in batch.iter().zip(&incremental) {
            assert_eq!(b, s);
        }
    }

    #[test]
    fn test_rows_never_contain_nan() {
        let bars = wave_bars(40);
        let rows = IndicatorEngine::new(IndicatorConfig::default(), 14).compute(&bars);
        for row in &rows {
            for v in [
                row.ema_fast, row.rsi, row.macd, row.bb_upper, row.bb_lower, row.atr,
                row.momentum, row.stoch_k, row.stoch_d, row.adx, row.plus_di, row.minus_di,
            ] {
                assert!(v.is_finite());
            }
        }
        // slow windows are still undefined after 40 bars
        assert_eq!(rows[10].atr, 0.0);
        assert!(rows[39].atr > 0.0);
    }

    #[test]
    fn test_bb_position() {
        let row = IndicatorSet {
            close: 105.0,
            bb_upper: 110.0,
            bb_lower: 100.0,
            ..Default::default()
        };
        assert_relative_eq!(row.bb_position().unwrap(), 0.5);
        let flat = IndicatorSet::default();
        assert_eq!(flat.bb_position(), None);
    }
}
