//! ADX regime classification
//!
//! Wilder smoothing is the recursive form `s[t] = α·x[t] + (1-α)·s[t-1]` with
//! α = 1/period, seeded with the first observation (no SMA warm-up phase).
//! Every 0/0 along the way resolves to 0 so readings stay inside [0, 100].

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegimeConfig;
use crate::error::{EngineError, EngineResult};
use crate::{Bar, MarketType, TrendDirection, TrendStrength};

// =============================================================================
// Wilder smoothing
// =============================================================================

#[derive(Debug, Clone)]
pub struct WilderSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl WilderSmoother {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 1.0 / period.max(1) as f64,
            value: None,
        }
    }

    pub fn next(&mut self, x: f64) -> f64 {
        let s = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(s);
        s
    }
}

/// Batch Wilder smoothing of a whole series
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut smoother = WilderSmoother::new(period);
    values.iter().map(|&x| smoother.next(x)).collect()
}

// =============================================================================
// Directional movement
// =============================================================================

/// ADX and directional indicators for one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DmiReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    /// Wilder-smoothed true range
    pub atr: f64,
}

fn directional_movement(bar: &Bar, prev: Option<&Bar>) -> (f64, f64, f64) {
    let Some(prev) = prev else {
        return (bar.high - bar.low, 0.0, 0.0);
    };
    let tr = (bar.high - bar.low)
        .max((bar.high - prev.close).abs())
        .max((bar.low - prev.close).abs());
    let up = bar.high - prev.high;
    let down = prev.low - bar.low;
    let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
    let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
    (tr, plus_dm, minus_dm)
}

fn ratio_pct(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        (100.0 * num / den).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn dx(plus_di: f64, minus_di: f64) -> f64 {
    ratio_pct((plus_di - minus_di).abs(), plus_di + minus_di)
}

/// Incremental ADX / +DI / -DI
#[derive(Debug, Clone)]
pub struct DirectionalIndex {
    tr: WilderSmoother,
    plus_dm: WilderSmoother,
    minus_dm: WilderSmoother,
    adx: WilderSmoother,
    prev: Option<Bar>,
}

impl DirectionalIndex {
    pub fn new(period: usize) -> Self {
        Self {
            tr: WilderSmoother::new(period),
            plus_dm: WilderSmoother::new(period),
            minus_dm: WilderSmoother::new(period),
            adx: WilderSmoother::new(period),
            prev: None,
        }
    }

    pub fn next(&mut self, bar: &Bar) -> DmiReading {
        let (tr, pdm, ndm) = directional_movement(bar, self.prev.as_ref());
        let atr = self.tr.next(tr);
        let plus_di = ratio_pct(self.plus_dm.next(pdm), atr);
        let minus_di = ratio_pct(self.minus_dm.next(ndm), atr);
        let adx = self.adx.next(dx(plus_di, minus_di)).clamp(0.0, 100.0);
        self.prev = Some(bar.clone());
        DmiReading {
            adx,
            plus_di,
            minus_di,
            atr,
        }
    }
}

/// Batch ADX / +DI / -DI, one reading per bar
pub fn directional_index(bars: &[Bar], period: usize) -> Vec<DmiReading> {
    let (mut tr, mut pdm, mut ndm) = (
        Vec::with_capacity(bars.len()),
        Vec::with_capacity(bars.len()),
        Vec::with_capacity(bars.len()),
    );
    for (i, bar) in bars.iter().enumerate() {
        let prev = i.checked_sub(1).map(|j| &bars[j]);
        let (t, p, n) = directional_movement(bar, prev);
        tr.push(t);
        pdm.push(p);
        ndm.push(n);
    }

    let atr = wilder_smooth(&tr, period);
    let plus_di: Vec<f64> = wilder_smooth(&pdm, period)
        .iter()
        .zip(&atr)
        .map(|(p, a)| ratio_pct(*p, *a))
        .collect();
    let minus_di: Vec<f64> = wilder_smooth(&ndm, period)
        .iter()
        .zip(&atr)
        .map(|(n, a)| ratio_pct(*n, *a))
        .collect();
    let dx_series: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| dx(*p, *m))
        .collect();
    let adx = wilder_smooth(&dx_series, period);

    (0..bars.len())
        .map(|i| DmiReading {
            adx: adx[i].clamp(0.0, 100.0),
            plus_di: plus_di[i],
            minus_di: minus_di[i],
            atr: atr[i],
        })
        .collect()
}

// =============================================================================
// Classification
// =============================================================================

/// Regime of the latest bar; recomputed every evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub market_type: MarketType,
    pub strength: TrendStrength,
    pub direction: TrendDirection,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify a single reading
    pub fn classify(&self, adx: f64, plus_di: f64, minus_di: f64) -> MarketRegime {
        let c = &self.config;
        let (market_type, strength) = if adx < c.adx_threshold {
            (MarketType::Ranging, TrendStrength::Weak)
        } else if adx >= c.strong_threshold {
            (MarketType::Trending, TrendStrength::Strong)
        } else {
            (MarketType::Trending, TrendStrength::Medium)
        };

        let spread = plus_di - minus_di;
        let direction = if spread > c.direction_tolerance {
            TrendDirection::Bullish
        } else if spread < -c.direction_tolerance {
            TrendDirection::Bearish
        } else {
            TrendDirection::Neutral
        };

        MarketRegime {
            market_type,
            strength,
            direction,
            adx,
            plus_di,
            minus_di,
        }
    }

    /// Compute ADX over `bars` and classify the last bar
    pub fn analyze(&self, bars: &[Bar]) -> EngineResult<MarketRegime> {
        if bars.len() < self.config.min_bars {
            return Err(EngineError::InsufficientData {
                required: self.config.min_bars,
                available: bars.len(),
            });
        }

        let readings = directional_index(bars, self.config.adx_period);
        let last = readings.last().copied().unwrap_or_default();
        let regime = self.classify(last.adx, last.plus_di, last.minus_di);
        debug!(
            adx = format!("{:.2}", regime.adx),
            plus_di = format!("{:.2}", regime.plus_di),
            minus_di = format!("{:.2}", regime.minus_di),
            market = %regime.market_type,
            "Regime classified"
        );
        Ok(regime)
    }
}

/// Human-readable regime summary with a trading suggestion
pub fn market_report(regime: &MarketRegime) -> String {
    let suggestion = match (regime.market_type, regime.strength) {
        (MarketType::Ranging, _) => "Range-bound: two-sided grid, buy low and sell high".to_string(),
        (MarketType::Trending, TrendStrength::Strong) => format!(
            "Strong {} trend: follow it with a trailing stop",
            regime.direction
        ),
        (MarketType::Trending, _) => format!(
            "{} trend starting: light position in the trend direction",
            regime.direction
        ),
    };

    let mut out = String::new();
    out.push_str(&format!("{}\n", "=".repeat(60)));
    out.push_str("MARKET REGIME\n");
    out.push_str(&format!("{}\n", "=".repeat(60)));
    out.push_str(&format!("Market:       {}\n", regime.market_type));
    out.push_str(&format!("Strength:     {}\n", regime.strength));
    out.push_str(&format!("Direction:    {}\n", regime.direction));
    out.push_str(&format!("ADX:          {:.2}\n", regime.adx));
    out.push_str(&format!("+DI / -DI:    {:.2} / {:.2}\n", regime.plus_di, regime.minus_di));
    out.push_str(&format!("Suggestion:   {}\n", suggestion));
    out
}
