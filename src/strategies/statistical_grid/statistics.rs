//! Statistical filters of the grid engine: volatility regime, z-score mean
//! reversion and lag-1 return autocorrelation.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::config::StatisticalGridConfig;
use crate::indicators::tail_mean;
use crate::{Signal, VolatilityRegime};

/// Classify short-term ATR against its longer baseline.
/// Non-positive ATR values (warm-up rows) are ignored.
pub fn volatility_regime(atr: &[f64], config: &StatisticalGridConfig) -> VolatilityRegime {
    let valid: Vec<f64> = atr
        .iter()
        .copied()
        .filter(|a| a.is_finite() && *a > 0.0)
        .collect();
    if valid.len() < config.min_vol_history.max(1) {
        return VolatilityRegime::Normal;
    }

    let short = tail_mean(&valid, config.short_atr_window.clamp(1, valid.len()));
    let long = tail_mean(&valid, config.vol_lookback.clamp(1, valid.len()));
    let (Some(short), Some(long)) = (short, long) else {
        return VolatilityRegime::Normal;
    };
    if long <= 0.0 {
        return VolatilityRegime::Normal;
    }

    let ratio = short / long;
    if ratio > config.high_vol_ratio {
        VolatilityRegime::High
    } else if ratio < config.low_vol_ratio {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    }
}

/// Z-score reading of the latest close
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanReversion {
    pub zscore: f64,
    /// Direction that bets on a return to the mean
    pub signal: Signal,
    /// In [0, 1]
    pub strength: f64,
}

/// Z-score of the last close over up to `zscore_window` closes
pub fn mean_reversion(closes: &[f64], config: &StatisticalGridConfig) -> MeanReversion {
    let window = &closes[closes.len().saturating_sub(config.zscore_window)..];
    let Some(&price) = window.last() else {
        return MeanReversion::default();
    };
    if window.len() < 2 {
        return MeanReversion::default();
    }

    let mean = window.mean();
    let std = window.std_dev();
    if !std.is_finite() || std <= 0.0 {
        return MeanReversion::default();
    }
    let z = (price - mean) / std;

    let strength = if z.abs() > config.z_strong {
        (z.abs() / 3.0).min(1.0)
    } else if z.abs() > config.z_weak {
        z.abs() / 2.0 * 0.5
    } else {
        return MeanReversion {
            zscore: z,
            ..MeanReversion::default()
        };
    };

    // Fade the extreme
    let signal = if z > 0.0 { Signal::Sell } else { Signal::Buy };
    MeanReversion {
        zscore: z,
        signal,
        strength: strength.clamp(0.0, 1.0),
    }
}

/// Lag-1 Pearson autocorrelation of percentage returns over the last
/// `window` closes. 0 when either leg has no variance.
pub fn lag1_autocorrelation(closes: &[f64], window: usize) -> f64 {
    let window = &closes[closes.len().saturating_sub(window)..];
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 3 {
        return 0.0;
    }

    let lead = &returns[1..];
    let lag = &returns[..returns.len() - 1];
    let std_lead = lead.std_dev();
    let std_lag = lag.std_dev();
    if !(std_lead > 0.0 && std_lag > 0.0) {
        return 0.0;
    }

    let corr = lag.covariance(lead) / (std_lag * std_lead);
    if corr.is_finite() {
        corr.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Whether recent returns alternate enough to trust a reversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReversalCheck {
    pub autocorrelation: f64,
    pub valid: bool,
    /// |autocorrelation| when valid, else 0
    pub score: f64,
}

pub fn reversal_check(closes: &[f64], config: &StatisticalGridConfig) -> ReversalCheck {
    let autocorrelation = lag1_autocorrelation(closes, config.autocorr_window);
    let valid = autocorrelation < config.autocorr_threshold;
    ReversalCheck {
        autocorrelation,
        valid,
        score: if valid { autocorrelation.abs() } else { 0.0 },
    }
}
