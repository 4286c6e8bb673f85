//! Trend voting configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendVotingConfig {
    /// RSI oversold level (default: 35)
    pub rsi_oversold: f64,
    /// RSI overbought level (default: 65)
    pub rsi_overbought: f64,
    /// Bollinger position below which the mean-reversion vote buys (default: 0.2)
    pub bb_buy_position: f64,
    /// Bollinger position above which the mean-reversion vote sells (default: 0.8)
    pub bb_sell_position: f64,
    /// ATR bars averaged for the breakout volatility check (default: 20)
    pub breakout_atr_period: usize,
    /// ATR must exceed its mean times this; never below 0.8 (default: 1.0)
    pub breakout_atr_factor: f64,
    /// %K ceiling for a momentum buy (default: 80)
    pub stoch_overbought: f64,
    /// %K floor for a momentum sell (default: 20)
    pub stoch_oversold: f64,
    /// Require RSI on the right side of 50 for momentum votes (default: false)
    pub momentum_rsi_confirmation: bool,
    /// Vote sum at or above which the signal is BUY (default: 2)
    pub buy_threshold: i32,
    /// Vote sum at or below which the signal is SELL (default: -2)
    pub sell_threshold: i32,
    /// Suppress all votes when volatility has dried up (default: true)
    pub sleep_filter_enabled: bool,
    /// ATR bars in the sleep baseline (default: 20)
    pub sleep_period: usize,
    /// ATR below baseline times this puts the engine to sleep (default: 0.7)
    pub sleep_ratio: f64,
}

impl Default for TrendVotingConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            bb_buy_position: 0.2,
            bb_sell_position: 0.8,
            breakout_atr_period: 20,
            breakout_atr_factor: 1.0,
            stoch_overbought: 80.0,
            stoch_oversold: 20.0,
            momentum_rsi_confirmation: false,
            buy_threshold: 2,
            sell_threshold: -2,
            sleep_filter_enabled: true,
            sleep_period: 20,
            sleep_ratio: 0.7,
        }
    }
}

impl TrendVotingConfig {
    pub fn effective_breakout_factor(&self) -> f64 {
        self.breakout_atr_factor.max(0.8)
    }
}
