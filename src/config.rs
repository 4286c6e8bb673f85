//! Configuration management
//!
//! One immutable `Config` value is loaded from JSON once and handed to every
//! component constructor. Strategy parameters stay as raw JSON inside their
//! slot and are parsed by the strategy factory that owns them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::EngineError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trading: TradingConfig,
    pub indicators: IndicatorConfig,
    pub regime: RegimeConfig,
    pub strategies: StrategiesConfig,
    pub executor: ExecutorConfig,
    pub stops: StopsConfig,
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate().context("Configuration rejected")?;
        Ok(config)
    }

    /// Range checks that serde cannot express
    pub fn validate(&self) -> Result<(), EngineError> {
        let t = &self.trading;
        check(t.initial_capital > 0.0, "trading.initial_capital must be > 0")?;
        check(t.spread >= 0.0, "trading.spread must be >= 0")?;
        check(t.contract_size > 0.0, "trading.contract_size must be > 0")?;
        check(
            t.min_lot > 0.0 && t.min_lot <= t.max_lot,
            "trading.min_lot must be > 0 and <= max_lot",
        )?;
        check(t.max_positions > 0, "trading.max_positions must be > 0")?;
        check(
            (0.0..1.0).contains(&t.risk_per_trade),
            "trading.risk_per_trade must be in [0, 1)",
        )?;
        check(
            t.daily_loss_limit > 0.0 && t.max_drawdown > 0.0,
            "trading loss limits must be > 0",
        )?;

        let i = &self.indicators;
        let periods = [
            i.ema_fast,
            i.ema_medium,
            i.ema_slow,
            i.rsi_period,
            i.macd_fast,
            i.macd_slow,
            i.macd_signal,
            i.bb_period,
            i.atr_period,
            i.momentum_period,
            i.stoch_k,
            i.stoch_d,
        ];
        check(
            periods.iter().all(|p| *p > 0),
            "indicator periods must be > 0",
        )?;
        check(i.bb_period >= 2, "indicators.bb_period must be >= 2")?;

        let r = &self.regime;
        check(r.adx_period > 0, "regime.adx_period must be > 0")?;
        check(
            r.adx_threshold < r.strong_threshold,
            "regime.adx_threshold must be below strong_threshold",
        )?;
        check(
            r.min_history >= r.min_bars,
            "regime.min_history must be >= regime.min_bars",
        )?;
        check(
            r.max_history >= r.min_history,
            "regime.max_history must be >= regime.min_history",
        )?;

        let e = &self.executor;
        check(e.max_layers_per_side > 0, "executor.max_layers_per_side must be > 0")?;
        check(e.base_lot > 0.0, "executor.base_lot must be > 0")?;
        check(
            e.balance_per_lot > 0.0,
            "executor.balance_per_lot must be > 0",
        )?;
        check(
            !e.loss_streak_factors.is_empty() && !e.win_streak_factors.is_empty(),
            "executor streak factor tables must not be empty",
        )?;

        let s = &self.stops;
        check(
            s.partial_tp_trigger > 0.0 && s.partial_tp_trigger < 1.0,
            "stops.partial_tp_trigger must be in (0, 1)",
        )?;
        check(
            s.partial_tp_fraction > 0.0 && s.partial_tp_fraction < 1.0,
            "stops.partial_tp_fraction must be in (0, 1)",
        )?;

        check(
            self.backtest.warmup_bars >= r.min_history,
            "backtest.warmup_bars must cover regime.min_history",
        )?;
        check(
            self.backtest.equity_sample_interval > 0,
            "backtest.equity_sample_interval must be > 0",
        )?;

        Ok(())
    }
}

fn check(ok: bool, message: &str) -> Result<(), EngineError> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(message.to_string()))
    }
}

/// Instrument, account and account-level risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    /// Bar period in minutes
    pub timeframe_minutes: u32,
    pub initial_capital: f64,
    /// Full bid/ask spread in price units, charged half on entry and half on exit
    pub spread: f64,
    /// Units per lot (100 oz for gold)
    pub contract_size: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    /// Maximum simultaneously open positions across both directions
    pub max_positions: usize,
    /// Fraction of balance risked per trend trade (default: 0.015)
    pub risk_per_trade: f64,
    /// Fraction of the day's starting balance that halts new entries (default: 0.08)
    pub daily_loss_limit: f64,
    /// Drawdown from peak that halts new entries (default: 0.20)
    pub max_drawdown: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: "XAUUSD".to_string(),
            timeframe_minutes: 15,
            initial_capital: 10_000.0,
            spread: 0.3,
            contract_size: 100.0,
            min_lot: 0.01,
            max_lot: 1.0,
            max_positions: 8,
            risk_per_trade: 0.015,
            daily_loss_limit: 0.08,
            max_drawdown: 0.20,
        }
    }
}

/// Indicator periods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Fast EMA period (default: 15)
    pub ema_fast: usize,
    /// Medium EMA period (default: 40)
    pub ema_medium: usize,
    /// Slow EMA period (default: 150)
    pub ema_slow: usize,
    /// RSI period (default: 14)
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Bollinger period (default: 20)
    pub bb_period: usize,
    /// Bollinger band width in standard deviations (default: 1.9)
    pub bb_std: f64,
    /// ATR period (default: 14)
    pub atr_period: usize,
    /// Momentum lookback (default: 10)
    pub momentum_period: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            ema_fast: 15,
            ema_medium: 40,
            ema_slow: 150,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 1.9,
            atr_period: 14,
            momentum_period: 10,
            stoch_k: 14,
            stoch_d: 3,
        }
    }
}

/// ADX regime classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Wilder period for ATR, DI and ADX (default: 14)
    pub adx_period: usize,
    /// ADX below this is ranging (default: 20.0)
    pub adx_threshold: f64,
    /// ADX at or above this is a strong trend (default: 40.0)
    pub strong_threshold: f64,
    /// DI spread needed to call a direction (default: 3.0)
    pub direction_tolerance: f64,
    /// Bars before the classifier runs at all (default: 30)
    pub min_bars: usize,
    /// Bars before the decision pipeline trusts the classification (default: 80)
    pub min_history: usize,
    /// Trailing bars handed to strategies on each evaluation (default: 500)
    pub max_history: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            adx_period: 14,
            adx_threshold: 20.0,
            strong_threshold: 40.0,
            direction_tolerance: 3.0,
            min_bars: 30,
            min_history: 80,
            max_history: 500,
        }
    }
}

/// A named strategy plus its free-form parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySlot {
    pub name: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

impl StrategySlot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: empty_params(),
        }
    }
}

/// Which signal strategy runs in each regime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub ranging: StrategySlot,
    pub trending: StrategySlot,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        StrategiesConfig {
            ranging: StrategySlot::new("statistical_grid"),
            trending: StrategySlot::new("trend_voting"),
        }
    }
}

/// Grid layer allocation and streak-adaptive sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Lot for the first layer at full confidence (default: 0.01)
    pub base_lot: f64,
    /// Open layers allowed per direction (default: 4)
    pub max_layers_per_side: usize,
    /// Extra size per layer index (default: 0.35)
    pub layer_size_step: f64,
    /// Balance required per lot; caps size at balance / this (default: 4000)
    pub balance_per_lot: f64,
    /// Multipliers for 0, 1, 2 and 3+ consecutive losses
    pub loss_streak_factors: Vec<f64>,
    /// Multipliers for 0, 1, 2 and 3+ consecutive wins
    pub win_streak_factors: Vec<f64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            base_lot: 0.01,
            max_layers_per_side: 4,
            layer_size_step: 0.35,
            balance_per_lot: 4000.0,
            loss_streak_factors: vec![1.0, 0.85, 0.70, 0.55],
            win_streak_factors: vec![1.0, 1.05, 1.10, 1.15],
        }
    }
}

/// How grid entries derive their stop and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridStopMode {
    /// Stop multiplier from the volatility regime
    #[default]
    Regime,
    /// Stop, target and lot scaled by layer depth
    DepthCalibrated,
}

/// Stop-loss, take-profit and position management parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopsConfig {
    pub grid_stop_mode: GridStopMode,
    /// Grid stop ATR multiples per volatility regime
    pub grid_sl_low: f64,
    pub grid_sl_normal: f64,
    pub grid_sl_high: f64,
    /// Grid target as a multiple of grid width (default: 2.5)
    pub grid_tp_width_multiplier: f64,
    /// Grid target floor as a multiple of ATR (default: 3.0)
    pub grid_tp_atr_multiplier: f64,
    /// Trend stop ATR multiple (default: 1.8)
    pub trend_sl_multiplier: f64,
    /// Trend target ATR multiple (default: 4.0)
    pub trend_tp_multiplier: f64,
    /// Favourable move in ATR that moves the stop to entry (default: 0.8)
    pub breakeven_trigger: f64,
    pub trailing_enabled: bool,
    /// Favourable move in ATR before trailing engages (default: 1.2)
    pub trailing_min_profit: f64,
    /// Trailing distance behind the best price in ATR (default: 1.5)
    pub trailing_distance: f64,
    pub partial_tp_enabled: bool,
    /// Fraction of the target distance that triggers the partial close (default: 0.8)
    pub partial_tp_trigger: f64,
    /// Fraction of the position closed at the partial target (default: 0.5)
    pub partial_tp_fraction: f64,
    /// Win rate assumed when estimating a layer's expected return (default: 0.62)
    pub assumed_win_rate: f64,
}

impl Default for StopsConfig {
    fn default() -> Self {
        StopsConfig {
            grid_stop_mode: GridStopMode::Regime,
            grid_sl_low: 1.0,
            grid_sl_normal: 1.5,
            grid_sl_high: 2.0,
            grid_tp_width_multiplier: 2.5,
            grid_tp_atr_multiplier: 3.0,
            trend_sl_multiplier: 1.8,
            trend_tp_multiplier: 4.0,
            breakeven_trigger: 0.8,
            trailing_enabled: true,
            trailing_min_profit: 1.2,
            trailing_distance: 1.5,
            partial_tp_enabled: true,
            partial_tp_trigger: 0.8,
            partial_tp_fraction: 0.5,
            assumed_win_rate: 0.62,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// CSV file of bars (time, open, high, low, close[, volume])
    pub data_file: Option<String>,
    /// Bars consumed before the first entry is evaluated (default: 300)
    pub warmup_bars: usize,
    /// Record an equity point every N bars (default: 12)
    pub equity_sample_interval: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_file: None,
            warmup_bars: 300,
            equity_sample_interval: 12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategies.ranging.name, "statistical_grid");
        assert_eq!(config.strategies.trending.name, "trend_voting");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "trading": { "spread": 0.5 },
            "strategies": { "ranging": { "name": "statistical_grid_tuned" } }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.trading.spread, 0.5);
        assert_eq!(config.trading.symbol, "XAUUSD");
        assert_eq!(config.strategies.ranging.name, "statistical_grid_tuned");
        assert_eq!(config.strategies.trending.name, "trend_voting");
        assert_eq!(config.regime.min_history, 80);
        assert_eq!(config.stops.grid_stop_mode, GridStopMode::Regime);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = Config::default();
        config.regime.adx_threshold = 45.0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.backtest.warmup_bars = 50;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.executor.loss_streak_factors.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stop_mode_parses_snake_case() {
        let stops: StopsConfig =
            serde_json::from_str(r#"{ "grid_stop_mode": "depth_calibrated" }"#).unwrap();
        assert_eq!(stops.grid_stop_mode, GridStopMode::DepthCalibrated);
        assert_eq!(stops.trend_sl_multiplier, 1.8);
    }
}
