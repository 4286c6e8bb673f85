//! Account-level risk controls
//!
//! Two guards block new entries:
//! - the day's loss reaches `daily_loss_limit` of the balance at the day's start
//! - equity falls `max_drawdown` below its running peak
//!
//! Open positions keep being managed while entries are halted. The daily
//! guard re-arms on the first update of a new UTC day.
//!
//! Trend entries are sized from the stop distance:
//! ```text
//! lot = balance * risk_per_trade / (stop_distance * contract_size)
//! ```
//! clamped to [min_lot, max_lot] and rounded to 0.01.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::config::TradingConfig;
use crate::Money;

/// Lot size risking `risk` of `balance` over `stop_distance`
pub fn risk_based_lot_size(
    balance: Money,
    risk: f64,
    stop_distance: f64,
    contract_size: f64,
    min_lot: f64,
    max_lot: f64,
) -> f64 {
    if !(stop_distance > 0.0 && contract_size > 0.0) {
        return min_lot;
    }
    let lot = balance.to_f64() * risk / (stop_distance * contract_size);
    let lot = if lot.is_finite() { lot } else { min_lot };
    ((lot.clamp(min_lot, max_lot.max(min_lot)) * 100.0).round() / 100.0).max(min_lot)
}

/// Why new entries are blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    DailyLossLimit,
    MaxDrawdown,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::DailyLossLimit => write!(f, "daily loss limit"),
            HaltReason::MaxDrawdown => write!(f, "max drawdown"),
        }
    }
}

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone)]
pub struct RiskManagerConfig {
    pub initial_capital: f64,
    pub risk_per_trade: f64,
    pub daily_loss_limit: f64,
    pub max_drawdown: f64,
    pub contract_size: f64,
    pub min_lot: f64,
    pub max_lot: f64,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self::from(&TradingConfig::default())
    }
}

impl From<&TradingConfig> for RiskManagerConfig {
    fn from(trading: &TradingConfig) -> Self {
        Self {
            initial_capital: trading.initial_capital,
            risk_per_trade: trading.risk_per_trade,
            daily_loss_limit: trading.daily_loss_limit,
            max_drawdown: trading.max_drawdown,
            contract_size: trading.contract_size,
            min_lot: trading.min_lot,
            max_lot: trading.max_lot,
        }
    }
}

impl RiskManagerConfig {
    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    /// Set risk per trade as a fraction (e.g., 0.015 = 1.5%)
    pub fn with_risk_per_trade(mut self, risk: f64) -> Self {
        self.risk_per_trade = risk;
        self
    }

    pub fn with_daily_loss_limit(mut self, limit: f64) -> Self {
        self.daily_loss_limit = limit;
        self
    }

    /// Set maximum drawdown threshold for halting
    pub fn with_max_drawdown(mut self, dd: f64) -> Self {
        self.max_drawdown = dd;
        self
    }

    /// Build the RiskManager
    pub fn build(self) -> RiskManager {
        RiskManager::from_config(self)
    }

    /// Lot for a trend entry with the given stop distance
    pub fn trend_lot_size(&self, balance: Money, stop_distance: f64) -> f64 {
        risk_based_lot_size(
            balance,
            self.risk_per_trade,
            stop_distance,
            self.contract_size,
            self.min_lot,
            self.max_lot,
        )
    }
}

/// Risk manager for account-level risk controls
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskManagerConfig,
    current_equity: Money,
    peak_equity: Money,
    day: Option<NaiveDate>,
    day_start_equity: Money,
    halted: Option<HaltReason>,
}

impl RiskManager {
    pub fn from_config(config: RiskManagerConfig) -> Self {
        let capital = Money::from_f64(config.initial_capital);
        RiskManager {
            config,
            current_equity: capital,
            peak_equity: capital,
            day: None,
            day_start_equity: capital,
            halted: None,
        }
    }

    /// Record equity at `time`, rolling the daily baseline on a new day
    pub fn update_equity(&mut self, equity: Money, time: DateTime<Utc>) {
        let today = time.date_naive();
        if self.day != Some(today) {
            // New day starts from the last equity of the previous one
            self.day = Some(today);
            self.day_start_equity = self.current_equity;
        }

        self.current_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }

        let halt = self.check_limits();
        if halt.is_some() && halt != self.halted {
            warn!(
                reason = %halt.map(|h| h.to_string()).unwrap_or_default(),
                equity = %equity,
                drawdown = format!("{:.2}%", self.current_drawdown() * 100.0),
                "Trading halted"
            );
        }
        self.halted = halt;
    }

    fn check_limits(&self) -> Option<HaltReason> {
        if self.current_drawdown() >= self.config.max_drawdown {
            Some(HaltReason::MaxDrawdown)
        } else if self.daily_loss() >= self.config.daily_loss_limit {
            Some(HaltReason::DailyLossLimit)
        } else {
            None
        }
    }

    pub fn peak_equity(&self) -> Money {
        self.peak_equity
    }

    /// Fractional drawdown from peak equity
    pub fn current_drawdown(&self) -> f64 {
        let peak = self.peak_equity.to_f64();
        if peak <= 0.0 {
            return 0.0;
        }
        ((peak - self.current_equity.to_f64()) / peak).max(0.0)
    }

    /// Fractional loss since the start of the current day
    pub fn daily_loss(&self) -> f64 {
        let start = self.day_start_equity.to_f64();
        if start <= 0.0 {
            return 0.0;
        }
        ((start - self.current_equity.to_f64()) / start).max(0.0)
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted
    }

    pub fn should_halt_trading(&self) -> bool {
        self.halted.is_some()
    }

    /// Can open a new position? (count-based)
    #[inline]
    pub fn can_open_position_count(&self, position_count: usize, max_positions: usize) -> bool {
        !self.should_halt_trading() && position_count < max_positions
    }
}
