//! Core data types shared by the decision pipeline, the position book and the simulator

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use thiserror::Error;

// ============================================================================
// Bars
// ============================================================================

/// Validation errors for bar data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be finite and positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One closed OHLC bar of the traded instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(time, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (synthetic data, trusted feeds)
    pub fn new_unchecked(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Directions and signals
// ============================================================================

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Trade signal emitted by the decision pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Signal {
    /// Wire value in {-1, 0, 1}
    pub fn value(self) -> i8 {
        match self {
            Signal::Buy => 1,
            Signal::Sell => -1,
            Signal::Hold => 0,
        }
    }

    pub fn from_value(value: i32) -> Self {
        match value.signum() {
            1 => Signal::Buy,
            -1 => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    /// Direction of the position this signal would open
    pub fn direction(self) -> Option<Direction> {
        match self {
            Signal::Buy => Some(Direction::Long),
            Signal::Sell => Some(Direction::Short),
            Signal::Hold => None,
        }
    }

    pub fn is_hold(self) -> bool {
        self == Signal::Hold
    }
}

// ============================================================================
// Regime vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketType {
    #[default]
    Ranging,
    Trending,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Ranging => write!(f, "RANGING"),
            MarketType::Trending => write!(f, "TRENDING"),
        }
    }
}

/// Trend strength; `Medium` is a trend that is just starting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    #[default]
    Weak,
    Medium,
    Strong,
}

impl fmt::Display for TrendStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendStrength::Weak => write!(f, "weak"),
            TrendStrength::Medium => write!(f, "starting"),
            TrendStrength::Strong => write!(f, "strong"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Bullish => write!(f, "BULLISH"),
            TrendDirection::Bearish => write!(f, "BEARISH"),
            TrendDirection::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Short-term volatility relative to its longer history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityRegime::High => write!(f, "HIGH"),
            VolatilityRegime::Normal => write!(f, "NORMAL"),
            VolatilityRegime::Low => write!(f, "LOW"),
        }
    }
}

// ============================================================================
// Quotes
// ============================================================================

/// Two-sided price used for fills
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Synthesize a quote around a bar close with a symmetric spread
    pub fn from_close(close: f64, spread: f64) -> Self {
        let half = spread / 2.0;
        Self {
            bid: close - half,
            ask: close + half,
        }
    }

    /// Fill price when opening a position in `direction`
    pub fn entry_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }

    /// Fill price when closing a position in `direction`
    pub fn exit_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.bid,
            Direction::Short => self.ask,
        }
    }
}

// ============================================================================
// Positions and trades
// ============================================================================

/// Identity of one grid layer: direction plus level index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridId {
    pub direction: Direction,
    pub level: usize,
}

impl GridId {
    pub fn new(direction: Direction, level: usize) -> Self {
        Self { direction, level }
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        write!(f, "{}_{}", side, self.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopAdjustmentKind {
    Breakeven,
    Trailing,
}

/// One recorded stop-loss move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopAdjustment {
    pub time: DateTime<Utc>,
    pub kind: StopAdjustmentKind,
    pub old_stop: f64,
    pub new_stop: f64,
    pub price: f64,
}

/// An open position owned by the position book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub direction: Direction,
    /// Spread-adjusted fill price
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub lot_size: f64,
    pub initial_lot_size: f64,
    pub stop_loss: f64,
    pub initial_stop_loss: f64,
    pub take_profit: f64,
    /// One-way flag, never cleared once set
    pub breakeven_triggered: bool,
    pub trailing_active: bool,
    pub best_favorable_price: f64,
    pub adjustment_history: Vec<StopAdjustment>,
    pub market_type: MarketType,
    pub confidence: f64,
    pub partial_tp_triggered: bool,
    pub grid_id: Option<GridId>,
}

impl Position {
    /// Price distance moved in the position's favour (negative when adverse)
    pub fn favorable_distance(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign()
    }

    /// Distance from entry to the take-profit level
    pub fn target_distance(&self) -> f64 {
        (self.take_profit - self.entry_price).abs()
    }

    pub fn unrealized_pnl(&self, exit_price: f64, contract_size: f64) -> Money {
        realized_pnl(
            self.direction,
            self.entry_price,
            exit_price,
            self.lot_size,
            contract_size,
        )
    }
}

/// Profit of `lot` lots moved from `entry` to `exit`, in account currency
pub fn realized_pnl(
    direction: Direction,
    entry: f64,
    exit: f64,
    lot: f64,
    contract_size: f64,
) -> Money {
    let move_ = match direction {
        Direction::Long => Money::from_f64(exit) - Money::from_f64(entry),
        Direction::Short => Money::from_f64(entry) - Money::from_f64(exit),
    };
    move_ * Money::from_f64(lot) * Money::from_f64(contract_size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
    BreakevenSl,
    TrailingSl,
    EndOfData,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "TP",
            CloseReason::StopLoss => "SL",
            CloseReason::BreakevenSl => "BREAKEVEN_SL",
            CloseReason::TrailingSl => "TRAILING_SL",
            CloseReason::EndOfData => "END_OF_DATA",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of a (fully or partially) closed position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: u64,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub lot_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub pnl: Money,
    pub reason: CloseReason,
    pub market_type: MarketType,
    pub confidence: f64,
    pub grid_id: Option<GridId>,
    /// True for a partial take-profit fill; the position stays open
    pub partial: bool,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl.is_positive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
    pub open_positions: usize,
}

/// Summary statistics of a backtest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    /// Largest peak-to-trough equity decline in account currency
    pub max_drawdown: f64,
    /// Same decline as a percentage of the peak
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

// ============================================================================
// Money
// ============================================================================

/// Decimal money amount for balances and realised P&L.
///
/// Prices stay `f64` for indicator math; everything that accumulates across
/// trades goes through `Money` so repeated fills do not drift.
///
/// # Example
/// ```
/// use regime_trader::Money;
/// let pnl = Money::from_f64(1.5) + Money::from_f64(2.25);
/// assert_eq!(pnl, Money::from_f64(3.75));
/// ```
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// NaN and infinities map to zero
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Money(value)
    }

    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul for Money {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Money(self.0 * rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}
