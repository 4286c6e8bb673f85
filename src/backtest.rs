//! Backtesting engine
//!
//! Deterministic single pass over historical bars. The indicator state is
//! warmed up on the first `warmup_bars` bars, then every following bar runs:
//!
//! 1. stop management of open positions at the bar's quote
//! 2. equity update and account guards
//! 3. one manager evaluation, and an entry when it signals and room remains
//! 4. peak equity / drawdown tracking and equity sampling
//!
//! Positions still open after the last bar are closed at its quote.

use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::book::{OpenRequest, PositionBook};
use crate::error::{EngineError, EngineResult};
use crate::indicators::{IndicatorSet, IndicatorState};
use crate::manager::AdaptiveStrategyManager;
use crate::monthly_pnl::MonthlyPnLMatrix;
use crate::risk::{RiskManager, RiskManagerConfig};
use crate::{
    Bar, CloseReason, Config, EquityPoint, Money, PerformanceMetrics, Quote, TradeRecord,
};

const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub monthly: MonthlyPnLMatrix,
    pub initial_capital: Money,
    pub final_balance: Money,
    pub bars_processed: usize,
    /// Entries actually opened
    pub entries: usize,
    /// Bars on which an account guard blocked entries
    pub halted_bars: usize,
}

/// Running peak and worst decline of the equity curve
#[derive(Debug, Clone, Copy)]
struct DrawdownTracker {
    peak: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
}

impl DrawdownTracker {
    fn new(initial: f64) -> Self {
        Self {
            peak: initial,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
        }
    }

    fn update(&mut self, equity: f64) {
        if equity > self.peak {
            self.peak = equity;
        }
        let dd = self.peak - equity;
        if dd > self.max_drawdown {
            self.max_drawdown = dd;
        }
        if self.peak > 0.0 {
            self.max_drawdown_pct = self.max_drawdown_pct.max(dd / self.peak * 100.0);
        }
    }
}

/// Backtest engine
pub struct BacktestSimulator {
    config: Config,
    manager: AdaptiveStrategyManager,
    risk: RiskManager,
    book: PositionBook,
}

impl BacktestSimulator {
    pub fn new(config: Config) -> EngineResult<Self> {
        let manager = AdaptiveStrategyManager::new(&config)?;
        let risk = RiskManagerConfig::from(&config.trading).build();
        let book = PositionBook::new(
            Money::from_f64(config.trading.initial_capital),
            config.trading.contract_size,
        );
        Ok(Self {
            config,
            manager,
            risk,
            book,
        })
    }

    pub fn manager(&self) -> &AdaptiveStrategyManager {
        &self.manager
    }

    /// Replay `bars`, which must be ordered and longer than the warm-up
    pub fn run(&mut self, bars: &[Bar]) -> EngineResult<BacktestResult> {
        let warmup = self.config.backtest.warmup_bars;
        if bars.len() <= warmup {
            return Err(EngineError::InsufficientData {
                required: warmup + 1,
                available: bars.len(),
            });
        }

        let trading = self.config.trading.clone();
        let max_history = self.config.regime.max_history;
        let sample_every = self.config.backtest.equity_sample_interval;
        let initial_capital = Money::from_f64(trading.initial_capital);

        let (mut state, mut rows): (IndicatorState, Vec<IndicatorSet>) = IndicatorState::warm_up(
            &self.config.indicators,
            self.config.regime.adx_period,
            &bars[..warmup],
        )?;

        info!(
            bars = bars.len(),
            warmup,
            start = %bars[warmup].time,
            end = %bars[bars.len() - 1].time,
            "Starting backtest"
        );

        let mut result = BacktestResult {
            initial_capital,
            ..Default::default()
        };
        let mut drawdown = DrawdownTracker::new(trading.initial_capital);

        for i in warmup..bars.len() {
            let bar = &bars[i];
            rows.push(state.next(bar));
            let row = &rows[i];
            let quote = Quote::from_close(bar.close, trading.spread);

            // 1. Manage open positions
            let update = self
                .book
                .manage(self.manager.stops(), &quote, row.atr, bar.time);
            for record in update.closed {
                self.settle(record, &mut result);
            }

            // 2. Account guards
            self.risk.update_equity(self.book.equity(&quote), bar.time);
            if self.risk.should_halt_trading() {
                result.halted_bars += 1;
            }

            // 3. Entry evaluation on the trailing window
            let start = (i + 1).saturating_sub(max_history);
            let decision =
                self.manager
                    .evaluate(&bars[start..=i], &rows[start..=i], self.book.balance())?;
            let room = self
                .risk
                .can_open_position_count(self.book.open_count(), trading.max_positions);
            if let (true, Some(request)) = (room, OpenRequest::from_decision(&decision)) {
                self.book.open(request, &quote, bar.time);
                self.manager
                    .on_position_opened(request.grid_id, request.lot_size, bar.time);
                result.entries += 1;
            }

            // 4. Equity tracking
            let equity = self.book.equity(&quote).to_f64();
            drawdown.update(equity);
            let processed = i - warmup + 1;
            if processed % sample_every == 0 {
                result.equity_curve.push(EquityPoint {
                    time: bar.time,
                    equity,
                    open_positions: self.book.open_count(),
                });
            }
            result.bars_processed = processed;
        }

        let last = &bars[bars.len() - 1];
        let quote = Quote::from_close(last.close, trading.spread);
        let remaining = self.book.close_all(&quote, last.time, CloseReason::EndOfData);
        if !remaining.is_empty() {
            debug!(count = remaining.len(), "Closing positions at end of data");
        }
        for record in remaining {
            self.settle(record, &mut result);
        }

        let final_equity = self.book.balance().to_f64();
        drawdown.update(final_equity);
        if result.equity_curve.last().map(|p| p.time) != Some(last.time) {
            result.equity_curve.push(EquityPoint {
                time: last.time,
                equity: final_equity,
                open_positions: 0,
            });
        }

        result.final_balance = self.book.balance();
        result.metrics = calculate_metrics(
            &result.trades,
            &result.equity_curve,
            trading.initial_capital,
            (drawdown.max_drawdown, drawdown.max_drawdown_pct),
            self.periods_per_year(),
        );

        info!(
            trades = result.metrics.total_trades,
            final_balance = %result.final_balance.round_dp(2),
            total_return = format!("{:.2}%", result.metrics.total_return),
            max_dd = format!("{:.2}%", result.metrics.max_drawdown_pct),
            "Backtest complete"
        );
        Ok(result)
    }

    fn settle(&mut self, record: TradeRecord, result: &mut BacktestResult) {
        self.manager.on_trade_closed(&record);
        result.monthly.record(&record);
        result.trades.push(record);
    }

    /// Equity samples per year, for Sharpe annualisation
    fn periods_per_year(&self) -> f64 {
        let minutes = self.config.trading.timeframe_minutes.max(1) as f64
            * self.config.backtest.equity_sample_interval.max(1) as f64;
        MINUTES_PER_YEAR / minutes
    }
}

/// Trade and equity statistics.
///
/// `drawdown` is the (value, percent) pair tracked bar by bar, which is finer
/// than the sampled curve. Sharpe uses the mean of all sample returns over
/// the deviation of the non-zero ones, so flat stretches without exposure do
/// not shrink the measured volatility.
pub fn calculate_metrics(
    trades: &[TradeRecord],
    equity_curve: &[EquityPoint],
    initial_capital: f64,
    drawdown: (f64, f64),
    periods_per_year: f64,
) -> PerformanceMetrics {
    let (max_drawdown, max_drawdown_pct) = drawdown;
    let final_equity = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(initial_capital);
    let total_return = if initial_capital > 0.0 {
        (final_equity - initial_capital) / initial_capital * 100.0
    } else {
        0.0
    };

    let mut metrics = PerformanceMetrics {
        total_return,
        max_drawdown,
        max_drawdown_pct,
        ..Default::default()
    };
    if trades.is_empty() {
        return metrics;
    }

    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl.to_f64()).collect();
    let (wins, losses): (Vec<&TradeRecord>, Vec<&TradeRecord>) =
        trades.iter().partition(|t| t.is_win());
    let wins: Vec<f64> = wins.iter().map(|t| t.pnl.to_f64()).collect();
    let losses: Vec<f64> = losses.iter().map(|t| t.pnl.to_f64()).collect();

    let gross_profits: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().map(|p| p.abs()).sum();

    metrics.total_trades = trades.len();
    metrics.winning_trades = wins.len();
    metrics.losing_trades = losses.len();
    metrics.win_rate = wins.len() as f64 / trades.len() as f64 * 100.0;
    metrics.profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    metrics.expectancy = pnls.iter().sum::<f64>() / trades.len() as f64;
    if !wins.is_empty() {
        metrics.avg_win = gross_profits / wins.len() as f64;
    }
    if !losses.is_empty() {
        metrics.avg_loss = gross_losses / losses.len() as f64;
    }
    metrics.largest_win = wins.iter().copied().fold(0.0, f64::max);
    metrics.largest_loss = losses.iter().copied().fold(0.0, f64::min);

    metrics.sharpe_ratio = sharpe_ratio(equity_curve, periods_per_year);
    metrics
}

fn sharpe_ratio(equity_curve: &[EquityPoint], periods_per_year: f64) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity > 0.0)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let active: Vec<f64> = returns.iter().copied().filter(|r| *r != 0.0).collect();
    if active.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().mean();
    let std_dev = active.iter().std_dev();
    if std_dev > 0.0 && std_dev.is_finite() {
        mean / std_dev * periods_per_year.sqrt()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, MarketType};
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(pnl: f64) -> TradeRecord {
        TradeRecord {
            position_id: 1,
            direction: Direction::Long,
            entry_price: 2000.0,
            exit_price: 2000.0,
            entry_time: t0(),
            exit_time: t0(),
            lot_size: 0.01,
            stop_loss: 1990.0,
            take_profit: 2020.0,
            pnl: Money::from_f64(pnl),
            reason: CloseReason::TakeProfit,
            market_type: MarketType::Ranging,
            confidence: 0.5,
            grid_id: None,
            partial: false,
        }
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                time: t0() + Duration::hours(i as i64),
                equity,
                open_positions: 0,
            })
            .collect()
    }

    #[test]
    fn test_trade_statistics() {
        let trades = vec![record(30.0), record(-10.0), record(20.0), record(-20.0)];
        let equity = curve(&[10_000.0, 10_020.0]);
        let m = calculate_metrics(&trades, &equity, 10_000.0, (25.0, 0.25), 8760.0);

        assert_eq!(m.total_trades, 4);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.losing_trades, 2);
        assert_relative_eq!(m.win_rate, 50.0);
        assert_relative_eq!(m.profit_factor, 50.0 / 30.0, epsilon = 1e-12);
        assert_relative_eq!(m.expectancy, 5.0, epsilon = 1e-12);
        assert_relative_eq!(m.avg_win, 25.0, epsilon = 1e-12);
        assert_relative_eq!(m.avg_loss, 15.0, epsilon = 1e-12);
        assert_relative_eq!(m.largest_win, 30.0, epsilon = 1e-12);
        assert_relative_eq!(m.largest_loss, -20.0, epsilon = 1e-12);
        assert_relative_eq!(m.total_return, 0.2, epsilon = 1e-12);
        assert_relative_eq!(m.max_drawdown, 25.0);
    }

    #[test]
    fn test_profit_factor_without_losses() {
        let m = calculate_metrics(&[record(5.0)], &curve(&[100.0]), 100.0, (0.0, 0.0), 1.0);
        assert!(m.profit_factor.is_infinite());
    }

    #[test]
    fn test_no_trades_keeps_return_and_drawdown() {
        let m = calculate_metrics(&[], &curve(&[100.0, 90.0]), 100.0, (10.0, 10.0), 1.0);
        assert_eq!(m.total_trades, 0);
        assert_relative_eq!(m.total_return, -10.0, epsilon = 1e-12);
        assert_relative_eq!(m.max_drawdown_pct, 10.0);
        assert_eq!(m.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_sharpe_ignores_flat_samples_in_volatility() {
        let active = curve(&[100.0, 101.0, 100.5, 102.0, 101.0, 103.0]);
        let mut padded_values = vec![100.0];
        for p in active.iter().skip(1) {
            let last = *padded_values.last().unwrap();
            padded_values.extend([last, last, p.equity]);
        }
        let padded = curve(&padded_values);

        let dense = sharpe_ratio(&active, 1.0);
        let sparse = sharpe_ratio(&padded, 1.0);
        assert!(dense > 0.0);
        // Same active moves, a third of the mean, same deviation
        assert_relative_eq!(sparse, dense / 3.0, epsilon = 1e-2);
    }

    #[test]
    fn test_drawdown_tracker() {
        let mut dd = DrawdownTracker::new(100.0);
        for equity in [110.0, 99.0, 120.0, 108.0] {
            dd.update(equity);
        }
        assert_relative_eq!(dd.max_drawdown, 12.0);
        assert_relative_eq!(dd.max_drawdown_pct, 11.0 / 110.0 * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_run_rejects_short_history() {
        let mut sim = BacktestSimulator::new(Config::default()).unwrap();
        let bars: Vec<Bar> = (0..50)
            .map(|i| {
                Bar::new_unchecked(t0() + Duration::minutes(5 * i), 2000.0, 2001.0, 1999.0, 2000.0, 1.0)
            })
            .collect();
        assert!(matches!(
            sim.run(&bars),
            Err(EngineError::InsufficientData { required: 301, available: 50 })
        ));
    }
}
