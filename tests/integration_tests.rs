//! Integration tests for the regime trader
//!
//! These tests drive the public API end to end on synthetic bar series.

use anyhow::Result;
use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use regime_trader::backtest::BacktestSimulator;
use regime_trader::book::{OpenRequest, PositionBook};
use regime_trader::config::StopsConfig;
use regime_trader::indicators::IndicatorEngine;
use regime_trader::live::{LiveSession, MarketDataFeed, OrderIntent, OrderSink};
use regime_trader::manager::{AdaptiveStrategyManager, ManagerState};
use regime_trader::regime::{directional_index, RegimeClassifier};
use regime_trader::stops::StopsManager;
use regime_trader::strategies::statistical_grid::{build_grid, StatisticalGridConfig};
use regime_trader::{
    Bar, CloseReason, Config, Direction, MarketType, Money, Quote, Signal, TrendStrength,
    VolatilityRegime,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Deterministic noise in [-1, 1)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

fn bars_from_closes(closes: &[f64], minutes: i64, wick: f64) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(0.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar::new_unchecked(
                start_time() + Duration::minutes(minutes * i as i64),
                open,
                open.max(close) + wick,
                open.min(close) - wick,
                close,
                100.0,
            )
        })
        .collect()
}

/// Gold-like range: noise around 2000 with a gentle swing, so ADX stays
/// mostly below the ranging threshold
fn generate_ranging_bars(count: usize, seed: u64) -> Vec<Bar> {
    let mut rng = Lcg(seed);
    let closes: Vec<f64> = (0..count)
        .map(|i| 2000.0 + 2.0 * (i as f64 / 11.0).sin() + 3.0 * rng.next())
        .collect();
    bars_from_closes(&closes, 15, 0.6)
}

/// Steady climb with small pullbacks
fn generate_trending_bars(count: usize, step: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..count)
        .map(|i| 2000.0 + step * i as f64 - if i % 4 == 3 { step * 0.5 } else { 0.0 })
        .collect();
    bars_from_closes(&closes, 15, 0.4)
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_shipped_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/xauusd_15m.json");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.trading.symbol, "XAUUSD");
    assert_eq!(config.strategies.ranging.name, "statistical_grid");
    assert_eq!(config.strategies.trending.name, "trend_voting");
    assert!(AdaptiveStrategyManager::new(&config).is_ok());
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = Config::default();
    config.trading.min_lot = 2.0;
    assert!(config.validate().is_err());
    assert!(BacktestSimulator::new(config).is_err());
}

// =============================================================================
// Regime classification
// =============================================================================

#[test]
fn test_dmi_stays_in_bounds() {
    let bars = generate_ranging_bars(600, 7);
    for reading in directional_index(&bars, 14) {
        for value in [reading.adx, reading.plus_di, reading.minus_di] {
            assert!((0.0..=100.0).contains(&value), "out of range: {}", value);
        }
    }
}

#[test]
fn test_strong_uptrend_classification() {
    let bars = generate_trending_bars(200, 2.0);
    let classifier = RegimeClassifier::new(Config::default().regime);
    let regime = classifier.analyze(&bars).unwrap();

    assert_eq!(regime.market_type, MarketType::Trending);
    if regime.adx >= 40.0 {
        assert_eq!(regime.strength, TrendStrength::Strong);
    }
    assert!(regime.plus_di > regime.minus_di);
}

#[test]
fn test_manager_needs_history() {
    let config = Config::default();
    let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
    let bars = generate_trending_bars(79, 2.0);
    let rows = IndicatorEngine::new(config.indicators.clone(), config.regime.adx_period)
        .compute(&bars);
    let decision = manager
        .evaluate(&bars, &rows, Money::from_f64(10_000.0))
        .unwrap();

    assert_eq!(decision.state, ManagerState::InsufficientData);
    assert_eq!(decision.market_type, MarketType::Ranging);
    assert_eq!(decision.signal, Signal::Hold);
    assert_eq!(decision.confidence, 0.0);
}

// =============================================================================
// Grid geometry
// =============================================================================

#[test]
fn test_grid_levels_are_ordered_and_evenly_spaced() {
    let bars = generate_ranging_bars(400, 11);
    let config = StatisticalGridConfig::default();
    let rows = IndicatorEngine::new(Config::default().indicators, 14).compute(&bars);

    for end in (120..bars.len()).step_by(40) {
        let atr = rows[end - 1].atr;
        let Ok(grid) = build_grid(&bars[..end], atr, VolatilityRegime::Normal, &config) else {
            continue;
        };
        assert!(grid.buy_levels.len() >= config.min_levels_per_side);
        assert!(grid.sell_levels.len() >= config.min_levels_per_side);
        for pair in grid.buy_levels.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        for pair in grid.sell_levels.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert!(grid.buy_levels[0] < grid.center && grid.center < grid.sell_levels[0]);
    }
}

// =============================================================================
// Stops and position book
// =============================================================================

#[test]
fn test_normal_regime_grid_stop() {
    let stops = StopsManager::new(StopsConfig::default(), 0.01);
    let (sl, _) = stops.grid_distances(10.0, 5.0, VolatilityRegime::Normal);

    let mut book = PositionBook::new(Money::from_f64(10_000.0), 100.0);
    let request = OpenRequest {
        direction: Direction::Long,
        lot_size: 0.01,
        stop_distance: sl,
        target_distance: 20.0,
        market_type: MarketType::Ranging,
        confidence: 0.7,
        grid_id: None,
    };
    let position = book.open(request, &Quote::from_close(2000.0, 0.0), start_time());
    assert_relative_eq!(position.stop_loss, 1985.0, epsilon = 1e-9);
}

#[test]
fn test_stop_only_tightens_over_a_price_path() {
    let stops = StopsManager::new(StopsConfig::default(), 0.01);
    let mut book = PositionBook::new(Money::from_f64(10_000.0), 100.0);
    let request = OpenRequest {
        direction: Direction::Long,
        lot_size: 0.10,
        stop_distance: 15.0,
        target_distance: 60.0,
        market_type: MarketType::Trending,
        confidence: 0.8,
        grid_id: None,
    };
    book.open(request, &Quote::from_close(2000.0, 0.3), start_time());

    let path = [2004.0, 2011.0, 2018.0, 2015.0, 2024.0, 2030.0, 2026.0, 2033.0, 2029.0];
    let mut last_stop = book.positions()[0].stop_loss;
    let mut breakeven_seen = false;
    for (i, close) in path.iter().enumerate() {
        let time = start_time() + Duration::minutes(15 * (i as i64 + 1));
        let update = book.manage(&stops, &Quote::from_close(*close, 0.3), 5.0, time);
        let Some(position) = book.positions().first() else {
            assert!(!update.closed.is_empty());
            break;
        };
        assert!(position.stop_loss >= last_stop, "stop loosened at bar {}", i);
        if breakeven_seen {
            assert!(position.breakeven_triggered);
            assert!(position.stop_loss >= position.entry_price);
        }
        breakeven_seen |= position.breakeven_triggered;
        last_stop = position.stop_loss;
    }
    assert!(breakeven_seen);
}

#[test]
fn test_spread_accounting() {
    let mut book = PositionBook::new(Money::from_f64(10_000.0), 100.0);
    let request = OpenRequest {
        direction: Direction::Long,
        lot_size: 0.01,
        stop_distance: 15.0,
        target_distance: 30.0,
        market_type: MarketType::Ranging,
        confidence: 0.5,
        grid_id: None,
    };
    book.open(request, &Quote::from_close(2000.0, 0.3), start_time());
    let records = book.close_all(
        &Quote::from_close(2010.0, 0.3),
        start_time() + Duration::hours(1),
        CloseReason::EndOfData,
    );
    let expected = ((2010.0 - 0.15) - (2000.0 + 0.15)) * 0.01 * 100.0;
    assert_relative_eq!(records[0].pnl.to_f64(), expected, epsilon = 1e-9);
}

// =============================================================================
// Backtest
// =============================================================================

#[test]
fn test_backtest_accounting_is_consistent() {
    let bars = generate_ranging_bars(2500, 42);
    let config = Config::default();
    let result = BacktestSimulator::new(config.clone())
        .unwrap()
        .run(&bars)
        .unwrap();

    assert_eq!(result.bars_processed, bars.len() - config.backtest.warmup_bars);
    assert_eq!(result.metrics.total_trades, result.trades.len());

    let realised: Money = result.trades.iter().map(|t| t.pnl).sum();
    assert_eq!(result.final_balance, result.initial_capital + realised);
    assert_eq!(result.monthly.total_pnl(), realised);

    let warmup_end = bars[config.backtest.warmup_bars].time;
    for trade in &result.trades {
        assert!(trade.entry_time >= warmup_end);
        assert!(trade.exit_time >= trade.entry_time);
        assert!(trade.lot_size >= config.trading.min_lot - 1e-9);
    }

    let last = result.equity_curve.last().unwrap();
    assert_eq!(last.time, bars[bars.len() - 1].time);
    assert_relative_eq!(last.equity, result.final_balance.to_f64(), epsilon = 1e-6);
    assert!(result
        .equity_curve
        .iter()
        .all(|p| p.open_positions <= config.trading.max_positions));
    assert!(result.metrics.max_drawdown_pct >= 0.0);

    // The range must actually reach the grid path
    assert!(result
        .trades
        .iter()
        .any(|t| t.market_type == MarketType::Ranging && t.grid_id.is_some()));
}

#[test]
fn test_backtest_is_deterministic() {
    let bars = generate_ranging_bars(1200, 3);
    let run = || {
        BacktestSimulator::new(Config::default())
            .unwrap()
            .run(&bars)
            .unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a.trades.len(), b.trades.len());
    assert_eq!(a.final_balance, b.final_balance);
    for (x, y) in a.trades.iter().zip(&b.trades) {
        assert_eq!(x.entry_time, y.entry_time);
        assert_eq!(x.pnl, y.pnl);
        assert_eq!(x.reason, y.reason);
    }
}

#[test]
fn test_partial_fills_share_position() {
    // Grid lots of 0.05 leave room to bank half at 50 % of the target
    let mut config = Config::default();
    config.executor.base_lot = 0.05;
    config.stops.partial_tp_trigger = 0.5;

    let bars = generate_ranging_bars(1500, 1);
    let result = BacktestSimulator::new(config).unwrap().run(&bars).unwrap();

    let partials: Vec<_> = result.trades.iter().filter(|t| t.partial).collect();
    assert!(partials
        .iter()
        .any(|t| t.market_type == MarketType::Ranging));

    // Every partial close is followed by exactly one final close of that position
    for partial in partials {
        let finals = result
            .trades
            .iter()
            .filter(|t| t.position_id == partial.position_id && !t.partial)
            .count();
        assert_eq!(finals, 1);
        assert_eq!(partial.reason, CloseReason::TakeProfit);
    }
}

// =============================================================================
// Live session
// =============================================================================

struct ReplayFeed {
    bars: Vec<Bar>,
    visible: Rc<Cell<usize>>,
}

impl MarketDataFeed for ReplayFeed {
    fn closed_bars(&mut self) -> Result<Vec<Bar>> {
        let visible = self.visible.get();
        Ok(self.bars[visible.saturating_sub(50)..visible].to_vec())
    }

    fn quote(&mut self) -> Result<Quote> {
        Ok(Quote::from_close(self.bars[self.visible.get() - 1].close, 0.3))
    }
}

/// Records accepted intents; rejects everything while `down` is set
#[derive(Default)]
struct FlakySink {
    intents: Rc<RefCell<Vec<OrderIntent>>>,
    down: Rc<Cell<bool>>,
}

impl OrderSink for FlakySink {
    fn submit(&mut self, intent: &OrderIntent) -> Result<()> {
        if self.down.get() {
            anyhow::bail!("broker unreachable");
        }
        self.intents.borrow_mut().push(intent.clone());
        Ok(())
    }
}

#[test]
fn test_live_session_replay() {
    let bars = generate_ranging_bars(700, 5);
    let visible = Rc::new(Cell::new(0));
    let feed = ReplayFeed {
        bars: bars.clone(),
        visible: Rc::clone(&visible),
    };
    let sink = FlakySink::default();
    let (accepted, down) = (Rc::clone(&sink.intents), Rc::clone(&sink.down));
    let mut session = LiveSession::new(&Config::default(), feed, sink).unwrap();

    let mut produced = Vec::new();
    let mut queued_while_down = false;
    for i in 1..=bars.len() {
        // Poll just after bar i-1 has closed, with the feed showing up to it.
        // The broker drops out on every third poll.
        down.set(i % 3 == 0);
        visible.set(i);
        let now = bars[i - 1].time + Duration::minutes(15);
        let outcome = session.poll_once(now).unwrap();
        assert_eq!(outcome.new_bars, 1);

        // Fills are stamped with the bar they were decided on
        for intent in &outcome.intents {
            if let OrderIntent::Open { position_id, .. } = intent {
                let position = session
                    .book()
                    .positions()
                    .iter()
                    .find(|p| p.id == *position_id)
                    .unwrap();
                assert_eq!(position.entry_time, bars[i - 1].time);
            }
        }
        if down.get() && !session.pending_intents().is_empty() {
            queued_while_down = true;
            assert!(outcome.sink_error.is_some());
        }
        produced.extend(outcome.intents);

        // A still-forming bar is never ingested
        if i < bars.len() {
            visible.set(i + 1);
            let early = session.poll_once(now).unwrap();
            assert_eq!(early.new_bars, 0);
        }
    }
    assert!(queued_while_down);

    // Back online: the queue drains in order with nothing lost
    down.set(false);
    let last_poll = bars[bars.len() - 1].time + Duration::minutes(20);
    let outcome = session.poll_once(last_poll).unwrap();
    assert_eq!(outcome.new_bars, 0);
    assert!(outcome.sink_error.is_none());
    assert!(session.pending_intents().is_empty());
    assert_eq!(*accepted.borrow(), produced);

    let opens = produced
        .iter()
        .filter(|i| matches!(i, OrderIntent::Open { .. }))
        .count();
    let closes = produced
        .iter()
        .filter(|i| matches!(i, OrderIntent::Close { partial: false, .. }))
        .count();
    assert_eq!(session.last_bar_time(), Some(bars[bars.len() - 1].time));
    assert_eq!(opens, closes + session.book().open_count());

    let exposure = session.manager().exposure();
    let grid_positions = session
        .book()
        .positions()
        .iter()
        .filter(|p| p.grid_id.is_some())
        .count();
    assert_eq!(exposure.long_layers + exposure.short_layers, grid_positions);
}
