//! Adaptive strategy manager
//!
//! One call per closed bar turns bars and indicator rows into a single
//! [`Decision`]:
//!
//! ```text
//! bars < min_history   -> INSUFFICIENT_DATA, RANGING, HOLD, confidence 0
//! ADX < threshold      -> RANGING:  grid strategy -> layer executor -> grid stops
//! otherwise            -> TRENDING: trend votes, confidence = ADX / 50 -> trend stops
//! ```
//!
//! The manager owns grid-layer occupancy and win/loss streaks. Callers report
//! fills and closes back through [`AdaptiveStrategyManager::on_position_opened`]
//! and [`AdaptiveStrategyManager::on_trade_closed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::{Config, GridStopMode};
use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorSet;
use crate::regime::{MarketRegime, RegimeClassifier};
use crate::risk::RiskManagerConfig;
use crate::stops::StopsManager;
use crate::strategies::statistical_grid::{GridDecision, GridExecutor, GridExposure};
use crate::strategies::{
    create_strategy, DecisionDetail, GridHoldReason, MarketContext, SignalStrategy, SignalVote,
};
use crate::{Bar, Direction, GridId, MarketType, Money, Signal, TradeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    #[default]
    InsufficientData,
    Ranging,
    Trending,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            ManagerState::Ranging => write!(f, "RANGING"),
            ManagerState::Trending => write!(f, "TRENDING"),
        }
    }
}

/// Unified decision for one bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub time: DateTime<Utc>,
    /// Close of the evaluated bar
    pub price: f64,
    pub signal: Signal,
    /// In [0, 1]; 0 when holding
    pub confidence: f64,
    pub market_type: MarketType,
    pub state: ManagerState,
    pub regime: MarketRegime,
    /// Stop and target relative to `price`; the fill re-anchors them
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_distance: f64,
    pub target_distance: f64,
    pub lot_size: f64,
    pub grid_id: Option<GridId>,
    pub detail: Option<DecisionDetail>,
}

impl Decision {
    fn hold(time: DateTime<Utc>, price: f64, state: ManagerState, regime: MarketRegime) -> Self {
        Self {
            time,
            price,
            signal: Signal::Hold,
            confidence: 0.0,
            market_type: regime.market_type,
            state,
            regime,
            stop_loss: None,
            take_profit: None,
            stop_distance: 0.0,
            target_distance: 0.0,
            lot_size: 0.0,
            grid_id: None,
            detail: None,
        }
    }

    pub fn is_entry(&self) -> bool {
        !self.signal.is_hold() && self.lot_size > 0.0
    }
}

pub struct AdaptiveStrategyManager {
    classifier: RegimeClassifier,
    ranging: Box<dyn SignalStrategy>,
    trending: Box<dyn SignalStrategy>,
    executor: GridExecutor,
    stops: StopsManager,
    sizing: RiskManagerConfig,
    grid_stop_mode: GridStopMode,
    /// Bars needed by the classifier and both strategies
    min_history: usize,
    state: ManagerState,
}

impl AdaptiveStrategyManager {
    pub fn new(config: &Config) -> EngineResult<Self> {
        config.validate()?;
        let ranging = create_strategy(&config.strategies.ranging)?;
        let trending = create_strategy(&config.strategies.trending)?;

        let min_history = config
            .regime
            .min_history
            .max(ranging.required_history())
            .max(trending.required_history());
        if min_history > config.regime.max_history {
            return Err(EngineError::InvalidConfig(format!(
                "strategies need {} bars of history but regime.max_history is {}",
                min_history, config.regime.max_history
            )));
        }
        info!(
            ranging = ranging.name(),
            trending = trending.name(),
            min_history,
            "Strategy manager ready"
        );

        Ok(Self {
            classifier: RegimeClassifier::new(config.regime.clone()),
            ranging,
            trending,
            executor: GridExecutor::new(config.executor.clone(), config.trading.min_lot),
            stops: StopsManager::new(config.stops.clone(), config.trading.min_lot),
            sizing: RiskManagerConfig::from(&config.trading),
            grid_stop_mode: config.stops.grid_stop_mode,
            min_history,
            state: ManagerState::InsufficientData,
        })
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn stops(&self) -> &StopsManager {
        &self.stops
    }

    pub fn executor(&self) -> &GridExecutor {
        &self.executor
    }

    pub fn exposure(&self) -> GridExposure {
        self.executor.exposure()
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    /// Evaluate the last bar of `bars`. `indicators` must hold one row per bar.
    pub fn evaluate(
        &mut self,
        bars: &[Bar],
        indicators: &[IndicatorSet],
        balance: Money,
    ) -> EngineResult<Decision> {
        let Some(bar) = bars.last() else {
            return Err(EngineError::Precondition("no bars".to_string()));
        };
        if indicators.len() != bars.len() {
            return Err(EngineError::Precondition(format!(
                "{} indicator rows for {} bars",
                indicators.len(),
                bars.len()
            )));
        }
        if !bar.close.is_finite() {
            return Err(EngineError::Precondition(format!(
                "non-finite close at {}",
                bar.time
            )));
        }

        if bars.len() < self.min_history {
            self.state = ManagerState::InsufficientData;
            debug!(bars = bars.len(), required = self.min_history, "Insufficient history");
            return Ok(Decision::hold(
                bar.time,
                bar.close,
                ManagerState::InsufficientData,
                MarketRegime::default(),
            ));
        }

        let latest = &indicators[indicators.len() - 1];
        let regime = self
            .classifier
            .classify(latest.adx, latest.plus_di, latest.minus_di);
        let state = match regime.market_type {
            MarketType::Ranging => ManagerState::Ranging,
            MarketType::Trending => ManagerState::Trending,
        };
        if state != self.state {
            info!(from = %self.state, to = %state, adx = format!("{:.1}", regime.adx), "Regime change");
        }
        self.state = state;

        let ctx = MarketContext::new(bars, indicators, &regime);
        let vote = match state {
            ManagerState::Trending => self.trending.compute_signal(&ctx),
            _ => self.ranging.compute_signal(&ctx),
        };

        let mut decision = Decision::hold(bar.time, bar.close, state, regime);
        self.size_entry(&mut decision, vote, latest.atr, balance);
        Ok(decision)
    }

    /// Attach stops, lot and layer to a vote, or turn it into a hold
    fn size_entry(&self, decision: &mut Decision, vote: SignalVote, atr: f64, balance: Money) {
        let SignalVote {
            signal,
            confidence,
            detail,
        } = vote;

        let Some(direction) = signal.direction() else {
            decision.detail = Some(detail);
            return;
        };
        if !(atr.is_finite() && atr > 0.0) {
            debug!("No ATR for stop placement");
            decision.detail = Some(detail);
            return;
        }

        let (confidence, stop_distance, target_distance, lot_size, grid_id, detail) = match detail {
            DecisionDetail::Grid(mut grid) => {
                match self.plan_grid_entry(&grid, direction, confidence, atr, balance) {
                    Ok((sl, tp, lot, id)) => (confidence, sl, tp, lot, Some(id), DecisionDetail::Grid(grid)),
                    Err(reason) => {
                        grid.hold_reason = Some(reason);
                        decision.detail = Some(DecisionDetail::Grid(grid));
                        return;
                    }
                }
            }
            DecisionDetail::Trend(trend) => {
                let (sl, tp) = self.stops.trend_distances(atr);
                let lot = self.sizing.trend_lot_size(balance, sl);
                let confidence = (decision.regime.adx / 50.0).clamp(0.0, 1.0);
                (confidence, sl, tp, lot, None, DecisionDetail::Trend(trend))
            }
        };

        let sign = direction.sign();
        decision.signal = signal;
        decision.confidence = confidence.clamp(0.0, 1.0);
        decision.stop_distance = stop_distance;
        decision.target_distance = target_distance;
        decision.stop_loss = Some(decision.price - sign * stop_distance);
        decision.take_profit = Some(decision.price + sign * target_distance);
        decision.lot_size = lot_size;
        decision.grid_id = grid_id;
        decision.detail = Some(detail);
    }

    fn plan_grid_entry(
        &self,
        grid: &GridDecision,
        direction: Direction,
        confidence: f64,
        atr: f64,
        balance: Money,
    ) -> Result<(f64, f64, f64, GridId), GridHoldReason> {
        let (Some(level), Some(layout)) = (grid.level_index(), grid.grid.as_ref()) else {
            return Err(GridHoldReason::NoTouch);
        };
        let plan = self
            .executor
            .plan_entry(direction, level, confidence, balance)?;

        let (sl, tp, lot) = match self.grid_stop_mode {
            GridStopMode::Regime => {
                let (sl, tp) = self
                    .stops
                    .grid_distances(atr, layout.width, layout.volatility_regime);
                (sl, tp, plan.lot_size)
            }
            GridStopMode::DepthCalibrated => {
                let levels = match direction {
                    Direction::Long => layout.buy_levels.len(),
                    Direction::Short => layout.sell_levels.len(),
                };
                let layer = self.stops.grid_level_stops(level, levels, layout.width, atr);
                let lot = (plan.lot_size * layer.lot_multiplier)
                    .min(self.sizing.max_lot)
                    .max(self.sizing.min_lot);
                (layer.stop_distance, layer.target_distance, (lot * 100.0).round() / 100.0)
            }
        };
        Ok((sl, tp, lot, plan.grid_id))
    }

    /// Record a filled entry: occupy its grid layer and start the cooldown of
    /// the strategy that produced it. `time` is the bar the entry was taken on.
    pub fn on_position_opened(
        &mut self,
        grid_id: Option<GridId>,
        lot_size: f64,
        time: DateTime<Utc>,
    ) {
        match grid_id {
            Some(id) => {
                self.executor.mark_open(id, lot_size);
                self.ranging.on_entry(time);
            }
            None => self.trending.on_entry(time),
        }
    }

    /// Update streaks and free the layer once its position is fully closed
    pub fn on_trade_closed(&mut self, record: &TradeRecord) {
        self.executor.record_close(record.pnl);
        if !record.partial {
            if let Some(id) = record.grid_id {
                self.executor.release(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorEngine;
    use crate::CloseReason;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn series(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Bar::new_unchecked(
                    start + Duration::minutes(15 * i as i64),
                    *c,
                    c + 0.6,
                    c - 0.6,
                    *c,
                    0.0,
                )
            })
            .collect()
    }

    fn rows(config: &Config, bars: &[Bar]) -> Vec<IndicatorSet> {
        IndicatorEngine::new(config.indicators.clone(), config.regime.adx_period).compute(bars)
    }

    fn balance() -> Money {
        Money::from_decimal(dec!(10000))
    }

    #[test]
    fn test_short_history_is_neutral() {
        let config = Config::default();
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        let closes: Vec<f64> = (0..79).map(|i| 2000.0 + i as f64).collect();
        let bars = series(&closes);
        let decision = manager.evaluate(&bars, &rows(&config, &bars), balance()).unwrap();

        assert_eq!(decision.state, ManagerState::InsufficientData);
        assert_eq!(decision.market_type, MarketType::Ranging);
        assert_eq!(decision.signal, Signal::Hold);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.stop_loss.is_none());
    }

    #[test]
    fn test_preconditions() {
        let config = Config::default();
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        assert!(matches!(
            manager.evaluate(&[], &[], balance()),
            Err(EngineError::Precondition(_))
        ));

        let bars = series(&[2000.0; 100]);
        let ind = rows(&config, &bars);
        assert!(matches!(
            manager.evaluate(&bars, &ind[..99], balance()),
            Err(EngineError::Precondition(_))
        ));
    }

    #[test]
    fn test_rising_series_trends() {
        let config = Config::default();
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        let closes: Vec<f64> = (0..200).map(|i| 2000.0 + 2.0 * i as f64).collect();
        let bars = series(&closes);
        let decision = manager.evaluate(&bars, &rows(&config, &bars), balance()).unwrap();

        assert_eq!(decision.state, ManagerState::Trending);
        assert_eq!(decision.market_type, MarketType::Trending);
        assert!(decision.confidence >= 0.0 && decision.confidence <= 1.0);
        assert!(matches!(decision.detail, Some(DecisionDetail::Trend(_))));
        if decision.signal == Signal::Buy {
            let sl = decision.stop_loss.unwrap();
            assert!(sl < decision.price);
            approx::assert_relative_eq!(decision.price - sl, decision.stop_distance, epsilon = 1e-9);
            assert_eq!(decision.confidence, (decision.regime.adx / 50.0).clamp(0.0, 1.0));
        }
    }

    #[test]
    fn test_constant_series_holds() {
        let config = Config::default();
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        let bars: Vec<Bar> = series(&[2000.0; 150])
            .into_iter()
            .map(|b| Bar::new_unchecked(b.time, 2000.0, 2000.0, 2000.0, 2000.0, 0.0))
            .collect();
        let decision = manager.evaluate(&bars, &rows(&config, &bars), balance()).unwrap();
        assert_eq!(decision.state, ManagerState::Ranging);
        assert_eq!(decision.signal, Signal::Hold);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_unknown_strategy_fails_construction() {
        let mut config = Config::default();
        config.strategies.trending.name = "nope".to_string();
        assert!(matches!(
            AdaptiveStrategyManager::new(&config),
            Err(EngineError::UnknownStrategy { .. })
        ));
    }

    /// Choppy range around 2000 followed by a drop into the lower grid
    fn dip_closes(extra: &[f64]) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..200)
            .map(|i| if i % 2 == 0 { 2002.0 } else { 1998.0 })
            .collect();
        closes.push(1990.0);
        closes.extend_from_slice(extra);
        closes
    }

    fn dip_config() -> Config {
        let mut config = Config::default();
        config.strategies.ranging.params = serde_json::json!({ "min_touch_confidence": 0.3 });
        config
    }

    fn grid_hold_reason(decision: &Decision) -> Option<GridHoldReason> {
        match &decision.detail {
            Some(DecisionDetail::Grid(grid)) => grid.hold_reason,
            _ => None,
        }
    }

    #[test]
    fn test_rejected_entry_starts_no_cooldown() {
        let config = dip_config();
        let bars = series(&dip_closes(&[]));
        let ind = rows(&config, &bars);

        let mut fresh = AdaptiveStrategyManager::new(&config).unwrap();
        let decision = fresh.evaluate(&bars, &ind, balance()).unwrap();
        assert_eq!(decision.signal, Signal::Buy, "held: {:?}", grid_hold_reason(&decision));
        let touched = decision.grid_id.unwrap();

        // Same dip, but that layer is already filled
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        manager.on_position_opened(Some(touched), 0.01, bars[0].time);
        let decision = manager.evaluate(&bars, &ind, balance()).unwrap();
        assert_eq!(decision.signal, Signal::Hold);
        assert!(!decision.is_entry());
        assert_eq!(grid_hold_reason(&decision), Some(GridHoldReason::LayerOccupied));

        // 15 minutes later a deeper, free layer is touched and may still fire
        let bars = series(&dip_closes(&[1988.0]));
        let ind = rows(&config, &bars);
        let decision = manager.evaluate(&bars, &ind, balance()).unwrap();
        assert_eq!(decision.signal, Signal::Buy, "held: {:?}", grid_hold_reason(&decision));
        let deeper = decision.grid_id.unwrap();
        assert_eq!(deeper.direction, Direction::Long);
        assert_ne!(deeper, touched);

        // Filling it starts the cooldown
        manager.on_position_opened(Some(deeper), decision.lot_size, decision.time);
        let decision = manager.evaluate(&bars, &ind, balance()).unwrap();
        assert_eq!(decision.signal, Signal::Hold);
        assert_eq!(grid_hold_reason(&decision), Some(GridHoldReason::Cooldown));
    }

    #[test]
    fn test_history_gate_covers_strategy_windows() {
        let mut config = Config::default();
        config.strategies.ranging.params = serde_json::json!({ "range_window": 120 });
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();

        let closes: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 2002.0 } else { 1998.0 }).collect();
        let bars = series(&closes);
        let decision = manager.evaluate(&bars, &rows(&config, &bars), balance()).unwrap();
        assert_eq!(decision.state, ManagerState::InsufficientData);

        config.strategies.ranging.params = serde_json::json!({ "range_window": 600 });
        assert!(matches!(
            AdaptiveStrategyManager::new(&config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_trade_close_releases_layer() {
        let config = Config::default();
        let mut manager = AdaptiveStrategyManager::new(&config).unwrap();
        let id = GridId::new(Direction::Long, 1);
        let time = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        manager.on_position_opened(Some(id), 0.02, time);
        assert!(manager.executor().is_occupied(id));

        let mut record = TradeRecord {
            position_id: 1,
            direction: Direction::Long,
            entry_price: 2000.0,
            exit_price: 2010.0,
            entry_time: time,
            exit_time: time,
            lot_size: 0.01,
            stop_loss: 1985.0,
            take_profit: 2012.0,
            pnl: Money::from_decimal(dec!(10)),
            reason: CloseReason::TakeProfit,
            market_type: MarketType::Ranging,
            confidence: 0.6,
            grid_id: Some(id),
            partial: true,
        };
        manager.on_trade_closed(&record);
        assert!(manager.executor().is_occupied(id));
        assert_eq!(manager.executor().consecutive_wins(), 1);

        record.partial = false;
        manager.on_trade_closed(&record);
        assert!(!manager.executor().is_occupied(id));
        assert_eq!(manager.executor().consecutive_wins(), 2);
        approx::assert_relative_eq!(manager.exposure().long, 0.0);
    }
}
