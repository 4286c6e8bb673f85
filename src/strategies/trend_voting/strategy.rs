//! Trend Voting Strategy
//!
//! Four independent rule sets each cast a vote of -1, 0 or +1:
//! - Trend following: EMA stack, RSI guard and MACD histogram sign
//! - Mean reversion: RSI extreme at a Bollinger band edge
//! - Breakout: close crossing a band while ATR is expanding
//! - Momentum: momentum sign with %K crossing %D away from the extremes
//!
//! The sum decides the signal. A sleeping market (ATR well below its recent
//! mean) votes nothing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::TrendVotingConfig;
use crate::indicators::{tail_mean, IndicatorSet};
use crate::strategies::{DecisionDetail, MarketContext, SignalStrategy, SignalVote};
use crate::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Buy,
    Sell,
    #[default]
    Neutral,
    /// Suppressed by the sleep filter
    Sleeping,
}

impl Vote {
    pub fn value(self) -> i32 {
        match self {
            Vote::Buy => 1,
            Vote::Sell => -1,
            Vote::Neutral | Vote::Sleeping => 0,
        }
    }

    fn from_conditions(buy: bool, sell: bool) -> Self {
        match (buy, sell) {
            (true, false) => Vote::Buy,
            (false, true) => Vote::Sell,
            _ => Vote::Neutral,
        }
    }
}

/// Diagnostics of one vote
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendDecision {
    pub trend_following: Vote,
    pub mean_reversion: Vote,
    pub breakout: Vote,
    pub momentum: Vote,
    pub vote_sum: i32,
    pub sleeping: bool,
    pub adx: f64,
}

impl TrendDecision {
    pub fn votes(&self) -> [Vote; 4] {
        [
            self.trend_following,
            self.mean_reversion,
            self.breakout,
            self.momentum,
        ]
    }
}

pub struct TrendVotingStrategy {
    config: TrendVotingConfig,
}

impl TrendVotingStrategy {
    pub fn new(config: TrendVotingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrendVotingConfig {
        &self.config
    }

    fn trend_following_vote(&self, ind: &IndicatorSet) -> Vote {
        let c = &self.config;
        let bullish = ind.ema_fast > ind.ema_medium
            && ind.ema_medium > ind.ema_slow
            && ind.rsi < c.rsi_overbought
            && ind.macd_hist > 0.0;
        let bearish = ind.ema_fast < ind.ema_medium
            && ind.ema_medium < ind.ema_slow
            && ind.rsi > c.rsi_oversold
            && ind.macd_hist < 0.0;
        Vote::from_conditions(bullish, bearish)
    }

    fn mean_reversion_vote(&self, ind: &IndicatorSet) -> Vote {
        let c = &self.config;
        let Some(position) = ind.bb_position() else {
            return Vote::Neutral;
        };
        Vote::from_conditions(
            ind.rsi < c.rsi_oversold && position < c.bb_buy_position,
            ind.rsi > c.rsi_overbought && position > c.bb_sell_position,
        )
    }

    fn breakout_vote(&self, indicators: &[IndicatorSet]) -> Vote {
        let c = &self.config;
        let [.., prev, cur] = indicators else {
            return Vote::Neutral;
        };
        let atr: Vec<f64> = indicators.iter().map(|i| i.atr).collect();
        let Some(mean_atr) = tail_mean(&atr, c.breakout_atr_period.min(atr.len())) else {
            return Vote::Neutral;
        };
        if !(cur.atr > mean_atr * c.effective_breakout_factor()) {
            return Vote::Neutral;
        }
        Vote::from_conditions(
            prev.close <= prev.bb_upper && cur.close > cur.bb_upper,
            prev.close >= prev.bb_lower && cur.close < cur.bb_lower,
        )
    }

    fn momentum_vote(&self, ind: &IndicatorSet) -> Vote {
        let c = &self.config;
        let rsi_up = !c.momentum_rsi_confirmation || ind.rsi > 50.0;
        let rsi_down = !c.momentum_rsi_confirmation || ind.rsi < 50.0;
        Vote::from_conditions(
            ind.momentum > 0.0 && ind.stoch_k > ind.stoch_d && ind.stoch_k < c.stoch_overbought && rsi_up,
            ind.momentum < 0.0 && ind.stoch_k < ind.stoch_d && ind.stoch_k > c.stoch_oversold && rsi_down,
        )
    }

    /// ATR far below its recent mean
    fn is_sleeping(&self, indicators: &[IndicatorSet]) -> bool {
        let c = &self.config;
        if !c.sleep_filter_enabled {
            return false;
        }
        let atr: Vec<f64> = indicators.iter().map(|i| i.atr).collect();
        let (Some(current), Some(mean)) = (atr.last(), tail_mean(&atr, c.sleep_period.min(atr.len())))
        else {
            return false;
        };
        mean > 0.0 && *current < mean * c.sleep_ratio
    }

    /// Cast the four votes for the last indicator row
    pub fn vote(&self, indicators: &[IndicatorSet]) -> TrendDecision {
        let Some(latest) = indicators.last() else {
            return TrendDecision::default();
        };

        if self.is_sleeping(indicators) {
            return TrendDecision {
                trend_following: Vote::Sleeping,
                mean_reversion: Vote::Sleeping,
                breakout: Vote::Sleeping,
                momentum: Vote::Sleeping,
                vote_sum: 0,
                sleeping: true,
                adx: latest.adx,
            };
        }

        let mut decision = TrendDecision {
            trend_following: self.trend_following_vote(latest),
            mean_reversion: self.mean_reversion_vote(latest),
            breakout: self.breakout_vote(indicators),
            momentum: self.momentum_vote(latest),
            vote_sum: 0,
            sleeping: false,
            adx: latest.adx,
        };
        decision.vote_sum = decision.votes().iter().map(|v| v.value()).sum();
        decision
    }

    pub fn signal_for(&self, vote_sum: i32) -> Signal {
        if vote_sum >= self.config.buy_threshold {
            Signal::Buy
        } else if vote_sum <= self.config.sell_threshold {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

impl SignalStrategy for TrendVotingStrategy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn compute_signal(&mut self, ctx: &MarketContext<'_>) -> SignalVote {
        let decision = self.vote(ctx.indicators);
        let signal = self.signal_for(decision.vote_sum);
        let confidence = if signal.is_hold() {
            0.0
        } else {
            (decision.vote_sum.abs() as f64 / 4.0).clamp(0.0, 1.0)
        };

        debug!(
            sum = decision.vote_sum,
            sleeping = decision.sleeping,
            signal = ?signal,
            "Trend votes"
        );

        SignalVote {
            signal,
            confidence,
            detail: DecisionDetail::Trend(decision),
        }
    }

    fn required_history(&self) -> usize {
        self.config.breakout_atr_period.max(self.config.sleep_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> TrendVotingStrategy {
        TrendVotingStrategy::new(TrendVotingConfig::default())
    }

    /// Steady uptrend row: EMAs stacked, positive MACD and momentum, %K above %D
    fn bullish_row() -> IndicatorSet {
        IndicatorSet {
            close: 2010.0,
            ema_fast: 2008.0,
            ema_medium: 2004.0,
            ema_slow: 1995.0,
            rsi: 60.0,
            macd: 2.0,
            macd_signal: 1.5,
            macd_hist: 0.5,
            bb_upper: 2015.0,
            bb_middle: 2005.0,
            bb_lower: 1995.0,
            atr: 3.0,
            momentum: 6.0,
            stoch_k: 70.0,
            stoch_d: 60.0,
            adx: 32.0,
            plus_di: 30.0,
            minus_di: 12.0,
        }
    }

    fn bearish_row() -> IndicatorSet {
        IndicatorSet {
            close: 1990.0,
            ema_fast: 1992.0,
            ema_medium: 1996.0,
            ema_slow: 2005.0,
            rsi: 40.0,
            macd: -2.0,
            macd_signal: -1.5,
            macd_hist: -0.5,
            bb_upper: 2005.0,
            bb_middle: 1995.0,
            bb_lower: 1985.0,
            atr: 3.0,
            momentum: -6.0,
            stoch_k: 30.0,
            stoch_d: 40.0,
            adx: 32.0,
            plus_di: 12.0,
            minus_di: 30.0,
        }
    }

    #[test]
    fn test_bullish_votes_buy() {
        let rows = vec![bullish_row(); 30];
        let decision = strategy().vote(&rows);
        assert_eq!(decision.trend_following, Vote::Buy);
        assert_eq!(decision.momentum, Vote::Buy);
        assert_eq!(decision.mean_reversion, Vote::Neutral);
        assert_eq!(decision.breakout, Vote::Neutral);
        assert_eq!(decision.vote_sum, 2);
        assert_eq!(strategy().signal_for(decision.vote_sum), Signal::Buy);
    }

    #[test]
    fn test_bearish_votes_sell() {
        let rows = vec![bearish_row(); 30];
        let decision = strategy().vote(&rows);
        assert_eq!(decision.vote_sum, -2);
        assert_eq!(strategy().signal_for(decision.vote_sum), Signal::Sell);
    }

    #[test]
    fn test_single_vote_holds() {
        let mut row = bullish_row();
        row.stoch_k = 50.0;
        let decision = strategy().vote(&vec![row; 30]);
        assert_eq!(decision.vote_sum, 1);
        assert_eq!(strategy().signal_for(decision.vote_sum), Signal::Hold);
    }

    #[test]
    fn test_breakout_needs_expanding_atr() {
        let mut rows = vec![bullish_row(); 30];
        let mut last = bullish_row();
        last.close = 2016.0;
        rows.push(last);
        // Flat ATR: not above its mean
        assert_eq!(strategy().vote(&rows).breakout, Vote::Neutral);

        let last = rows.len() - 1;
        rows[last].atr = 4.5;
        assert_eq!(strategy().vote(&rows).breakout, Vote::Buy);
    }

    #[test]
    fn test_zero_width_band_has_no_mean_reversion_vote() {
        let mut row = bearish_row();
        row.rsi = 20.0;
        row.bb_upper = 1990.0;
        row.bb_lower = 1990.0;
        assert_eq!(strategy().mean_reversion_vote(&row), Vote::Neutral);

        row.bb_upper = 2010.0;
        row.bb_lower = 1989.0;
        assert_eq!(strategy().mean_reversion_vote(&row), Vote::Buy);
    }

    #[test]
    fn test_sleep_filter_silences_votes() {
        let mut rows = vec![bullish_row(); 30];
        let last = rows.len() - 1;
        rows[last].atr = 1.0;
        let decision = strategy().vote(&rows);
        assert!(decision.sleeping);
        assert!(decision.votes().iter().all(|v| *v == Vote::Sleeping));
        assert_eq!(decision.vote_sum, 0);

        let awake = TrendVotingStrategy::new(TrendVotingConfig {
            sleep_filter_enabled: false,
            ..TrendVotingConfig::default()
        });
        assert!(!awake.vote(&rows).sleeping);
    }

    #[test]
    fn test_momentum_rsi_confirmation() {
        let mut row = bullish_row();
        row.rsi = 45.0;
        assert_eq!(strategy().momentum_vote(&row), Vote::Buy);

        let confirming = TrendVotingStrategy::new(TrendVotingConfig {
            momentum_rsi_confirmation: true,
            ..TrendVotingConfig::default()
        });
        assert_eq!(confirming.momentum_vote(&row), Vote::Neutral);
    }
}
