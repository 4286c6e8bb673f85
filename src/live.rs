//! Live trading session
//!
//! Drives the same manager, book and account guards as the backtest from a
//! market-data feed. Each `poll_once` call:
//!
//! 1. takes the feed's closed bars and ingests only those strictly newer than
//!    the last one seen whose period has ended by `now`
//! 2. advances the incremental indicator state per new bar
//! 3. manages open positions at the current quote
//! 4. evaluates the latest bar once and opens at most one position
//!
//! Every resulting fill or stop move becomes an `OrderIntent` queued for the
//! order sink. The book is the session's model of the account and the sink
//! mirrors it to the broker. Intents leave the queue in order and only once
//! the sink accepts them; a rejected intent stays at the front and is retried
//! at the start of the next poll. Session state never waits on the sink, so a
//! broker outage cannot drop closed trades.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::book::{OpenRequest, PositionBook};
use crate::indicators::{IndicatorSet, IndicatorState};
use crate::manager::{AdaptiveStrategyManager, Decision};
use crate::risk::{RiskManager, RiskManagerConfig};
use crate::{
    Bar, CloseReason, Config, Direction, GridId, Money, Quote, StopAdjustmentKind, TradeRecord,
};

// =============================================================================
// Collaborators
// =============================================================================

/// Source of closed bars and the current bid/ask
pub trait MarketDataFeed {
    /// Recent closed bars, oldest first. Bars already delivered may repeat.
    fn closed_bars(&mut self) -> Result<Vec<Bar>>;
    fn quote(&mut self) -> Result<Quote>;
}

/// Receives the session's order intents
pub trait OrderSink {
    fn submit(&mut self, intent: &OrderIntent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderIntent {
    Open {
        position_id: u64,
        direction: Direction,
        lot_size: f64,
        stop_loss: f64,
        take_profit: f64,
        grid_id: Option<GridId>,
    },
    ModifyStop {
        position_id: u64,
        kind: StopAdjustmentKind,
        new_stop: f64,
    },
    /// Full close, or a partial one when `partial` is set
    Close {
        position_id: u64,
        lot_size: f64,
        price: f64,
        reason: CloseReason,
        partial: bool,
    },
}

impl OrderIntent {
    fn from_record(record: &TradeRecord) -> Self {
        OrderIntent::Close {
            position_id: record.position_id,
            lot_size: record.lot_size,
            price: record.exit_price,
            reason: record.reason,
            partial: record.partial,
        }
    }
}

/// What one poll did
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub new_bars: usize,
    pub decision: Option<Decision>,
    /// Intents produced by this poll, in order
    pub intents: Vec<OrderIntent>,
    pub closed: Vec<TradeRecord>,
    /// Intents the sink accepted during this poll, including retried ones
    pub delivered: usize,
    /// Rejection that left intents queued
    pub sink_error: Option<String>,
}

// =============================================================================
// Session
// =============================================================================

pub struct LiveSession<F, S> {
    feed: F,
    sink: S,
    manager: AdaptiveStrategyManager,
    risk: RiskManager,
    book: PositionBook,
    indicators: IndicatorState,
    bars: Vec<Bar>,
    rows: Vec<IndicatorSet>,
    pending: VecDeque<OrderIntent>,
    bar_duration: Duration,
    max_history: usize,
    max_positions: usize,
}

impl<F: MarketDataFeed, S: OrderSink> LiveSession<F, S> {
    pub fn new(config: &Config, feed: F, sink: S) -> Result<Self> {
        let manager = AdaptiveStrategyManager::new(config)?;
        let indicators = IndicatorState::new(&config.indicators, config.regime.adx_period)?;
        Ok(Self {
            feed,
            sink,
            manager,
            risk: RiskManagerConfig::from(&config.trading).build(),
            book: PositionBook::new(
                Money::from_f64(config.trading.initial_capital),
                config.trading.contract_size,
            ),
            indicators,
            bars: Vec::new(),
            rows: Vec::new(),
            pending: VecDeque::new(),
            bar_duration: Duration::minutes(i64::from(config.trading.timeframe_minutes)),
            max_history: config.regime.max_history,
            max_positions: config.trading.max_positions,
        })
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn manager(&self) -> &AdaptiveStrategyManager {
        &self.manager
    }

    pub fn last_bar_time(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.time)
    }

    /// Intents not yet accepted by the sink, oldest first
    pub fn pending_intents(&self) -> &VecDeque<OrderIntent> {
        &self.pending
    }

    /// Submit queued intents in order until the sink rejects one
    fn flush(&mut self, outcome: &mut PollOutcome) {
        while let Some(intent) = self.pending.front() {
            match self.sink.submit(intent) {
                Ok(()) => {
                    self.pending.pop_front();
                    outcome.delivered += 1;
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(
                        error = %error,
                        pending = self.pending.len(),
                        "Order sink rejected intent"
                    );
                    outcome.sink_error = Some(error);
                    break;
                }
            }
        }
    }

    /// Append closed bars newer than the last one seen; returns how many
    fn ingest(&mut self, bars: Vec<Bar>, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for bar in bars {
            if self.last_bar_time().is_some_and(|last| bar.time <= last) {
                continue;
            }
            if bar.time + self.bar_duration > now {
                debug!(time = %bar.time, "Skipping forming bar");
                continue;
            }
            if let Err(e) = bar.validate() {
                warn!(time = %bar.time, error = %e, "Rejected bar from feed");
                continue;
            }
            self.rows.push(self.indicators.next(&bar));
            self.bars.push(bar);
            added += 1;
        }

        // Keep twice the evaluation window so trimming stays rare
        if self.bars.len() > self.max_history * 2 {
            let excess = self.bars.len() - self.max_history;
            self.bars.drain(..excess);
            self.rows.drain(..excess);
        }
        added
    }

    /// One polling cycle at wall time `now`. Fails only when the feed does;
    /// sink rejections are reported in the outcome and retried.
    pub fn poll_once(&mut self, now: DateTime<Utc>) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();
        self.flush(&mut outcome);

        let incoming = self.feed.closed_bars().context("Market data feed unavailable")?;
        outcome.new_bars = self.ingest(incoming, now);
        if outcome.new_bars == 0 {
            return Ok(outcome);
        }

        let quote = self.feed.quote().context("Quote unavailable")?;
        let (Some(bar), Some(row)) = (self.bars.last(), self.rows.last()) else {
            return Ok(outcome);
        };
        let (time, atr) = (bar.time, row.atr);

        let update = self.book.manage(self.manager.stops(), &quote, atr, time);
        for (position_id, adjustment) in update.adjustments {
            outcome.intents.push(OrderIntent::ModifyStop {
                position_id,
                kind: adjustment.kind,
                new_stop: adjustment.new_stop,
            });
        }
        for record in update.closed {
            self.manager.on_trade_closed(&record);
            outcome.intents.push(OrderIntent::from_record(&record));
            outcome.closed.push(record);
        }

        self.pending.extend(outcome.intents.iter().cloned());
        self.risk.update_equity(self.book.equity(&quote), time);

        let start = self.bars.len().saturating_sub(self.max_history);
        let decision = self.manager.evaluate(
            &self.bars[start..],
            &self.rows[start..],
            self.book.balance(),
        )?;
        let room = self
            .risk
            .can_open_position_count(self.book.open_count(), self.max_positions);
        if let (true, Some(request)) = (room, OpenRequest::from_decision(&decision)) {
            let position = self.book.open(request, &quote, time);
            let intent = OrderIntent::Open {
                position_id: position.id,
                direction: position.direction,
                lot_size: position.lot_size,
                stop_loss: position.stop_loss,
                take_profit: position.take_profit,
                grid_id: position.grid_id,
            };
            self.pending.push_back(intent.clone());
            outcome.intents.push(intent);
            self.manager
                .on_position_opened(request.grid_id, request.lot_size, time);
        }
        outcome.decision = Some(decision);

        if outcome.sink_error.is_none() {
            self.flush(&mut outcome);
        }
        if !outcome.intents.is_empty() {
            info!(
                bars = outcome.new_bars,
                intents = outcome.intents.len(),
                delivered = outcome.delivered,
                pending = self.pending.len(),
                equity = %self.book.equity(&quote).round_dp(2),
                "Poll complete"
            );
        }
        Ok(outcome)
    }
}
