//! Open position book
//!
//! Owns the list of open positions and the realised balance. Fills happen at
//! the quote: longs buy the ask and sell the bid, shorts the reverse. Each
//! close (partial or final) produces an immutable `TradeRecord` and credits
//! its P&L to the balance.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::manager::Decision;
use crate::stops::{InitialStops, StopsManager};
use crate::{
    realized_pnl, CloseReason, Direction, GridId, MarketType, Money, Position, Quote,
    StopAdjustment, TradeRecord,
};

/// Parameters of a new position; stop and target are distances from the fill
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenRequest {
    pub direction: Direction,
    pub lot_size: f64,
    pub stop_distance: f64,
    pub target_distance: f64,
    pub market_type: MarketType,
    pub confidence: f64,
    pub grid_id: Option<GridId>,
}

impl OpenRequest {
    /// The entry a decision asks for, if any
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        if !decision.is_entry() {
            return None;
        }
        Some(Self {
            direction: decision.signal.direction()?,
            lot_size: decision.lot_size,
            stop_distance: decision.stop_distance,
            target_distance: decision.target_distance,
            market_type: decision.market_type,
            confidence: decision.confidence,
            grid_id: decision.grid_id,
        })
    }
}

/// Result of one management pass over the book
#[derive(Debug, Clone, Default)]
pub struct BookUpdate {
    pub closed: Vec<TradeRecord>,
    /// (position id, adjustment)
    pub adjustments: Vec<(u64, StopAdjustment)>,
}

#[derive(Debug, Clone)]
pub struct PositionBook {
    positions: Vec<Position>,
    next_id: u64,
    balance: Money,
    contract_size: f64,
}

impl PositionBook {
    pub fn new(initial_balance: Money, contract_size: f64) -> Self {
        Self {
            positions: Vec::new(),
            next_id: 1,
            balance: initial_balance,
            contract_size,
        }
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Realised balance
    pub fn balance(&self) -> Money {
        self.balance
    }

    /// Open a position at the quote
    pub fn open(&mut self, request: OpenRequest, quote: &Quote, time: DateTime<Utc>) -> &Position {
        let entry = quote.entry_price(request.direction);
        let stops = InitialStops::new(
            request.direction,
            entry,
            request.stop_distance,
            request.target_distance,
        );
        let id = self.next_id;
        self.next_id += 1;

        info!(
            id,
            direction = %request.direction,
            entry = format!("{:.2}", entry),
            sl = format!("{:.2}", stops.stop_loss),
            tp = format!("{:.2}", stops.take_profit),
            lot = request.lot_size,
            grid = ?request.grid_id.map(|g| g.to_string()),
            "Position opened"
        );

        let index = self.positions.len();
        self.positions.push(Position {
            id,
            direction: request.direction,
            entry_price: entry,
            entry_time: time,
            lot_size: request.lot_size,
            initial_lot_size: request.lot_size,
            stop_loss: stops.stop_loss,
            initial_stop_loss: stops.stop_loss,
            take_profit: stops.take_profit,
            breakeven_triggered: false,
            trailing_active: false,
            best_favorable_price: entry,
            adjustment_history: Vec::new(),
            market_type: request.market_type,
            confidence: request.confidence,
            partial_tp_triggered: false,
            grid_id: request.grid_id,
        });
        &self.positions[index]
    }

    fn record(
        &mut self,
        position: &Position,
        lot: f64,
        exit_price: f64,
        time: DateTime<Utc>,
        reason: CloseReason,
        partial: bool,
    ) -> TradeRecord {
        let pnl = realized_pnl(
            position.direction,
            position.entry_price,
            exit_price,
            lot,
            self.contract_size,
        );
        self.balance += pnl;

        info!(
            id = position.id,
            reason = %reason,
            exit = format!("{:.2}", exit_price),
            lot,
            pnl = %pnl.round_dp(2),
            partial,
            "Position closed"
        );

        TradeRecord {
            position_id: position.id,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: time,
            lot_size: lot,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            pnl,
            reason,
            market_type: position.market_type,
            confidence: position.confidence,
            grid_id: position.grid_id,
            partial,
        }
    }

    /// Run stop management on every position and settle what it closes
    pub fn manage(
        &mut self,
        stops: &StopsManager,
        quote: &Quote,
        atr: f64,
        time: DateTime<Utc>,
    ) -> BookUpdate {
        let mut update = BookUpdate::default();
        let positions = std::mem::take(&mut self.positions);
        let mut still_open = Vec::with_capacity(positions.len());

        for mut position in positions {
            let price = quote.exit_price(position.direction);
            let outcome = stops.manage(&mut position, price, atr, time);
            update
                .adjustments
                .extend(outcome.adjustments.into_iter().map(|a| (position.id, a)));

            if let (Some(lot), None) = (outcome.partial_close, outcome.exit) {
                let record =
                    self.record(&position, lot, price, time, CloseReason::TakeProfit, true);
                position.lot_size = ((position.lot_size - lot) * 100.0).round() / 100.0;
                update.closed.push(record);
            }

            match outcome.exit {
                Some(reason) => {
                    let lot = position.lot_size;
                    update
                        .closed
                        .push(self.record(&position, lot, price, time, reason, false));
                }
                None => still_open.push(position),
            }
        }

        self.positions = still_open;
        update
    }

    /// Close everything at the quote
    pub fn close_all(&mut self, quote: &Quote, time: DateTime<Utc>, reason: CloseReason) -> Vec<TradeRecord> {
        let positions = std::mem::take(&mut self.positions);
        positions
            .iter()
            .map(|p| {
                let price = quote.exit_price(p.direction);
                self.record(p, p.lot_size, price, time, reason, false)
            })
            .collect()
    }

    /// Mark-to-market P&L of open positions
    pub fn unrealized(&self, quote: &Quote) -> Money {
        self.positions
            .iter()
            .map(|p| p.unrealized_pnl(quote.exit_price(p.direction), self.contract_size))
            .sum()
    }

    /// Balance plus unrealised P&L
    pub fn equity(&self, quote: &Quote) -> Money {
        self.balance + self.unrealized(quote)
    }

    /// Net open lots (long positive)
    pub fn net_exposure(&self) -> f64 {
        self.positions
            .iter()
            .map(|p| p.lot_size * p.direction.sign())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopsConfig;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, minute, 0).unwrap()
    }

    fn book() -> PositionBook {
        PositionBook::new(Money::from_decimal(dec!(10000)), 100.0)
    }

    fn request(direction: Direction, lot: f64) -> OpenRequest {
        OpenRequest {
            direction,
            lot_size: lot,
            stop_distance: 15.0,
            target_distance: 30.0,
            market_type: MarketType::Ranging,
            confidence: 0.6,
            grid_id: Some(GridId::new(direction, 0)),
        }
    }

    #[test]
    fn test_spread_accounting_long() {
        let mut book = book();
        let quote = Quote::from_close(2000.0, 0.3);
        let entry = book.open(request(Direction::Long, 0.01), &quote, t(0)).entry_price;
        assert_relative_eq!(entry, 2000.15);

        let exit_quote = Quote::from_close(2010.0, 0.3);
        let records = book.close_all(&exit_quote, t(15), CloseReason::EndOfData);
        assert_eq!(records.len(), 1);
        // (2009.85 - 2000.15) * 0.01 * 100
        assert_relative_eq!(records[0].pnl.to_f64(), 9.70, epsilon = 1e-9);
        assert_relative_eq!(book.balance().to_f64(), 10_009.70, epsilon = 1e-9);
        assert_eq!(book.open_count(), 0);
    }

    #[test]
    fn test_short_fills_mirror() {
        let mut book = book();
        let quote = Quote::from_close(2000.0, 0.3);
        let pos = book.open(request(Direction::Short, 0.01), &quote, t(0));
        assert_relative_eq!(pos.entry_price, 1999.85);
        assert_relative_eq!(pos.stop_loss, 2014.85);
        assert_relative_eq!(pos.take_profit, 1969.85);

        // Unrealised at the ask
        let later = Quote::from_close(1990.0, 0.3);
        assert_relative_eq!(book.unrealized(&later).to_f64(), 9.70, epsilon = 1e-9);
    }

    #[test]
    fn test_manage_closes_at_stop() {
        let mut book = book();
        let stops = StopsManager::new(StopsConfig::default(), 0.01);
        book.open(request(Direction::Long, 0.05), &Quote::from_close(2000.0, 0.3), t(0));

        let update = book.manage(&stops, &Quote::from_close(1980.0, 0.3), 10.0, t(15));
        assert_eq!(update.closed.len(), 1);
        assert_eq!(update.closed[0].reason, CloseReason::StopLoss);
        assert!(update.closed[0].pnl.is_negative());
        assert_eq!(book.open_count(), 0);
    }

    #[test]
    fn test_partial_then_final_close() {
        let mut book = book();
        let stops = StopsManager::new(StopsConfig::default(), 0.01);
        book.open(request(Direction::Long, 0.10), &Quote::from_close(2000.0, 0.3), t(0));

        // 25 points in profit at the bid: past 80% of the 30 point target
        let update = book.manage(&stops, &Quote::from_close(2025.3, 0.3), 10.0, t(15));
        assert_eq!(update.closed.len(), 1);
        assert!(update.closed[0].partial);
        assert_eq!(update.closed[0].reason, CloseReason::TakeProfit);
        assert_relative_eq!(update.closed[0].lot_size, 0.05);
        assert_relative_eq!(book.positions()[0].lot_size, 0.05);
        assert!(!update.adjustments.is_empty());

        let update = book.manage(&stops, &Quote::from_close(2031.0, 0.3), 10.0, t(30));
        assert_eq!(update.closed.len(), 1);
        assert!(!update.closed[0].partial);
        assert_eq!(update.closed[0].reason, CloseReason::TakeProfit);
        assert_eq!(book.open_count(), 0);
    }

    #[test]
    fn test_equity_and_exposure() {
        let mut book = book();
        let quote = Quote::from_close(2000.0, 0.0);
        book.open(request(Direction::Long, 0.10), &quote, t(0));
        book.open(request(Direction::Short, 0.04), &quote, t(0));
        assert_relative_eq!(book.net_exposure(), 0.06, epsilon = 1e-12);
        assert_eq!(book.equity(&quote), book.balance());
        assert_eq!(book.positions()[1].id, 2);
    }
}
