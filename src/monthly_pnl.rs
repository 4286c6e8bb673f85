//! Monthly P&L breakdown
//!
//! Realised P&L of trade records bucketed by calendar month of the exit,
//! rendered as a year x month matrix with yearly totals.

use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;

use crate::{Money, TradeRecord};

const WIDTH: usize = 120;
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// P&L of one calendar month
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyPnL {
    pub pnl: Money,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

impl MonthlyPnL {
    fn add(&mut self, pnl: Money) {
        self.pnl += pnl;
        self.trade_count += 1;
        if pnl.is_positive() {
            self.winning_trades += 1;
        } else {
            self.losing_trades += 1;
        }
    }

    /// Winning share of the month's trades, in percent
    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / self.trade_count as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(dt.year(), dt.month())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonthlyPnLMatrix {
    data: BTreeMap<YearMonth, MonthlyPnL>,
}

impl MonthlyPnLMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut matrix = Self::new();
        for trade in trades {
            matrix.record(trade);
        }
        matrix
    }

    /// Add one closed trade
    pub fn record(&mut self, trade: &TradeRecord) {
        self.data
            .entry(YearMonth::from_datetime(trade.exit_time))
            .or_default()
            .add(trade.pnl);
    }

    pub fn get(&self, year: i32, month: u32) -> Option<&MonthlyPnL> {
        self.data.get(&YearMonth::new(year, month))
    }

    pub fn months(&self) -> impl Iterator<Item = (&YearMonth, &MonthlyPnL)> {
        self.data.iter()
    }

    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.data.keys().map(|ym| ym.year).collect();
        years.dedup();
        years
    }

    pub fn yearly_total(&self, year: i32) -> Money {
        self.data
            .iter()
            .filter(|(ym, _)| ym.year == year)
            .map(|(_, month)| month.pnl)
            .sum()
    }

    pub fn total_pnl(&self) -> Money {
        self.data.values().map(|month| month.pnl).sum()
    }

    /// Share of months with positive P&L, in percent
    pub fn monthly_win_rate(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let profitable = self.data.values().filter(|m| m.pnl.is_positive()).count();
        profitable as f64 / self.data.len() as f64 * 100.0
    }

    pub fn render(&self) -> String {
        self.render_with(false)
    }

    /// Render with ANSI color codes for terminal display
    pub fn render_colored(&self) -> String {
        self.render_with(true)
    }

    fn render_with(&self, colored: bool) -> String {
        if self.data.is_empty() {
            return "No trades to display monthly P&L matrix.".to_string();
        }

        let (bold, reset) = if colored { (BOLD, RESET) } else { ("", "") };
        let paint = |value: Money, width: usize| {
            let text = format!("{:>width$.2}", value.to_f64(), width = width);
            match (colored, value.is_positive()) {
                (false, _) => text,
                (true, true) => format!("{GREEN}{text}{RESET}"),
                (true, false) => format!("{RED}{text}{RESET}"),
            }
        };

        let mut out = String::new();
        out.push_str(&format!("\n{bold}{}{reset}\n", "=".repeat(WIDTH)));
        out.push_str(&format!("{bold}MONTHLY P&L MATRIX{reset}\n"));
        out.push_str(&format!("{bold}{}{reset}\n", "=".repeat(WIDTH)));

        let months = [
            "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
        ];
        out.push_str(&format!("{bold}{:>6} │", "Year"));
        for name in months {
            out.push_str(&format!(" {:>10} │", name));
        }
        out.push_str(&format!(" {:>12}{reset}\n", "Total"));
        out.push_str(&format!("{}\n", "-".repeat(WIDTH)));

        for year in self.years() {
            out.push_str(&format!("{:>6} │", year));
            for month in 1..=12 {
                let cell = self
                    .get(year, month)
                    .map(|m| paint(m.pnl, 10))
                    .unwrap_or_else(|| " ".repeat(10));
                out.push_str(&format!(" {} │", cell));
            }
            out.push_str(&format!(" {}\n", paint(self.yearly_total(year), 12)));
        }

        out.push_str(&format!("{}\n", "=".repeat(WIDTH)));
        out.push_str(&format!(
            "{bold}Total P&L: {}{reset}\n",
            paint(self.total_pnl(), 0)
        ));

        let profitable = self.data.values().filter(|m| m.pnl.is_positive()).count();
        out.push_str(&format!(
            "{bold}Monthly Win Rate: {:.1}% ({} profitable / {} total months){reset}\n",
            self.monthly_win_rate(),
            profitable,
            self.data.len()
        ));
        out.push_str(&format!("{}\n", "=".repeat(WIDTH)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CloseReason, Direction, MarketType};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(year: i32, month: u32, day: u32, pnl: Decimal) -> TradeRecord {
        let dt = Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap();
        TradeRecord {
            position_id: 1,
            direction: Direction::Long,
            entry_price: 2000.0,
            exit_price: 2000.0,
            entry_time: dt,
            exit_time: dt,
            lot_size: 0.01,
            stop_loss: 1990.0,
            take_profit: 2020.0,
            pnl: Money::from_decimal(pnl),
            reason: CloseReason::TakeProfit,
            market_type: MarketType::Ranging,
            confidence: 0.5,
            grid_id: None,
            partial: false,
        }
    }

    #[test]
    fn test_monthly_pnl_aggregation() {
        let trades = vec![
            trade(2024, 1, 15, dec!(100.25)),
            trade(2024, 1, 20, dec!(-50)),
            trade(2024, 2, 10, dec!(200)),
        ];
        let matrix = MonthlyPnLMatrix::from_trades(&trades);

        let jan = matrix.get(2024, 1).unwrap();
        assert_eq!(jan.pnl, Money::from_decimal(dec!(50.25)));
        assert_eq!(jan.trade_count, 2);
        assert_eq!(jan.winning_trades, 1);
        assert_eq!(jan.losing_trades, 1);
        assert_eq!(jan.win_rate(), 50.0);

        assert_eq!(matrix.get(2024, 2).unwrap().trade_count, 1);
        assert!(matrix.get(2024, 3).is_none());
    }

    #[test]
    fn test_multi_year_totals() {
        let trades = vec![
            trade(2023, 12, 15, dec!(100)),
            trade(2024, 1, 15, dec!(200)),
            trade(2024, 6, 20, dec!(-50)),
            trade(2025, 1, 10, dec!(150)),
        ];
        let matrix = MonthlyPnLMatrix::from_trades(&trades);

        assert_eq!(matrix.years(), vec![2023, 2024, 2025]);
        assert_eq!(matrix.yearly_total(2024), Money::from_decimal(dec!(150)));
        assert_eq!(matrix.total_pnl(), Money::from_decimal(dec!(400)));
        assert_eq!(matrix.monthly_win_rate(), 75.0);
    }

    #[test]
    fn test_render() {
        let matrix = MonthlyPnLMatrix::from_trades(&[trade(2024, 3, 1, dec!(12.5))]);
        let text = matrix.render();
        assert!(text.contains("MONTHLY P&L MATRIX"));
        assert!(text.contains("2024"));
        assert!(text.contains("12.50"));
        assert!(!text.contains('\x1b'));
        assert!(matrix.render_colored().contains(GREEN));
    }

    #[test]
    fn test_empty_matrix() {
        let matrix = MonthlyPnLMatrix::from_trades(&[]);
        assert_eq!(matrix.total_pnl(), Money::ZERO);
        assert!(matrix.years().is_empty());
        assert!(matrix.render().starts_with("No trades"));
    }
}
