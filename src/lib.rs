//! Regime Trader
//!
//! An adaptive trading-decision engine for a single instrument. Each closed
//! bar is classified as ranging or trending from ADX/DI; ranging markets are
//! traded by a statistical grid with layered pyramiding, trending markets by
//! a four-vote trend model. Stops, partial take-profit and account guards
//! are shared by the backtest simulator and the live session.
//!
//! ## Example
//! ```no_run
//! use regime_trader::backtest::BacktestSimulator;
//! use regime_trader::{data, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/xauusd_15m.json")?;
//!     let bars = data::load_csv("data/XAUUSD_15m.csv")?;
//!     let result = BacktestSimulator::new(config)?.run(&bars)?;
//!     println!("Return: {:.2}%", result.metrics.total_return);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod book;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod live;
pub mod manager;
pub mod monthly_pnl;
pub mod regime;
pub mod risk;
pub mod stops;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use types::*;
