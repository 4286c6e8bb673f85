//! Backtest command implementation

use anyhow::{Context, Result};
use regime_trader::backtest::{BacktestResult, BacktestSimulator};
use regime_trader::config::StrategySlot;
use regime_trader::strategies::available_strategies;
use regime_trader::{data, Config, TradeRecord};
use serde::Serialize;
use tracing::info;

pub struct BacktestArgs {
    pub config_path: String,
    pub data_override: Option<String>,
    pub capital_override: Option<f64>,
    pub ranging_override: Option<String>,
    pub trending_override: Option<String>,
    pub trades_out: Option<String>,
    pub colored: bool,
}

/// Flat trade-log row for CSV output
#[derive(Serialize)]
struct TradeRow<'a> {
    position_id: u64,
    direction: String,
    entry_time: String,
    exit_time: String,
    entry_price: f64,
    exit_price: f64,
    lot_size: f64,
    stop_loss: f64,
    take_profit: f64,
    pnl: String,
    reason: String,
    market_type: String,
    confidence: f64,
    grid_id: &'a str,
    partial: bool,
}

fn write_trades(path: &str, trades: &[TradeRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path))?;
    for trade in trades {
        let grid_id = trade.grid_id.map(|g| g.to_string()).unwrap_or_default();
        writer.serialize(TradeRow {
            position_id: trade.position_id,
            direction: trade.direction.to_string(),
            entry_time: trade.entry_time.to_rfc3339(),
            exit_time: trade.exit_time.to_rfc3339(),
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            lot_size: trade.lot_size,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            pnl: trade.pnl.round_dp(2).to_string(),
            reason: trade.reason.to_string(),
            market_type: trade.market_type.to_string(),
            confidence: trade.confidence,
            grid_id: &grid_id,
            partial: trade.partial,
        })?;
    }
    writer.flush()?;
    info!("Wrote {} trades to {}", trades.len(), path);
    Ok(())
}

fn print_summary(config: &Config, result: &BacktestResult) {
    let m = &result.metrics;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS ({})", config.trading.symbol);
    println!("{}", "=".repeat(60));
    println!("Strategies:         {} / {}", config.strategies.ranging.name, config.strategies.trending.name);
    println!("Bars Processed:     {}", result.bars_processed);
    println!("Initial Capital:    {:.2}", result.initial_capital.to_f64());
    println!("Final Balance:      {:.2}", result.final_balance.to_f64());
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2} ({:.2}%)", m.max_drawdown, m.max_drawdown_pct);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Entries:            {}", result.entries);
    println!("Halted Bars:        {}", result.halted_bars);
    println!("{}", "=".repeat(60));
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    if let Some(capital) = args.capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.trading.initial_capital = capital;
    }
    if let Some(name) = args.ranging_override {
        info!("Overriding ranging strategy to: {}", name);
        config.strategies.ranging = StrategySlot::new(&name);
    }
    if let Some(name) = args.trending_override {
        info!("Overriding trending strategy to: {}", name);
        config.strategies.trending = StrategySlot::new(&name);
    }
    if let Some(path) = args.data_override {
        config.backtest.data_file = Some(path);
    }

    let data_file = config
        .backtest
        .data_file
        .clone()
        .context("No data file: pass --data or set backtest.data_file")?;
    let bars = data::load_csv(&data_file)?;

    let mut simulator = BacktestSimulator::new(config.clone()).with_context(|| {
        format!(
            "Failed to build strategies (available: {})",
            available_strategies().join(", ")
        )
    })?;

    info!("Running backtest...");
    let result = simulator.run(&bars)?;

    print_summary(&config, &result);
    if args.colored {
        println!("{}", result.monthly.render_colored());
    } else {
        println!("{}", result.monthly.render());
    }

    if let Some(path) = args.trades_out {
        write_trades(&path, &result.trades)?;
    }

    info!("Backtest completed successfully");
    Ok(())
}
