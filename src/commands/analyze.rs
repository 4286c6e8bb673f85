//! Analyze command implementation
//!
//! Prints the market regime of a bar series, the decision the engine would
//! take on its last bar and, in a ranging market, the grid and its per-layer
//! stop table.

use anyhow::{Context, Result};
use regime_trader::indicators::IndicatorEngine;
use regime_trader::manager::{AdaptiveStrategyManager, Decision};
use regime_trader::regime::{market_report, RegimeClassifier};
use regime_trader::stops::StopsManager;
use regime_trader::strategies::DecisionDetail;
use regime_trader::{data, Config, Money};
use tracing::info;

fn print_decision(decision: &Decision) {
    println!("{}", "=".repeat(60));
    println!("DECISION @ {}", decision.time);
    println!("{}", "=".repeat(60));
    println!("State:        {}", decision.state);
    println!("Price:        {:.2}", decision.price);
    println!("Signal:       {}", decision.signal.value());
    println!("Confidence:   {:.2}", decision.confidence);
    if let (Some(sl), Some(tp)) = (decision.stop_loss, decision.take_profit) {
        println!("Stop Loss:    {:.2}", sl);
        println!("Take Profit:  {:.2}", tp);
        println!("Lot Size:     {:.2}", decision.lot_size);
    }
    if let Some(id) = decision.grid_id {
        println!("Grid Layer:   {}", id);
    }
}

fn print_detail(detail: &DecisionDetail, stops: &StopsManager, atr: f64) {
    match detail {
        DecisionDetail::Grid(grid) => {
            println!("Z-Score:      {:.3}", grid.mean_reversion.zscore);
            println!("Autocorr:     {:.3}", grid.autocorrelation);
            println!("Edge:         {:.3}", grid.edge_probability);
            println!("Volatility:   {}", grid.volatility_regime);
            if let Some(reason) = grid.hold_reason {
                println!("Hold Reason:  {:?}", reason);
            }
            let Some(layout) = &grid.grid else {
                return;
            };
            println!("{}", "-".repeat(60));
            println!("Grid center {:.2}, width {:.2}", layout.center, layout.width);
            let fmt_levels = |levels: &[f64]| {
                levels
                    .iter()
                    .map(|l| format!("{:.2}", l))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            println!("Buy levels:   {}", fmt_levels(&layout.buy_levels));
            println!("Sell levels:  {}", fmt_levels(&layout.sell_levels));

            println!("{}", "-".repeat(60));
            println!(
                "{:>5} {:>8} {:>8} {:>8} {:>6} {:>6} {:>8}",
                "Layer", "Depth", "SL", "TP", "Lots", "R:R", "E[ret]"
            );
            for layer in stops.grid_stop_report(layout.buy_levels.len(), layout.width, atr) {
                println!(
                    "{:>5} {:>8.2} {:>8.2} {:>8.2} {:>6.2} {:>6.2} {:>8.2}",
                    layer.level,
                    layer.depth_ratio,
                    layer.stop_distance,
                    layer.target_distance,
                    layer.lot_multiplier,
                    layer.risk_reward,
                    layer.expected_return
                );
            }
        }
        DecisionDetail::Trend(trend) => {
            println!(
                "Votes:        trend {} / reversion {} / breakout {} / momentum {}",
                trend.trend_following.value(),
                trend.mean_reversion.value(),
                trend.breakout.value(),
                trend.momentum.value()
            );
            println!("Vote Sum:     {}", trend.vote_sum);
            println!("Sleeping:     {}", trend.sleeping);
        }
    }
}

pub fn run(config_path: Option<String>, data_path: String) -> Result<()> {
    let config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let bars = data::load_csv(&data_path)?;

    let classifier = RegimeClassifier::new(config.regime.clone());
    let regime = classifier
        .analyze(&bars)
        .context("Not enough bars to classify the market")?;
    println!("{}", market_report(&regime));

    let start = bars.len().saturating_sub(config.regime.max_history);
    let window = &bars[start..];
    let rows = IndicatorEngine::new(config.indicators.clone(), config.regime.adx_period)
        .compute(window);

    let mut manager = AdaptiveStrategyManager::new(&config)?;
    let balance = Money::from_f64(config.trading.initial_capital);
    let decision = manager.evaluate(window, &rows, balance)?;
    info!(signal = decision.signal.value(), state = %decision.state, "Analysis complete");

    print_decision(&decision);
    if let (Some(detail), Some(row)) = (&decision.detail, rows.last()) {
        print_detail(detail, manager.stops(), row.atr);
    }
    println!("{}", "=".repeat(60));
    Ok(())
}
