//! Regime trader - main entry point
//!
//! This binary provides two subcommands:
//! - backtest: Replay a CSV of bars through the decision engine
//! - analyze: Report the current market regime and decision for a CSV

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "regime-trader")]
#[command(about = "Adaptive regime trading decisions with deterministic backtesting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/xauusd_15m.json")]
        config: String,

        /// CSV of bars (overrides backtest.data_file)
        #[arg(short, long)]
        data: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Ranging strategy name (overrides config file)
        #[arg(long)]
        ranging: Option<String>,

        /// Trending strategy name (overrides config file)
        #[arg(long)]
        trending: Option<String>,

        /// Write the trade log to this CSV file
        #[arg(long)]
        trades_out: Option<String>,

        /// Print the monthly P&L matrix without colors
        #[arg(long)]
        no_color: bool,
    },

    /// Analyze the latest bars of a CSV
    Analyze {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// CSV of bars
        #[arg(short, long)]
        data: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Analyze { .. } => "analyze",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            capital,
            ranging,
            trending,
            trades_out,
            no_color,
        } => commands::backtest::run(commands::backtest::BacktestArgs {
            config_path: config,
            data_override: data,
            capital_override: capital,
            ranging_override: ranging,
            trending_override: trending,
            trades_out,
            colored: !no_color,
        }),

        Commands::Analyze { config, data } => commands::analyze::run(config, data),
    }
}
