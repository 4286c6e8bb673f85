//! Trend Voting Strategy
//!
//! Threshold vote of four rule-based sub-signals for trending markets.

mod config;
mod strategy;

pub use config::TrendVotingConfig;
pub use strategy::{TrendDecision, TrendVotingStrategy, Vote};

use crate::config::StrategySlot;
use crate::error::{EngineError, EngineResult};
use crate::strategies::SignalStrategy;

pub const NAME: &str = "trend_voting";

/// Create strategy from its slot (called by registry)
pub fn create(slot: &StrategySlot) -> EngineResult<Box<dyn SignalStrategy>> {
    let config: TrendVotingConfig = serde_json::from_value(slot.params.clone())
        .map_err(|source| EngineError::StrategyParams {
            strategy: NAME,
            source,
        })?;
    Ok(Box::new(TrendVotingStrategy::new(config)))
}
