//! Statistical Grid Strategy
//!
//! Mean-reversion grid for ranging markets, plus the layer executor that
//! turns its signals into sized, non-overlapping grid positions.

mod config;
mod executor;
mod grid;
mod statistics;
mod strategy;

pub use config::{CooldownClock, StatisticalGridConfig, TimeWindow};
pub use executor::{GridExecutor, GridExposure, LayerPlan};
pub use grid::{build_grid, level_count, Grid, Touch};
pub use statistics::{
    lag1_autocorrelation, mean_reversion, reversal_check, volatility_regime, MeanReversion,
    ReversalCheck,
};
pub use strategy::{GateConditions, GridDecision, GridHoldReason, StatisticalGridStrategy};

use crate::config::StrategySlot;
use crate::error::{EngineError, EngineResult};
use crate::strategies::{merge_params, SignalStrategy};

pub const NAME: &str = "statistical_grid";
pub const TUNED_NAME: &str = "statistical_grid_tuned";

/// Create strategy from its slot (called by registry)
pub fn create(slot: &StrategySlot) -> EngineResult<Box<dyn SignalStrategy>> {
    let config: StatisticalGridConfig = serde_json::from_value(slot.params.clone())
        .map_err(|source| EngineError::StrategyParams {
            strategy: NAME,
            source,
        })?;
    Ok(Box::new(StatisticalGridStrategy::new(config)))
}

/// Tuned profile; slot params override the tuned values
pub fn create_tuned(slot: &StrategySlot) -> EngineResult<Box<dyn SignalStrategy>> {
    let params_error = |source| EngineError::StrategyParams {
        strategy: TUNED_NAME,
        source,
    };
    let base = serde_json::to_value(StatisticalGridConfig::tuned()).map_err(params_error)?;
    let config: StatisticalGridConfig =
        serde_json::from_value(merge_params(base, &slot.params)).map_err(params_error)?;
    Ok(Box::new(StatisticalGridStrategy::with_name(TUNED_NAME, config)))
}
