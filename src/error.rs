//! Library error type
//!
//! Only precondition violations and configuration problems escape the
//! decision pipeline. Short history, degenerate numerics and an unbuildable
//! grid are handled in place by returning a neutral decision.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("grid construction failed: {buy_levels} buy / {sell_levels} sell levels (minimum {minimum})")]
    GridConstruction {
        buy_levels: usize,
        sell_levels: usize,
        minimum: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown strategy '{name}'. Available: {available}")]
    UnknownStrategy { name: String, available: String },

    #[error("failed to parse parameters for '{strategy}': {source}")]
    StrategyParams {
        strategy: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
