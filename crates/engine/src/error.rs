use concord_core::ConfigError;
use concord_rules::RuleError;

/// Errors surfaced by engine construction or by an evaluation call.
///
/// Detector failures, bad input data and suppressions are never reported
/// here; they become ordinary negative results.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rule error: {0}")]
    Rules(#[from] RuleError),

    #[error("detector '{0}' registered twice")]
    DuplicateDetector(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Failure reported by a detector implementation.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("required channel missing: {0}")]
    MissingChannel(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("detector failed: {0}")]
    Failed(String),
}

/// Failure reported by the data-acquisition layer.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("data source error: {0}")]
    Other(String),
}
