pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, PatternConfig, QualityConfig, QualityWeights};
pub use error::*;
pub use types::*;
