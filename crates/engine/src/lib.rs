//! Multi-detector consensus pipeline.
//!
//! An evaluation flows through fixed stages, each of which may end it early
//! with a complete negative result:
//!
//! quality gate → detector fan-out → consensus metrics → veto rules →
//! false-positive patterns → decision fusion → history.

pub mod consensus;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod history;
pub mod orchestrator;
pub mod quality;
pub mod source;

pub use consensus::ConsensusCalculator;
pub use detector::{Detector, DetectorRegistry};
pub use engine::{ConsensusEngine, ConsensusEngineBuilder};
pub use error::{DataSourceError, DetectorError, EngineError};
pub use fusion::DecisionFusion;
pub use history::{EvaluationHistory, HistoryStats};
pub use orchestrator::Orchestrator;
pub use quality::QualityGate;
pub use source::DataSource;
