//! Pluggable detector contract and the registry the orchestrator runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use concord_core::{Candidate, DataSnapshot, DetectorResult};

use crate::error::{DetectorError, EngineError};

/// An independent evaluator producing one verdict per candidate.
///
/// Implementations are treated as untrusted: they may be slow, return an
/// error, panic, or report out-of-range numbers. The orchestrator absorbs
/// all of these.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identity used as the key in result maps and weight tables.
    fn id(&self) -> &str;

    async fn evaluate(
        &self,
        candidate: &Candidate,
        snapshot: &DataSnapshot,
    ) -> Result<DetectorResult, DetectorError>;
}

/// Detectors keyed by identity. Identities are unique.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<String, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) -> Result<(), EngineError> {
        let id = detector.id().to_string();
        if self.detectors.contains_key(&id) {
            return Err(EngineError::DuplicateDetector(id));
        }
        self.detectors.insert(id, detector);
        Ok(())
    }

    pub fn ids(&self) -> Vec<String> {
        self.detectors.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.detectors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Detector>)> {
        self.detectors.iter()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.ids())
            .finish()
    }
}
