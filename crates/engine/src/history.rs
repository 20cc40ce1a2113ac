//! Append-only record of completed evaluations.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use concord_core::{EvaluationResult, EvaluationStage};

/// Aggregate counters over the whole history.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub detections: usize,
    pub vetoes: usize,
    pub fp_suppressions: usize,
    pub quality_rejections: usize,
    pub detection_rate: f64,
    pub veto_rate: f64,
    /// Mean final confidence over all evaluations.
    pub average_confidence: f64,
    /// Mean weighted agreement over all evaluations.
    pub average_consensus: f64,
}

/// Shared, append-only evaluation log.
///
/// Results are stored behind `Arc` so snapshots are cheap and a reader never
/// observes a partially written entry.
#[derive(Debug, Default)]
pub struct EvaluationHistory {
    entries: RwLock<Vec<Arc<EvaluationResult>>>,
}

impl EvaluationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, result: EvaluationResult) -> Arc<EvaluationResult> {
        let entry = Arc::new(result);
        self.entries
            .write()
            .expect("evaluation history lock poisoned")
            .push(Arc::clone(&entry));
        entry
    }

    /// All entries in append order.
    pub fn snapshot(&self) -> Vec<Arc<EvaluationResult>> {
        self.entries
            .read()
            .expect("evaluation history lock poisoned")
            .clone()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<EvaluationResult>> {
        let entries = self.entries.read().expect("evaluation history lock poisoned");
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("evaluation history lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HistoryStats {
        let entries = self.entries.read().expect("evaluation history lock poisoned");
        let total = entries.len();
        if total == 0 {
            return HistoryStats::default();
        }

        let mut stats = HistoryStats {
            total,
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        let mut consensus_sum = 0.0;
        for entry in entries.iter() {
            if entry.detected {
                stats.detections += 1;
            }
            match entry.stage {
                EvaluationStage::Vetoed => stats.vetoes += 1,
                EvaluationStage::FalsePositive => stats.fp_suppressions += 1,
                EvaluationStage::QualityRejected => stats.quality_rejections += 1,
                EvaluationStage::Fused => {}
            }
            confidence_sum += entry.confidence;
            consensus_sum += entry.weighted_agreement;
        }

        let n = total as f64;
        stats.detection_rate = stats.detections as f64 / n;
        stats.veto_rate = stats.vetoes as f64 / n;
        stats.average_confidence = confidence_sum / n;
        stats.average_consensus = consensus_sum / n;
        stats
    }
}
