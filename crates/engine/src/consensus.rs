//! Agreement metrics over a detector result set.

use concord_core::{ConsensusMetrics, DetectorResults, EngineConfig};

/// Turns raw detector outputs into agreement metrics. Never ends the pipeline.
pub struct ConsensusCalculator;

impl ConsensusCalculator {
    pub fn compute(results: &DetectorResults, config: &EngineConfig) -> ConsensusMetrics {
        let weighted_agreement = Self::weighted_agreement(results, config);
        ConsensusMetrics {
            raw_agreement: Self::raw_agreement(results),
            weighted_agreement,
            agreement_ratio: Self::agreement_ratio(results),
            consensus_reached: weighted_agreement >= config.consensus_threshold,
        }
    }

    /// Fraction of detectors reporting a detection; 0 for an empty set.
    pub fn raw_agreement(results: &DetectorResults) -> f64 {
        if results.is_empty() {
            return 0.0;
        }
        let detected = results.values().filter(|r| r.detected).count();
        detected as f64 / results.len() as f64
    }

    /// Confidence-weighted share of positive votes: `Σ(c·w | detected) / Σw`.
    pub fn weighted_agreement(results: &DetectorResults, config: &EngineConfig) -> f64 {
        let mut numerator = 0.0;
        let mut total_weight = 0.0;
        for (id, r) in results {
            let w = config.weight_for(id);
            total_weight += w;
            if r.detected {
                numerator += r.confidence * w;
            }
        }
        if total_weight > 0.0 {
            numerator / total_weight
        } else {
            0.0
        }
    }

    /// Share of unordered detector pairs whose `detected` flags agree.
    /// With fewer than two detectors there is nothing to disagree on.
    pub fn agreement_ratio(results: &DetectorResults) -> f64 {
        let flags: Vec<bool> = results.values().map(|r| r.detected).collect();
        let n = flags.len();
        if n <= 1 {
            return 1.0;
        }
        let mut agreements = 0usize;
        for i in 0..n {
            for j in (i + 1)..n {
                if flags[i] == flags[j] {
                    agreements += 1;
                }
            }
        }
        let pairs = n * (n - 1) / 2;
        agreements as f64 / pairs as f64
    }
}
