//! Final confidence for evaluations that survive veto and pattern checks.

use concord_core::{DetectorResults, EngineConfig};

pub struct DecisionFusion;

impl DecisionFusion {
    /// `Σ(confidence · (1 − uncertainty) · weight | detected) / Σ weight`,
    /// or 0 when the total weight is 0.
    pub fn fuse(results: &DetectorResults, config: &EngineConfig) -> f64 {
        let mut numerator = 0.0;
        let mut total_weight = 0.0;
        for (id, r) in results {
            let w = config.weight_for(id);
            total_weight += w;
            if r.detected {
                numerator += r.confidence * (1.0 - r.uncertainty) * w;
            }
        }
        if total_weight > 0.0 {
            numerator / total_weight
        } else {
            0.0
        }
    }

    pub fn decide(confidence: f64, config: &EngineConfig) -> bool {
        confidence >= config.confidence_threshold
    }
}
