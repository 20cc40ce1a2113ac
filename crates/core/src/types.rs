//! Data model shared by every stage of the consensus pipeline.
//!
//! Everything here is created once and then only read: candidates and
//! snapshots are handed to detectors behind an `Arc`, detector results are
//! replaced rather than patched, and an [`EvaluationResult`] is frozen the
//! moment the pipeline reaches a terminal stage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Candidate ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A single query: "is `target_category` present at these coordinates?"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub coordinates: Coordinates,
    /// Free-form tag for what is being searched for.
    pub target_category: String,
    /// Geological / environmental setting of the location.
    pub context_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

impl Candidate {
    pub fn new(
        lat: f64,
        lon: f64,
        target_category: impl Into<String>,
        context_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            coordinates: Coordinates { lat, lon },
            target_category: target_category.into(),
            context_tag: context_tag.into(),
            depth_m: None,
            radius_m: None,
            time_window: None,
        }
    }

    pub fn with_depth(mut self, depth_m: f64) -> Self {
        self.depth_m = Some(depth_m);
        self
    }

    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.radius_m = Some(radius_m);
        self
    }

    pub fn with_time_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_window = Some(TimeWindow { start, end });
        self
    }
}

// ── Data snapshot ─────────────────────────────────────────────

/// One measurement modality inside a [`DataSnapshot`].
///
/// `data` is opaque to the engine. The metadata fields are what the quality
/// gate inspects; any of them may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    #[serde(default)]
    pub acquisitions: Vec<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_m: Option<f64>,
    /// Fraction of the scene obscured by cloud or other occlusion, 0..=1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_fraction: Option<f64>,
    /// Calibration quality reported by the acquisition layer, 0..=1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radiometric_quality: Option<f64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Bundle of whatever channels the acquisition layer could supply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataSnapshot {
    #[serde(default)]
    pub channels: BTreeMap<String, Channel>,
}

impl DataSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: Channel) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

// ── Detector output ───────────────────────────────────────────

/// Method label carried by synthetic results for failed or timed-out detectors.
pub const FAILED_METHOD: &str = "failed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralValidation {
    pub passes: bool,
    #[serde(default)]
    pub violations: Vec<String>,
    pub residual: f64,
}

/// Output of one detector for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectorResult {
    pub detector_id: String,
    pub detected: bool,
    pub confidence: f64,
    pub uncertainty: f64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub elapsed_ms: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto_eligible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural: Option<StructuralValidation>,
}

impl DetectorResult {
    pub fn new(
        detector_id: impl Into<String>,
        detected: bool,
        confidence: f64,
        uncertainty: f64,
        method: impl Into<String>,
    ) -> Self {
        Self {
            detector_id: detector_id.into(),
            detected,
            confidence,
            uncertainty,
            payload: serde_json::Value::Null,
            elapsed_ms: 0,
            method: method.into(),
            veto_eligible: None,
            structural: None,
        }
    }

    /// Zero-confidence stand-in for a detector that errored, panicked or timed out.
    pub fn failed(detector_id: impl Into<String>, elapsed_ms: u64, reason: &str) -> Self {
        Self {
            detector_id: detector_id.into(),
            detected: false,
            confidence: 0.0,
            uncertainty: 1.0,
            payload: serde_json::json!({ "error": reason }),
            elapsed_ms,
            method: FAILED_METHOD.to_string(),
            veto_eligible: None,
            structural: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_structural(mut self, structural: StructuralValidation) -> Self {
        self.structural = Some(structural);
        self
    }

    pub fn with_veto_eligible(mut self, eligible: bool) -> Self {
        self.veto_eligible = Some(eligible);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.method == FAILED_METHOD
    }

    /// Whether structural/payload sub-reports of this result may trigger a veto.
    /// Unset means eligible.
    pub fn is_veto_eligible(&self) -> bool {
        self.veto_eligible.unwrap_or(true)
    }

    /// Numeric field from the opaque payload, if the detector reported one.
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    /// True when confidence and uncertainty are finite and within [0, 1].
    pub fn is_well_formed(&self) -> bool {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        in_unit(self.confidence) && in_unit(self.uncertainty)
    }
}

/// Detector results keyed by detector identity.
pub type DetectorResults = BTreeMap<String, DetectorResult>;

// ── Quality report ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityScores {
    pub temporal_coverage: f64,
    pub cloud_contamination: f64,
    pub spatial_compatibility: f64,
    pub radiometric_consistency: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub score: f64,
    pub scores: QualityScores,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub pass: bool,
}

// ── Suppression records ───────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VetoStatus {
    pub vetoed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vetoing_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VetoStatus {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn fired(
        rule: impl Into<String>,
        vetoing_agent: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            vetoed: true,
            rule: Some(rule.into()),
            vetoing_agent: Some(vetoing_agent.into()),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FpMatch {
    pub is_known_fp: bool,
    pub pattern_id: String,
    pub pattern_name: String,
    pub match_score: f64,
}

// ── Evaluation result ─────────────────────────────────────────

/// Terminal stage the pipeline reached for an evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    QualityRejected,
    Vetoed,
    FalsePositive,
    Fused,
}

/// Agreement metrics produced by the consensus calculator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsensusMetrics {
    pub raw_agreement: f64,
    pub weighted_agreement: f64,
    pub agreement_ratio: f64,
    pub consensus_reached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub detected: bool,
    pub confidence: f64,
    pub raw_agreement: f64,
    pub weighted_agreement: f64,
    pub agreement_ratio: f64,
    pub consensus_reached: bool,
    pub stage: EvaluationStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub veto: Option<VetoStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fp_match: Option<FpMatch>,
    pub detector_results: DetectorResults,
    pub quality: QualityReport,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl EvaluationResult {
    /// Negative result for a snapshot that failed the quality gate. No
    /// detector ran, so every metric is zero and the detector map is empty.
    pub fn quality_rejected(
        candidate: &Candidate,
        quality: QualityReport,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            detected: false,
            confidence: 0.0,
            raw_agreement: 0.0,
            weighted_agreement: 0.0,
            agreement_ratio: 0.0,
            consensus_reached: false,
            stage: EvaluationStage::QualityRejected,
            veto: None,
            fp_match: None,
            detector_results: DetectorResults::new(),
            quality,
            timestamp: Utc::now(),
            elapsed_ms,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        self.veto.as_ref().is_some_and(|v| v.vetoed)
    }

    pub fn is_known_fp(&self) -> bool {
        self.fp_match.as_ref().is_some_and(|m| m.is_known_fp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_is_zero_confidence() {
        let r = DetectorResult::failed("gravity", 12, "timed out");
        assert!(!r.detected);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.uncertainty, 1.0);
        assert!(r.is_failed());
        assert_eq!(r.payload["error"], "timed out");
    }

    #[test]
    fn well_formed_rejects_nan_and_out_of_range() {
        assert!(DetectorResult::new("a", true, 0.5, 0.1, "m").is_well_formed());
        assert!(!DetectorResult::new("a", true, f64::NAN, 0.1, "m").is_well_formed());
        assert!(!DetectorResult::new("a", true, 1.2, 0.1, "m").is_well_formed());
        assert!(!DetectorResult::new("a", true, 0.5, -0.1, "m").is_well_formed());
    }

    #[test]
    fn payload_lookup() {
        let r = DetectorResult::new("insar", true, 0.7, 0.2, "psi")
            .with_payload(serde_json::json!({ "temporal_coherence": 0.42, "label": "x" }));
        assert_eq!(r.payload_f64("temporal_coherence"), Some(0.42));
        assert_eq!(r.payload_f64("label"), None);
        assert_eq!(r.payload_f64("missing"), None);
    }

    #[test]
    fn veto_eligibility_defaults_to_true() {
        let r = DetectorResult::new("a", true, 0.5, 0.1, "m");
        assert!(r.is_veto_eligible());
        assert!(!r.with_veto_eligible(false).is_veto_eligible());
    }

    #[test]
    fn quality_rejected_result_is_empty() {
        let c = Candidate::new(10.0, 20.0, "copper", "porphyry");
        let report = QualityReport {
            score: 0.6,
            ..Default::default()
        };
        let r = EvaluationResult::quality_rejected(&c, report, 3);
        assert!(!r.detected);
        assert!(r.detector_results.is_empty());
        assert_eq!(r.stage, EvaluationStage::QualityRejected);
        assert_eq!(r.candidate_id, c.id);
        assert!(!r.is_vetoed());
        assert!(!r.is_known_fp());
    }

    #[test]
    fn candidate_deserializes_without_id() {
        let json = r#"{
            "coordinates": { "lat": -23.5, "lon": 133.1 },
            "target_category": "lithium",
            "context_tag": "pegmatite",
            "depth_m": 120.0
        }"#;
        let c: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.target_category, "lithium");
        assert_eq!(c.depth_m, Some(120.0));
        assert!(c.radius_m.is_none());
    }
}
