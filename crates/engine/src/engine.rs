//! The evaluation pipeline.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use concord_core::{
    Candidate, ConsensusMetrics, DataSnapshot, DetectorResults, EngineConfig, EvaluationResult,
    EvaluationStage, FpMatch, QualityReport, VetoStatus,
};
use concord_rules::{
    default_rules, Fingerprint, PatternMatcher, PatternRegistry, PatternSource, VetoEngine,
    VetoRule,
};

use crate::consensus::ConsensusCalculator;
use crate::detector::{Detector, DetectorRegistry};
use crate::error::EngineError;
use crate::fusion::DecisionFusion;
use crate::history::{EvaluationHistory, HistoryStats};
use crate::orchestrator::Orchestrator;
use crate::quality::QualityGate;
use crate::source::DataSource;

pub struct ConsensusEngineBuilder {
    config: EngineConfig,
    detectors: Vec<Arc<dyn Detector>>,
    rules: Option<Vec<VetoRule>>,
    patterns: Option<Arc<dyn PatternSource>>,
}

impl ConsensusEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            detectors: Vec::new(),
            rules: None,
            patterns: None,
        }
    }

    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Replace the default veto rule set. Order is evaluation order.
    pub fn rules(mut self, rules: Vec<VetoRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn patterns(mut self, patterns: Arc<dyn PatternSource>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    pub fn build(self) -> Result<ConsensusEngine, EngineError> {
        self.config.validate()?;

        let mut registry = DetectorRegistry::new();
        for detector in self.detectors {
            registry.register(detector)?;
        }

        let veto = VetoEngine::new(
            self.rules.unwrap_or_else(default_rules),
            self.config.veto_enabled,
        )?;
        let patterns = self
            .patterns
            .unwrap_or_else(|| Arc::new(PatternRegistry::new()));

        info!(
            detectors = ?registry.ids(),
            veto_rules = veto.rules().len(),
            "consensus engine ready"
        );

        Ok(ConsensusEngine {
            gate: QualityGate::new(self.config.quality.clone()),
            orchestrator: Orchestrator::new(self.config.max_processing_time()),
            matcher: PatternMatcher::new(self.config.patterns.clone()),
            config: self.config,
            registry,
            veto,
            patterns,
            history: EvaluationHistory::new(),
        })
    }
}

/// Runs candidates through quality gate, detectors, consensus, veto,
/// false-positive screening and fusion.
///
/// `Send + Sync`; evaluations may run concurrently from a shared `Arc`.
pub struct ConsensusEngine {
    config: EngineConfig,
    gate: QualityGate,
    registry: DetectorRegistry,
    orchestrator: Orchestrator,
    veto: VetoEngine,
    matcher: PatternMatcher,
    patterns: Arc<dyn PatternSource>,
    history: EvaluationHistory,
}

impl ConsensusEngine {
    pub fn builder(config: EngineConfig) -> ConsensusEngineBuilder {
        ConsensusEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detectors(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn veto_rules(&self) -> &[VetoRule] {
        self.veto.rules()
    }

    pub fn history(&self) -> &EvaluationHistory {
        &self.history
    }

    pub fn stats(&self) -> HistoryStats {
        self.history.stats()
    }

    /// Evaluate one candidate against a snapshot.
    ///
    /// Only internal invariant violations are errors; bad data, failing
    /// detectors and suppressions all produce a negative result.
    pub async fn evaluate(
        &self,
        candidate: Candidate,
        snapshot: DataSnapshot,
    ) -> Result<EvaluationResult, EngineError> {
        let started = Instant::now();

        let quality = self.gate.assess(&snapshot);
        if !quality.pass {
            info!(
                candidate = %candidate.id,
                score = quality.score,
                issues = quality.issues.len(),
                "quality gate rejected snapshot"
            );
            let result =
                EvaluationResult::quality_rejected(&candidate, quality, elapsed_ms(started));
            return Ok(self.record(result));
        }

        let candidate = Arc::new(candidate);
        let results = self
            .orchestrator
            .run(&self.registry, Arc::clone(&candidate), Arc::new(snapshot))
            .await;
        if results.len() != self.registry.len() {
            return Err(EngineError::Invariant(format!(
                "expected {} detector results, got {}",
                self.registry.len(),
                results.len()
            )));
        }

        let metrics = ConsensusCalculator::compute(&results, &self.config);
        let confidence = DecisionFusion::fuse(&results, &self.config);
        let veto = self.veto.evaluate(&results);

        let outcome = if veto.vetoed {
            Outcome {
                stage: EvaluationStage::Vetoed,
                detected: false,
                fp_match: None,
            }
        } else if let Some(fp) = self.screen(&candidate, &results) {
            info!(
                candidate = %candidate.id,
                pattern_id = %fp.pattern_id,
                score = fp.match_score,
                "suppressed as known false positive"
            );
            Outcome {
                stage: EvaluationStage::FalsePositive,
                detected: false,
                fp_match: Some(fp),
            }
        } else {
            Outcome {
                stage: EvaluationStage::Fused,
                detected: DecisionFusion::decide(confidence, &self.config),
                fp_match: None,
            }
        };

        let result = assemble(
            &candidate,
            outcome,
            confidence,
            metrics,
            veto,
            results,
            quality,
            elapsed_ms(started),
        );
        info!(
            candidate = %result.candidate_id,
            stage = ?result.stage,
            detected = result.detected,
            confidence = result.confidence,
            weighted_agreement = result.weighted_agreement,
            elapsed_ms = result.elapsed_ms,
            "evaluation complete"
        );
        Ok(self.record(result))
    }

    /// Gather a snapshot from `source`, then evaluate. A gather failure
    /// becomes an empty snapshot and therefore a quality rejection.
    pub async fn evaluate_with_source(
        &self,
        candidate: Candidate,
        source: &dyn DataSource,
    ) -> Result<EvaluationResult, EngineError> {
        let snapshot = match source
            .gather(
                candidate.coordinates,
                candidate.radius_m,
                &candidate.target_category,
                candidate.time_window,
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(candidate = %candidate.id, error = %e, "data gathering failed");
                DataSnapshot::empty()
            }
        };
        self.evaluate(candidate, snapshot).await
    }

    fn screen(&self, candidate: &Candidate, results: &DetectorResults) -> Option<FpMatch> {
        let patterns = self.patterns.patterns();
        if patterns.is_empty() {
            return None;
        }
        let fingerprint = Fingerprint::extract(candidate, results);
        self.matcher.find_match(&fingerprint, &patterns)
    }

    fn record(&self, result: EvaluationResult) -> EvaluationResult {
        self.history.append(result.clone());
        result
    }
}

struct Outcome {
    stage: EvaluationStage,
    detected: bool,
    fp_match: Option<FpMatch>,
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    candidate: &Candidate,
    outcome: Outcome,
    confidence: f64,
    metrics: ConsensusMetrics,
    veto: VetoStatus,
    detector_results: DetectorResults,
    quality: QualityReport,
    elapsed_ms: u64,
) -> EvaluationResult {
    EvaluationResult {
        id: Uuid::new_v4(),
        candidate_id: candidate.id,
        detected: outcome.detected,
        confidence,
        raw_agreement: metrics.raw_agreement,
        weighted_agreement: metrics.weighted_agreement,
        agreement_ratio: metrics.agreement_ratio,
        consensus_reached: metrics.consensus_reached,
        stage: outcome.stage,
        veto: Some(veto),
        fp_match: outcome.fp_match,
        detector_results,
        quality,
        timestamp: Utc::now(),
        elapsed_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
