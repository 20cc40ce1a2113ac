//! Recorded evaluation scenarios and the detectors that replay them.
//!
//! A scenario file holds one candidate, its snapshot, and what each detector
//! reported for it. Every scenario is evaluated by its own engine, registered
//! with exactly the detectors recorded in that file, so a verdict never
//! depends on which other files are in the run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;

use concord_core::{
    Candidate, DataSnapshot, DetectorResult, EngineConfig, EvaluationResult, StructuralValidation,
};
use concord_engine::{ConsensusEngine, Detector, DetectorError, EvaluationHistory, HistoryStats};
use concord_rules::{PatternSource, VetoRule};

fn default_method() -> String {
    "replay".to_string()
}

/// One detector's recorded output for a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recording {
    pub id: String,
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub uncertainty: f64,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub structural: Option<StructuralValidation>,
    #[serde(default)]
    pub veto_eligible: Option<bool>,
    /// Simulated processing time.
    #[serde(default)]
    pub delay_ms: u64,
    /// When set, the detector fails with this message instead of reporting.
    #[serde(default)]
    pub error: Option<String>,
}

impl Recording {
    fn to_result(&self) -> DetectorResult {
        let mut result = DetectorResult::new(
            &self.id,
            self.detected,
            self.confidence,
            self.uncertainty,
            &self.method,
        )
        .with_payload(self.payload.clone());
        result.structural = self.structural.clone();
        result.veto_eligible = self.veto_eligible;
        result
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub candidate: Candidate,
    #[serde(default)]
    pub snapshot: DataSnapshot,
    #[serde(default)]
    pub detectors: Vec<Recording>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let mut scenario: Scenario = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        if scenario.name.is_none() {
            scenario.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }
        Ok(scenario)
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.candidate.id.to_string())
    }
}

/// Answers every candidate with one recorded output.
pub struct ReplayDetector {
    recording: Recording,
}

#[async_trait]
impl Detector for ReplayDetector {
    fn id(&self) -> &str {
        &self.recording.id
    }

    async fn evaluate(
        &self,
        _candidate: &Candidate,
        _snapshot: &DataSnapshot,
    ) -> Result<DetectorResult, DetectorError> {
        if self.recording.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.recording.delay_ms)).await;
        }
        match &self.recording.error {
            Some(message) => Err(DetectorError::Failed(message.clone())),
            None => Ok(self.recording.to_result()),
        }
    }
}

/// One replay detector per recording in the scenario, in file order.
/// A detector may appear at most once.
pub fn replay_detectors(scenario: &Scenario) -> Result<Vec<Arc<dyn Detector>>> {
    let mut seen = HashSet::new();
    let mut detectors: Vec<Arc<dyn Detector>> = Vec::with_capacity(scenario.detectors.len());
    for recording in &scenario.detectors {
        if !seen.insert(recording.id.as_str()) {
            bail!(
                "detector '{}' recorded twice in scenario '{}'",
                recording.id,
                scenario.label()
            );
        }
        detectors.push(Arc::new(ReplayDetector {
            recording: recording.clone(),
        }));
    }
    Ok(detectors)
}

/// Engine settings shared by every scenario in a run.
#[derive(Clone)]
pub struct ReplaySetup {
    pub config: EngineConfig,
    pub rules: Vec<VetoRule>,
    pub patterns: Option<Arc<dyn PatternSource>>,
}

impl ReplaySetup {
    pub fn new(config: EngineConfig, rules: Vec<VetoRule>) -> Self {
        Self {
            config,
            rules,
            patterns: None,
        }
    }

    pub fn with_patterns(mut self, patterns: Arc<dyn PatternSource>) -> Self {
        self.patterns = Some(patterns);
        self
    }

    /// An engine that knows only the detectors recorded in `scenario`.
    pub fn engine_for(&self, scenario: &Scenario) -> Result<ConsensusEngine> {
        let mut builder = replay_detectors(scenario)?
            .into_iter()
            .fold(ConsensusEngine::builder(self.config.clone()), |b, d| b.detector(d))
            .rules(self.rules.clone());
        if let Some(patterns) = &self.patterns {
            builder = builder.patterns(Arc::clone(patterns));
        }
        builder
            .build()
            .with_context(|| format!("failed to build engine for '{}'", scenario.label()))
    }
}

/// Results of a run, in scenario order, with stats over all of them.
pub struct Replay {
    pub results: Vec<(String, EvaluationResult)>,
    pub stats: HistoryStats,
}

/// Evaluate every scenario concurrently, each on its own engine.
pub async fn replay_all(scenarios: &[Scenario], setup: &ReplaySetup) -> Result<Replay> {
    let engines = scenarios
        .iter()
        .map(|s| setup.engine_for(s))
        .collect::<Result<Vec<_>>>()?;

    let runs = scenarios.iter().zip(&engines).map(|(s, engine)| async move {
        let result = engine
            .evaluate(s.candidate.clone(), s.snapshot.clone())
            .await;
        (s.label(), result)
    });

    let history = EvaluationHistory::new();
    let mut results = Vec::with_capacity(scenarios.len());
    for (label, result) in join_all(runs).await {
        let result = result.with_context(|| format!("evaluation of '{label}' failed"))?;
        history.append(result.clone());
        results.push((label, result));
    }

    Ok(Replay {
        results,
        stats: history.stats(),
    })
}
