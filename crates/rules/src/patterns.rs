//! Known false-positive patterns and the fingerprint matcher.
//!
//! The registry is owned by whoever curates confirmed false positives; the
//! engine only reads it through [`PatternSource`]. Matching is a weighted
//! similarity over target category, context tag and the per-detector
//! detection pattern.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concord_core::{Candidate, DetectorResults, FpMatch, PatternConfig};

use crate::error::{Result, RuleError};

/// Fingerprint of a previously confirmed spurious detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FpPattern {
    pub id: String,
    pub name: String,
    pub target_category: String,
    pub context_tag: String,
    /// Expected `detected` flag per detector identity.
    pub expected: BTreeMap<String, bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FpPattern {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RuleError::Validation("pattern id must not be empty".into()));
        }
        if self.expected.is_empty() {
            return Err(RuleError::Validation(format!(
                "pattern '{}' has an empty detection pattern",
                self.id
            )));
        }
        Ok(())
    }
}

/// Feature tuple extracted from one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub target_category: String,
    pub context_tag: String,
    /// `(detector_id, detected)` ordered by detector id.
    pub pattern: Vec<(String, bool)>,
}

impl Fingerprint {
    pub fn extract(candidate: &Candidate, results: &DetectorResults) -> Self {
        Self {
            target_category: candidate.target_category.clone(),
            context_tag: candidate.context_tag.clone(),
            pattern: results
                .iter()
                .map(|(id, r)| (id.clone(), r.detected))
                .collect(),
        }
    }
}

/// Read access to a false-positive knowledge base.
pub trait PatternSource: Send + Sync {
    /// Consistent snapshot of the current patterns.
    fn patterns(&self) -> Vec<FpPattern>;
}

/// In-memory, append-only pattern registry.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: Arc<RwLock<Vec<FpPattern>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an initial pattern list, rejecting duplicate ids.
    pub fn from_patterns(patterns: Vec<FpPattern>) -> Result<Self> {
        let registry = Self::new();
        for pattern in patterns {
            registry.register(pattern)?;
        }
        Ok(registry)
    }

    pub fn register(&self, pattern: FpPattern) -> Result<()> {
        pattern.validate()?;
        let mut guard = self.patterns.write().expect("pattern registry lock poisoned");
        if guard.iter().any(|p| p.id == pattern.id) {
            return Err(RuleError::Validation(format!(
                "duplicate false-positive pattern id '{}'",
                pattern.id
            )));
        }
        info!(pattern_id = %pattern.id, name = %pattern.name, "registered false-positive pattern");
        guard.push(pattern);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patterns.read().expect("pattern registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PatternSource for PatternRegistry {
    fn patterns(&self) -> Vec<FpPattern> {
        self.patterns
            .read()
            .expect("pattern registry lock poisoned")
            .clone()
    }
}

/// Scores fingerprints against patterns.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    config: PatternConfig,
}

impl PatternMatcher {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// Weighted similarity in [0, 1] (for weights summing to 1).
    ///
    /// The detection component is the fraction of evaluated detectors whose
    /// flag equals the pattern's expectation; a detector the pattern does not
    /// mention counts as a mismatch.
    pub fn score(&self, fingerprint: &Fingerprint, pattern: &FpPattern) -> f64 {
        let category = fingerprint
            .target_category
            .eq_ignore_ascii_case(&pattern.target_category);
        let context = fingerprint
            .context_tag
            .eq_ignore_ascii_case(&pattern.context_tag);

        let detection_fraction = if fingerprint.pattern.is_empty() {
            0.0
        } else {
            let matching = fingerprint
                .pattern
                .iter()
                .filter(|(id, detected)| pattern.expected.get(id) == Some(detected))
                .count();
            matching as f64 / fingerprint.pattern.len() as f64
        };

        let indicator = |b: bool| if b { 1.0 } else { 0.0 };
        self.config.category_weight * indicator(category)
            + self.config.context_weight * indicator(context)
            + self.config.detection_weight * detection_fraction
    }

    /// Best-scoring pattern, if it scores strictly above the match threshold.
    pub fn find_match(&self, fingerprint: &Fingerprint, patterns: &[FpPattern]) -> Option<FpMatch> {
        let mut best: Option<(&FpPattern, f64)> = None;
        for pattern in patterns {
            let score = self.score(fingerprint, pattern);
            debug!(pattern_id = %pattern.id, score, "false-positive pattern scored");
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((pattern, score));
            }
        }

        best.filter(|(_, score)| *score > self.config.match_threshold)
            .map(|(pattern, score)| FpMatch {
                is_known_fp: true,
                pattern_id: pattern.id.clone(),
                pattern_name: pattern.name.clone(),
                match_score: score,
            })
    }
}
