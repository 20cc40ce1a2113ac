use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<(String, String)> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some((prefixed, v));
        }
    }
    env_opt(key).map(|v| (key.to_string(), v))
}

fn profiled_env_f64(profile: &str, key: &str, default: f64) -> ConfigResult<f64> {
    match profiled_env_opt(profile, key) {
        Some((k, v)) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key: k, value: v }),
        None => Ok(default),
    }
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> ConfigResult<u64> {
    match profiled_env_opt(profile, key) {
        Some((k, v)) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key: k, value: v }),
        None => Ok(default),
    }
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> ConfigResult<bool> {
    match profiled_env_opt(profile, key) {
        Some((k, v)) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnv { key: k, value: v }),
        },
        None => Ok(default),
    }
}

/// Parse `name=weight,name=weight` into a weight map.
pub fn parse_weights(raw: &str) -> Option<BTreeMap<String, f64>> {
    let mut weights = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        weights.insert(name.to_string(), value.trim().parse().ok()?);
    }
    Some(weights)
}

fn check_finite(field: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite {
            field: field.to_string(),
            value,
        })
    }
}

fn check_unit(field: &str, value: f64) -> ConfigResult<()> {
    check_finite(field, value)?;
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Upper bound on any single weight. Weighted sums over any realistic
/// number of detectors stay finite below it.
pub const MAX_WEIGHT: f64 = 1e6;

fn check_weight(field: &str, value: f64) -> ConfigResult<()> {
    check_finite(field, value)?;
    if (0.0..=MAX_WEIGHT).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min: 0.0,
            max: MAX_WEIGHT,
        })
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Weighted agreement at which detectors are considered in consensus.
    pub consensus_threshold: f64,
    /// Fused confidence required for a positive decision.
    pub confidence_threshold: f64,
    pub veto_enabled: bool,
    /// Per-detector deadline, applied independently to each detector task.
    pub max_processing_time_ms: u64,
    pub detector_weights: BTreeMap<String, f64>,
    /// Weight used for detectors missing from `detector_weights`.
    pub default_weight: f64,
    pub quality: QualityConfig,
    pub patterns: PatternConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.6,
            confidence_threshold: 0.7,
            veto_enabled: true,
            max_processing_time_ms: 30_000,
            detector_weights: BTreeMap::new(),
            default_weight: 1.0,
            quality: QualityConfig::default(),
            patterns: PatternConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CONCORD_PROFILE`. When set (e.g. `FIELD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> ConfigResult<Self> {
        let profile = env_or("CONCORD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> ConfigResult<Self> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let d = Self::default();

        let detector_weights = match profiled_env_opt(p, "CONCORD_DETECTOR_WEIGHTS") {
            Some((key, raw)) => {
                parse_weights(&raw).ok_or(ConfigError::InvalidEnv { key, value: raw })?
            }
            None => d.detector_weights,
        };

        let config = Self {
            consensus_threshold: profiled_env_f64(
                p,
                "CONCORD_CONSENSUS_THRESHOLD",
                d.consensus_threshold,
            )?,
            confidence_threshold: profiled_env_f64(
                p,
                "CONCORD_CONFIDENCE_THRESHOLD",
                d.confidence_threshold,
            )?,
            veto_enabled: profiled_env_bool(p, "CONCORD_VETO_ENABLED", d.veto_enabled)?,
            max_processing_time_ms: profiled_env_u64(
                p,
                "CONCORD_MAX_PROCESSING_TIME_MS",
                d.max_processing_time_ms,
            )?,
            detector_weights,
            default_weight: profiled_env_f64(p, "CONCORD_DEFAULT_WEIGHT", d.default_weight)?,
            quality: QualityConfig::from_env_profiled(p)?,
            patterns: PatternConfig::from_env_profiled(p)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn max_processing_time(&self) -> Duration {
        Duration::from_millis(self.max_processing_time_ms)
    }

    /// Weight applied to a detector's vote in weighted aggregation.
    pub fn weight_for(&self, detector_id: &str) -> f64 {
        self.detector_weights
            .get(detector_id)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_unit("consensus_threshold", self.consensus_threshold)?;
        check_unit("confidence_threshold", self.confidence_threshold)?;
        if self.max_processing_time_ms == 0 {
            return Err(ConfigError::Invalid(
                "max_processing_time_ms must be greater than 0".into(),
            ));
        }
        check_weight("default_weight", self.default_weight)?;
        for (detector, &value) in &self.detector_weights {
            if value < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    detector: detector.clone(),
                    value,
                });
            }
            check_weight(&format!("detector_weights.{detector}"), value)?;
        }
        let total: f64 = self.detector_weights.values().sum::<f64>() + self.default_weight;
        if !total.is_finite() {
            return Err(ConfigError::Invalid(
                "total detector weight must be finite".into(),
            ));
        }
        self.quality.validate()?;
        self.patterns.validate()?;
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config loaded:");
        tracing::info!(
            "  thresholds:  consensus={}, confidence={}",
            self.consensus_threshold,
            self.confidence_threshold
        );
        tracing::info!("  veto:        enabled={}", self.veto_enabled);
        tracing::info!(
            "  detectors:   timeout={}ms, weights={:?}",
            self.max_processing_time_ms,
            self.detector_weights
        );
        tracing::info!(
            "  quality:     pass>={}, target_span={}d, unreported={}",
            self.quality.pass_threshold,
            self.quality.target_span_days,
            self.quality.unreported_score
        );
        tracing::info!("  patterns:    match>{}", self.patterns.match_threshold);
    }
}

// ── Quality gate ──────────────────────────────────────────────

/// Relative weights of the four quality sub-scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityWeights {
    pub temporal: f64,
    pub cloud: f64,
    pub spatial: f64,
    pub radiometric: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            temporal: 0.20,
            cloud: 0.30,
            spatial: 0.25,
            radiometric: 0.25,
        }
    }
}

impl QualityWeights {
    pub fn total(&self) -> f64 {
        self.temporal + self.cloud + self.spatial + self.radiometric
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    /// Overall score needed to run detectors.
    pub pass_threshold: f64,
    /// Sub-scores below this bar are reported as issues.
    pub issue_threshold: f64,
    /// Acquisition span that counts as full temporal coverage.
    pub target_span_days: f64,
    /// Sub-score given to a dimension no channel reports metadata for.
    pub unreported_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            pass_threshold: 0.75,
            issue_threshold: 0.7,
            target_span_days: 365.0,
            unreported_score: 0.5,
        }
    }
}

impl QualityConfig {
    fn from_env_profiled(p: &str) -> ConfigResult<Self> {
        let d = Self::default();
        Ok(Self {
            weights: d.weights,
            pass_threshold: profiled_env_f64(
                p,
                "CONCORD_QUALITY_PASS_THRESHOLD",
                d.pass_threshold,
            )?,
            issue_threshold: profiled_env_f64(
                p,
                "CONCORD_QUALITY_ISSUE_THRESHOLD",
                d.issue_threshold,
            )?,
            target_span_days: profiled_env_f64(
                p,
                "CONCORD_QUALITY_TARGET_SPAN_DAYS",
                d.target_span_days,
            )?,
            unreported_score: profiled_env_f64(
                p,
                "CONCORD_QUALITY_UNREPORTED_SCORE",
                d.unreported_score,
            )?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_unit("quality.pass_threshold", self.pass_threshold)?;
        check_unit("quality.issue_threshold", self.issue_threshold)?;
        check_unit("quality.unreported_score", self.unreported_score)?;
        check_weight("quality.weights.temporal", self.weights.temporal)?;
        check_weight("quality.weights.cloud", self.weights.cloud)?;
        check_weight("quality.weights.spatial", self.weights.spatial)?;
        check_weight("quality.weights.radiometric", self.weights.radiometric)?;
        if self.weights.total() <= 0.0 {
            return Err(ConfigError::Invalid(
                "quality weights must not all be zero".into(),
            ));
        }
        check_finite("quality.target_span_days", self.target_span_days)?;
        if self.target_span_days <= 0.0 {
            return Err(ConfigError::Invalid(
                "quality.target_span_days must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// ── False-positive pattern matching ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PatternConfig {
    pub category_weight: f64,
    pub context_weight: f64,
    pub detection_weight: f64,
    /// A pattern suppresses a detection when its score is strictly above this.
    pub match_threshold: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            category_weight: 0.3,
            context_weight: 0.3,
            detection_weight: 0.4,
            match_threshold: 0.7,
        }
    }
}

impl PatternConfig {
    fn from_env_profiled(p: &str) -> ConfigResult<Self> {
        let d = Self::default();
        Ok(Self {
            match_threshold: profiled_env_f64(
                p,
                "CONCORD_FP_MATCH_THRESHOLD",
                d.match_threshold,
            )?,
            ..d
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_weight("patterns.category_weight", self.category_weight)?;
        check_weight("patterns.context_weight", self.context_weight)?;
        check_weight("patterns.detection_weight", self.detection_weight)?;
        check_unit("patterns.match_threshold", self.match_threshold)?;
        if self.category_weight + self.context_weight + self.detection_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "pattern weights must not all be zero".into(),
            ));
        }
        Ok(())
    }
}
