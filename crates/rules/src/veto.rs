//! Ordered veto rules: the first rule that fires forces a negative decision.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concord_core::{DetectorResults, VetoStatus};

use crate::error::{Result, RuleError};
use crate::predicate::Predicate;

/// Detector identities referenced by the default rule set.
pub mod detectors {
    pub const SPECTRAL: &str = "spectral";
    pub const GRAVITY: &str = "gravity";
    pub const STRUCTURAL: &str = "structural";
    pub const GPR: &str = "gpr";
}

/// Payload key for interferometric temporal coherence.
pub const TEMPORAL_COHERENCE_KEY: &str = "temporal_coherence";
pub const TEMPORAL_COHERENCE_FLOOR: f64 = 0.5;
pub const RESIDUAL_LIMIT: f64 = 1.0;

fn default_enabled() -> bool {
    true
}

/// A named rule. Fires when `primary` holds and, if present, `secondary`
/// holds as well.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VetoRule {
    pub name: String,
    pub reason: String,
    /// Identity the veto is attributed to. When unset, the detector that
    /// satisfied the primary predicate is named, falling back to the rule name.
    #[serde(default)]
    pub vetoing_agent: Option<String>,
    pub primary: Predicate,
    #[serde(default)]
    pub secondary: Option<Predicate>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl VetoRule {
    pub fn new(name: impl Into<String>, reason: impl Into<String>, primary: Predicate) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            vetoing_agent: None,
            primary,
            secondary: None,
            enabled: true,
        }
    }

    pub fn with_secondary(mut self, secondary: Predicate) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn attributed_to(mut self, agent: impl Into<String>) -> Self {
        self.vetoing_agent = Some(agent.into());
        self
    }

    pub fn fires(&self, results: &DetectorResults) -> bool {
        self.enabled
            && self.primary.evaluate(results)
            && self
                .secondary
                .as_ref()
                .map_or(true, |s| s.evaluate(results))
    }

    fn attribution(&self, results: &DetectorResults) -> String {
        self.vetoing_agent
            .clone()
            .or_else(|| self.primary.witness(results))
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::Validation("veto rule name must not be empty".into()));
        }
        let check = |p: &Predicate, which: &str| {
            p.validate().map_err(|e| {
                RuleError::Validation(format!("rule '{}' {which} predicate: {e}", self.name))
            })
        };
        check(&self.primary, "primary")?;
        if let Some(secondary) = &self.secondary {
            check(secondary, "secondary")?;
        }
        Ok(())
    }
}

/// The rule set shipped with the engine, in evaluation order.
///
/// The residual rule precedes the general structural-failure rule so a
/// failed validation with an excessive residual is attributed to the
/// residual check.
pub fn default_rules() -> Vec<VetoRule> {
    use detectors::*;

    vec![
        VetoRule::new(
            "structural-residual",
            format!("structural model residual exceeds {RESIDUAL_LIMIT}"),
            Predicate::ResidualAbove {
                threshold: RESIDUAL_LIMIT,
            },
        ),
        VetoRule::new(
            "structural-failure",
            "structural validation failed",
            Predicate::StructuralFailure,
        ),
        VetoRule::new(
            "temporal-coherence",
            format!("temporal coherence below {TEMPORAL_COHERENCE_FLOOR}"),
            Predicate::PayloadBelow {
                key: TEMPORAL_COHERENCE_KEY.to_string(),
                threshold: TEMPORAL_COHERENCE_FLOOR,
            },
        ),
        VetoRule::new(
            "surface-without-subsurface",
            "surface signature has no corroborating subsurface signal",
            Predicate::Detected {
                detector: SPECTRAL.to_string(),
            },
        )
        .with_secondary(Predicate::NoneDetected {
            detectors: vec![GRAVITY.to_string(), STRUCTURAL.to_string()],
        }),
        VetoRule::new(
            "high-frequency-unsupported",
            "short-range signal has no compositional support",
            Predicate::Detected {
                detector: GPR.to_string(),
            },
        )
        .with_secondary(Predicate::NotDetected {
            detector: SPECTRAL.to_string(),
        }),
    ]
}

/// Evaluates veto rules top to bottom; the first firing rule wins.
#[derive(Debug, Clone)]
pub struct VetoEngine {
    rules: Vec<VetoRule>,
    enabled: bool,
}

impl VetoEngine {
    /// Build an engine from an ordered rule list. Rule names must be unique.
    pub fn new(rules: Vec<VetoRule>, enabled: bool) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::Validation(format!(
                    "duplicate veto rule name '{}'",
                    rule.name
                )));
            }
        }
        info!(rules = rules.len(), enabled, "veto engine ready");
        Ok(Self { rules, enabled })
    }

    pub fn with_defaults(enabled: bool) -> Self {
        Self {
            rules: default_rules(),
            enabled,
        }
    }

    pub fn rules(&self) -> &[VetoRule] {
        &self.rules
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn evaluate(&self, results: &DetectorResults) -> VetoStatus {
        if !self.enabled {
            return VetoStatus::clear();
        }

        for rule in &self.rules {
            if rule.fires(results) {
                let agent = rule.attribution(results);
                info!(rule = %rule.name, agent = %agent, "veto fired");
                return VetoStatus::fired(&rule.name, agent, &rule.reason);
            }
            debug!(rule = %rule.name, "veto rule clear");
        }

        VetoStatus::clear()
    }
}
