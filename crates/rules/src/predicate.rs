//! Veto predicates over a complete detector result set.
//!
//! A predicate is plain data so rule sets can live in YAML:
//!
//! ```yaml
//! when: all
//! of:
//!   - when: detected
//!     detector: spectral
//!   - when: none_detected
//!     detectors: [gravity, structural]
//! ```
//!
//! Leaf predicates that inspect structural sub-reports or payload fields
//! skip results whose detector marked itself `veto_eligible: false`.

use serde::{Deserialize, Serialize};

use concord_core::DetectorResults;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Predicate {
    /// The named detector reported `detected = true`.
    Detected { detector: String },
    /// The named detector is absent or reported `detected = false`.
    NotDetected { detector: String },
    /// At least one of the named detectors reported a detection.
    AnyDetected { detectors: Vec<String> },
    /// None of the named detectors reported a detection.
    NoneDetected { detectors: Vec<String> },
    /// Some eligible detector reported `StructuralValidation.passes = false`.
    StructuralFailure,
    /// Some eligible detector reported a structural residual above `threshold`.
    ResidualAbove { threshold: f64 },
    /// Some eligible detector reported payload `key` strictly below `threshold`.
    PayloadBelow { key: String, threshold: f64 },
    /// Some eligible detector reported payload `key` strictly above `threshold`.
    PayloadAbove { key: String, threshold: f64 },
    /// The named detector reported a confidence strictly above `threshold`.
    ConfidenceAbove { detector: String, threshold: f64 },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { of: Box<Predicate> },
}

impl Predicate {
    pub fn evaluate(&self, results: &DetectorResults) -> bool {
        self.witness_or_match(results).0
    }

    /// Identity of the first detector whose output made this predicate true,
    /// when one can be singled out. Negative leaves (`not_detected`,
    /// `none_detected`, `not`) never name a witness.
    pub fn witness(&self, results: &DetectorResults) -> Option<String> {
        let (matched, witness) = self.witness_or_match(results);
        if matched {
            witness
        } else {
            None
        }
    }

    fn witness_or_match(&self, results: &DetectorResults) -> (bool, Option<String>) {
        match self {
            Predicate::Detected { detector } => {
                let hit = results.get(detector).is_some_and(|r| r.detected);
                (hit, hit.then(|| detector.clone()))
            }
            Predicate::NotDetected { detector } => {
                (!results.get(detector).is_some_and(|r| r.detected), None)
            }
            Predicate::AnyDetected { detectors } => {
                let first = detectors
                    .iter()
                    .find(|d| results.get(*d).is_some_and(|r| r.detected));
                (first.is_some(), first.cloned())
            }
            Predicate::NoneDetected { detectors } => (
                !detectors
                    .iter()
                    .any(|d| results.get(d).is_some_and(|r| r.detected)),
                None,
            ),
            Predicate::StructuralFailure => first_eligible(results, |r| {
                r.structural.as_ref().is_some_and(|s| !s.passes)
            }),
            Predicate::ResidualAbove { threshold } => first_eligible(results, |r| {
                r.structural
                    .as_ref()
                    .is_some_and(|s| s.residual > *threshold)
            }),
            Predicate::PayloadBelow { key, threshold } => {
                first_eligible(results, |r| r.payload_f64(key).is_some_and(|v| v < *threshold))
            }
            Predicate::PayloadAbove { key, threshold } => {
                first_eligible(results, |r| r.payload_f64(key).is_some_and(|v| v > *threshold))
            }
            Predicate::ConfidenceAbove {
                detector,
                threshold,
            } => {
                let hit = results
                    .get(detector)
                    .is_some_and(|r| r.confidence > *threshold);
                (hit, hit.then(|| detector.clone()))
            }
            Predicate::All { of } => {
                let mut witness = None;
                for p in of {
                    let (matched, w) = p.witness_or_match(results);
                    if !matched {
                        return (false, None);
                    }
                    witness = witness.or(w);
                }
                (true, witness)
            }
            Predicate::Any { of } => {
                for p in of {
                    let (matched, w) = p.witness_or_match(results);
                    if matched {
                        return (true, w);
                    }
                }
                (false, None)
            }
            Predicate::Not { of } => (!of.evaluate(results), None),
        }
    }

    /// Thresholds must be finite and combinators non-empty.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::ResidualAbove { threshold }
            | Predicate::PayloadBelow { threshold, .. }
            | Predicate::PayloadAbove { threshold, .. }
            | Predicate::ConfidenceAbove { threshold, .. } => {
                if threshold.is_finite() {
                    Ok(())
                } else {
                    Err(format!("threshold must be finite, got {threshold}"))
                }
            }
            Predicate::AnyDetected { detectors } | Predicate::NoneDetected { detectors } => {
                if detectors.is_empty() {
                    Err("detector list must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Predicate::All { of } | Predicate::Any { of } => {
                if of.is_empty() {
                    return Err("combinator must have at least one predicate".to_string());
                }
                of.iter().try_for_each(Predicate::validate)
            }
            Predicate::Not { of } => of.validate(),
            Predicate::Detected { .. }
            | Predicate::NotDetected { .. }
            | Predicate::StructuralFailure => Ok(()),
        }
    }
}

/// First veto-eligible result satisfying `check`, in detector-id order.
fn first_eligible<F>(results: &DetectorResults, check: F) -> (bool, Option<String>)
where
    F: Fn(&concord_core::DetectorResult) -> bool,
{
    match results
        .values()
        .find(|r| r.is_veto_eligible() && check(*r))
    {
        Some(r) => (true, Some(r.detector_id.clone())),
        None => (false, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{DetectorResult, StructuralValidation};

    fn results(entries: Vec<DetectorResult>) -> DetectorResults {
        entries
            .into_iter()
            .map(|r| (r.detector_id.clone(), r))
            .collect()
    }

    fn hit(id: &str) -> DetectorResult {
        DetectorResult::new(id, true, 0.8, 0.1, "test")
    }

    fn miss(id: &str) -> DetectorResult {
        DetectorResult::new(id, false, 0.2, 0.1, "test")
    }

    fn detected(id: &str) -> Predicate {
        Predicate::Detected {
            detector: id.into(),
        }
    }

    fn not_detected(id: &str) -> Predicate {
        Predicate::NotDetected {
            detector: id.into(),
        }
    }

    fn residual_above(threshold: f64) -> Predicate {
        Predicate::ResidualAbove { threshold }
    }

    #[test]
    fn detected_and_not_detected() {
        let r = results(vec![hit("spectral"), miss("gravity")]);
        assert!(detected("spectral").evaluate(&r));
        assert!(!detected("gravity").evaluate(&r));
        assert!(!detected("absent").evaluate(&r));
        assert!(not_detected("gravity").evaluate(&r));
        assert!(not_detected("absent").evaluate(&r));
    }

    #[test]
    fn surface_without_subsurface_shape() {
        let p = Predicate::All {
            of: vec![
                detected("spectral"),
                Predicate::NoneDetected {
                    detectors: vec!["gravity".into(), "structural".into()],
                },
            ],
        };
        let unsupported = results(vec![hit("spectral"), miss("gravity"), miss("structural")]);
        let supported = results(vec![hit("spectral"), hit("gravity"), miss("structural")]);
        assert!(p.evaluate(&unsupported));
        assert_eq!(p.witness(&unsupported).as_deref(), Some("spectral"));
        assert!(!p.evaluate(&supported));
        assert_eq!(p.witness(&supported), None);
    }

    #[test]
    fn structural_predicates_name_the_offender() {
        let bad = hit("structural").with_structural(StructuralValidation {
            passes: false,
            violations: vec!["density inversion".into()],
            residual: 1.2,
        });
        let r = results(vec![hit("gravity"), bad]);
        assert_eq!(
            Predicate::StructuralFailure.witness(&r).as_deref(),
            Some("structural")
        );
        assert!(residual_above(1.0).evaluate(&r));
        assert!(!residual_above(1.5).evaluate(&r));
    }

    #[test]
    fn ineligible_results_are_ignored() {
        let advisory = hit("structural")
            .with_structural(StructuralValidation {
                passes: false,
                violations: vec![],
                residual: 3.0,
            })
            .with_veto_eligible(false);
        let r = results(vec![advisory]);
        assert!(!Predicate::StructuralFailure.evaluate(&r));
        assert!(!residual_above(1.0).evaluate(&r));
    }

    #[test]
    fn payload_thresholds() {
        let insar = hit("insar").with_payload(serde_json::json!({ "temporal_coherence": 0.3 }));
        let r = results(vec![insar, hit("spectral")]);
        let below = Predicate::PayloadBelow {
            key: "temporal_coherence".into(),
            threshold: 0.5,
        };
        let above = Predicate::PayloadAbove {
            key: "temporal_coherence".into(),
            threshold: 0.5,
        };
        assert_eq!(below.witness(&r).as_deref(), Some("insar"));
        assert!(!above.evaluate(&r));
    }

    #[test]
    fn combinators() {
        let r = results(vec![hit("a"), miss("b")]);
        let (a, b) = (detected("a"), detected("b"));
        let any = Predicate::Any {
            of: vec![b.clone(), a.clone()],
        };
        let all = Predicate::All {
            of: vec![a.clone(), b.clone()],
        };
        assert!(any.evaluate(&r));
        assert!(!all.evaluate(&r));
        assert!(Predicate::Not { of: Box::new(b) }.evaluate(&r));
        let confident = Predicate::ConfidenceAbove {
            detector: "a".into(),
            threshold: 0.5,
        };
        assert!(confident.evaluate(&r));
    }

    #[test]
    fn empty_result_set() {
        let r = DetectorResults::new();
        assert!(!Predicate::StructuralFailure.evaluate(&r));
        let detectors = vec!["a".to_string()];
        let none = Predicate::NoneDetected {
            detectors: detectors.clone(),
        };
        assert!(none.evaluate(&r));
        assert!(!Predicate::AnyDetected { detectors }.evaluate(&r));
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
when: all
of:
  - when: detected
    detector: spectral
  - when: none_detected
    detectors: [gravity, structural]
"#;
        let p: Predicate = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(p, Predicate::All { ref of } if of.len() == 2));

        let unit: Predicate = serde_yaml::from_str("when: structural_failure").unwrap();
        assert_eq!(unit, Predicate::StructuralFailure);
    }

    #[test]
    fn validation() {
        assert!(Predicate::All { of: vec![] }.validate().is_err());
        assert!(residual_above(f64::NAN).validate().is_err());
        assert!(Predicate::NoneDetected { detectors: vec![] }.validate().is_err());
        assert!(Predicate::Not {
            of: Box::new(residual_above(1.0))
        }
        .validate()
        .is_ok());
    }
}
