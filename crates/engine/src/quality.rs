//! Input data quality gate.
//!
//! Scores a snapshot on four independent dimensions and decides whether the
//! detectors are worth running at all. Pure function of the snapshot.

use concord_core::{DataSnapshot, QualityConfig, QualityReport, QualityScores};

#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, snapshot: &DataSnapshot) -> QualityReport {
        if snapshot.is_empty() {
            return QualityReport {
                score: 0.0,
                scores: QualityScores::default(),
                issues: vec!["no measurement channels available".to_string()],
                recommendations: vec![
                    "verify data acquisition covers the candidate location".to_string(),
                ],
                pass: false,
            };
        }

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let bar = self.config.issue_threshold;

        let (temporal, span_days) = self.temporal_coverage(snapshot);
        if temporal < bar {
            issues.push(format!(
                "temporal coverage {temporal:.2}: acquisitions span {span_days:.0} of {:.0} days",
                self.config.target_span_days
            ));
            recommendations.push("extend the acquisition window with archival scenes".to_string());
        }

        let unreported = self.config.unreported_score;

        let cloud = match cloud_contamination(snapshot) {
            Some((cloud, mean_cloud)) => {
                if cloud < bar {
                    issues.push(format!(
                        "cloud/occlusion contamination: mean cover {:.0}%",
                        mean_cloud * 100.0
                    ));
                    recommendations
                        .push("use cloud-masked composites or add radar channels".to_string());
                }
                cloud
            }
            None => {
                issues.push("no channel reports cloud or occlusion cover".to_string());
                recommendations.push("attach cloud masks to optical channels".to_string());
                unreported
            }
        };

        let spatial = match spatial_compatibility(snapshot) {
            Some((spatial, finest, coarsest)) => {
                if spatial < bar {
                    issues.push(format!(
                        "channel resolutions incompatible: {finest:.1} m vs {coarsest:.1} m"
                    ));
                    recommendations.push("resample channels to a common grid".to_string());
                }
                spatial
            }
            None => {
                issues.push("no channel reports a spatial resolution".to_string());
                recommendations.push("record ground sampling distance per channel".to_string());
                unreported
            }
        };

        let radiometric = match radiometric_consistency(snapshot) {
            Some(radiometric) => {
                if radiometric < bar {
                    issues.push(format!(
                        "radiometric consistency {radiometric:.2} across channels"
                    ));
                    recommendations.push("apply cross-calibration between channels".to_string());
                }
                radiometric
            }
            None => {
                issues.push("no channel reports radiometric quality".to_string());
                recommendations.push("attach calibration metadata to each channel".to_string());
                unreported
            }
        };

        let scores = QualityScores {
            temporal_coverage: temporal,
            cloud_contamination: cloud,
            spatial_compatibility: spatial,
            radiometric_consistency: radiometric,
        };
        let w = self.config.weights;
        let score = (temporal * w.temporal
            + cloud * w.cloud
            + spatial * w.spatial
            + radiometric * w.radiometric)
            / w.total();

        QualityReport {
            score,
            scores,
            issues,
            recommendations,
            pass: score >= self.config.pass_threshold,
        }
    }

    /// Fraction of the target span covered by all acquisitions, and the span in days.
    fn temporal_coverage(&self, snapshot: &DataSnapshot) -> (f64, f64) {
        let mut times = snapshot
            .channels
            .values()
            .flat_map(|c| c.acquisitions.iter());
        let Some(first) = times.next() else {
            return (0.0, 0.0);
        };
        let (earliest, latest) = times.fold((first, first), |(lo, hi), t| {
            (lo.min(t), hi.max(t))
        });
        let span_days = (*latest - *earliest).num_seconds() as f64 / 86_400.0;
        let coverage = (span_days / self.config.target_span_days).clamp(0.0, 1.0);
        (coverage, span_days)
    }
}

fn unit_values(values: impl Iterator<Item = Option<f64>>) -> Vec<f64> {
    values
        .flatten()
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// `1 − mean cloud fraction`, and the mean itself. `None` when no channel reports cover.
fn cloud_contamination(snapshot: &DataSnapshot) -> Option<(f64, f64)> {
    let fractions = unit_values(snapshot.channels.values().map(|c| c.cloud_fraction));
    if fractions.is_empty() {
        return None;
    }
    let m = mean(&fractions);
    Some((1.0 - m, m))
}

/// Ratio of finest to coarsest resolution, with both resolutions.
/// A single reported resolution is trivially compatible.
fn spatial_compatibility(snapshot: &DataSnapshot) -> Option<(f64, f64, f64)> {
    let resolutions: Vec<f64> = snapshot
        .channels
        .values()
        .filter_map(|c| c.resolution_m)
        .filter(|r| r.is_finite() && *r > 0.0)
        .collect();
    match resolutions.as_slice() {
        [] => None,
        [only] => Some((1.0, *only, *only)),
        _ => {
            let finest = resolutions.iter().copied().fold(f64::INFINITY, f64::min);
            let coarsest = resolutions.iter().copied().fold(0.0, f64::max);
            Some((finest / coarsest, finest, coarsest))
        }
    }
}

/// Mean calibration quality penalised by the spread between channels.
fn radiometric_consistency(snapshot: &DataSnapshot) -> Option<f64> {
    let qualities = unit_values(snapshot.channels.values().map(|c| c.radiometric_quality));
    if qualities.is_empty() {
        return None;
    }
    let lo = qualities.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = qualities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((mean(&qualities) - (hi - lo)).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use concord_core::Channel;

    fn gate() -> QualityGate {
        QualityGate::new(QualityConfig::default())
    }

    fn channel(days: i64, cloud: Option<f64>, res: Option<f64>, radio: Option<f64>) -> Channel {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Channel {
            acquisitions: vec![start, start + Duration::days(days)],
            resolution_m: res,
            cloud_fraction: cloud,
            radiometric_quality: radio,
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_snapshot_fails() {
        let report = gate().assess(&DataSnapshot::empty());
        assert_eq!(report.score, 0.0);
        assert!(!report.pass);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn good_snapshot_passes_cleanly() {
        let snapshot = DataSnapshot::empty()
            .with_channel("optical", channel(400, Some(0.05), Some(10.0), Some(0.95)))
            .with_channel("radar", channel(380, None, Some(10.0), Some(0.95)));
        let report = gate().assess(&snapshot);
        assert!(report.pass, "score was {}", report.score);
        assert!(report.issues.is_empty());
        assert_eq!(report.scores.temporal_coverage, 1.0);
        assert!((report.scores.cloud_contamination - 0.95).abs() < 1e-9);
        assert_eq!(report.scores.spatial_compatibility, 1.0);
    }

    #[test]
    fn weighted_score_of_point_six_fails() {
        // temporal 0 (single date), cloud 0.5, spatial 1, radiometric 0.8
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let snapshot = DataSnapshot::empty().with_channel(
            "optical",
            Channel {
                acquisitions: vec![start],
                resolution_m: Some(30.0),
                cloud_fraction: Some(0.5),
                radiometric_quality: Some(0.8),
                ..Default::default()
            },
        );
        let report = gate().assess(&snapshot);
        assert!((report.score - 0.6).abs() < 1e-9, "score was {}", report.score);
        assert!(!report.pass);
        // temporal and cloud fall below the bar
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn resolution_mismatch_is_reported() {
        let snapshot = DataSnapshot::empty()
            .with_channel("optical", channel(365, Some(0.0), Some(10.0), None))
            .with_channel("gravity", channel(365, None, Some(1000.0), None));
        let report = gate().assess(&snapshot);
        assert!((report.scores.spatial_compatibility - 0.01).abs() < 1e-9);
        assert!(report.issues.iter().any(|i| i.contains("resolutions")));
    }

    #[test]
    fn radiometric_spread_penalised() {
        let snapshot = DataSnapshot::empty()
            .with_channel("a", channel(365, None, None, Some(0.9)))
            .with_channel("b", channel(365, None, None, Some(0.5)));
        let report = gate().assess(&snapshot);
        // mean 0.7 minus spread 0.4
        assert!((report.scores.radiometric_consistency - 0.3).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_metadata_is_clamped() {
        let snapshot = DataSnapshot::empty()
            .with_channel("a", channel(365, Some(1.7), Some(10.0), Some(f64::NAN)));
        let report = gate().assess(&snapshot);
        assert_eq!(report.scores.cloud_contamination, 0.0);
        // NaN is dropped, leaving nothing reported
        assert_eq!(report.scores.radiometric_consistency, 0.5);
        assert!(report.issues.iter().any(|i| i.contains("radiometric quality")));
    }

    #[test]
    fn unreported_metadata_scores_neutral() {
        let bare = DataSnapshot::empty().with_channel("optical", Channel::default());
        let report = gate().assess(&bare);
        // temporal 0, the other three at 0.5: 0.3*0.5 + 0.25*0.5 + 0.25*0.5
        assert!((report.score - 0.4).abs() < 1e-9, "score was {}", report.score);
        assert!(!report.pass);
        assert_eq!(report.issues.len(), 4);
        assert_eq!(report.scores.cloud_contamination, 0.5);
        assert_eq!(report.scores.spatial_compatibility, 0.5);
        assert_eq!(report.scores.radiometric_consistency, 0.5);

        // full coverage cannot carry a snapshot with no other metadata
        let dated = DataSnapshot::empty().with_channel("optical", channel(365, None, None, None));
        let report = gate().assess(&dated);
        assert!((report.score - 0.6).abs() < 1e-9, "score was {}", report.score);
        assert!(!report.pass);
        assert_eq!(report.issues.len(), 3);
    }

    #[test]
    fn unreported_score_is_configurable() {
        let config = QualityConfig {
            unreported_score: 1.0,
            ..Default::default()
        };
        let snapshot =
            DataSnapshot::empty().with_channel("optical", channel(365, None, None, None));
        let report = QualityGate::new(config).assess(&snapshot);
        assert_eq!(report.score, 1.0);
        assert!(report.pass);
        // still flagged even when scored generously
        assert_eq!(report.issues.len(), 3);
    }

    #[test]
    fn custom_weights_are_normalised() {
        let mut config = QualityConfig::default();
        config.weights.temporal = 2.0;
        config.weights.cloud = 0.0;
        config.weights.spatial = 0.0;
        config.weights.radiometric = 0.0;
        let snapshot = DataSnapshot::empty().with_channel("a", channel(365, Some(1.0), None, None));
        let report = QualityGate::new(config).assess(&snapshot);
        assert_eq!(report.score, 1.0);
        assert!(report.pass);
    }
}
