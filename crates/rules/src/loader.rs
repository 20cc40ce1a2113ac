//! Filesystem loader for veto rules and false-positive patterns.
//!
//! Each YAML file holds a list of items. A path may point at a single file
//! or at a directory; directories are scanned non-recursively in file-name
//! order, so rule evaluation order is the file order followed by the order
//! inside each file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::{Result, RuleError};
use crate::patterns::FpPattern;
use crate::veto::VetoRule;

// ── Load result types ───────────────────────────────────────────────

/// Outcome of loading a single file.
#[derive(Debug)]
pub struct LoadResult {
    /// Path to the file that was loaded.
    pub path: PathBuf,
    /// Status of the load attempt.
    pub status: LoadStatus,
}

/// Status of a single file load attempt.
#[derive(Debug)]
pub enum LoadStatus {
    /// File parsed; `count` items were read.
    Loaded { count: usize },
    /// File was skipped (dotfile, non-YAML, etc.).
    Skipped { reason: String },
    /// Parse error occurred.
    Failed { error: String },
}

/// Items read from a file or directory, plus per-file status.
#[derive(Debug)]
pub struct Loaded<T> {
    pub items: Vec<T>,
    pub reports: Vec<LoadResult>,
}

impl<T> Loaded<T> {
    pub fn failures(&self) -> impl Iterator<Item = &LoadResult> {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, LoadStatus::Failed { .. }))
    }

    /// Turn any per-file failure into an error.
    pub fn strict(self) -> Result<Vec<T>> {
        let failures: Vec<String> = self
            .reports
            .iter()
            .filter_map(|r| match &r.status {
                LoadStatus::Failed { error } => Some(format!("{}: {}", r.path.display(), error)),
                _ => None,
            })
            .collect();
        if failures.is_empty() {
            Ok(self.items)
        } else {
            Err(RuleError::Validation(failures.join("; ")))
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

/// Parse one YAML file holding a list of `T`.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = fs::read_to_string(path)?;
    let items: Vec<T> = serde_yaml::from_str(&contents)?;
    Ok(items)
}

/// Load a single file or every YAML file in a directory.
///
/// Dotfiles and non-YAML files in a directory are skipped. Parse errors are
/// reported per file and do not abort the scan.
pub fn load_path<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>> {
    if !path.is_dir() {
        let items = load_file(path)?;
        let count = items.len();
        return Ok(Loaded {
            items,
            reports: vec![LoadResult {
                path: path.to_path_buf(),
                status: LoadStatus::Loaded { count },
            }],
        });
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| !p.is_dir())
        .collect();
    paths.sort();

    let mut items = Vec::new();
    let mut reports = Vec::new();
    for path in paths {
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
        {
            reports.push(LoadResult {
                path,
                status: LoadStatus::Skipped {
                    reason: "dotfile".to_string(),
                },
            });
            continue;
        }

        if !is_yaml(&path) {
            reports.push(LoadResult {
                path,
                status: LoadStatus::Skipped {
                    reason: "not a YAML file".to_string(),
                },
            });
            continue;
        }

        match load_file::<T>(&path) {
            Ok(mut loaded) => {
                let count = loaded.len();
                info!(path = %path.display(), count, "loaded file");
                items.append(&mut loaded);
                reports.push(LoadResult {
                    path,
                    status: LoadStatus::Loaded { count },
                });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load file");
                reports.push(LoadResult {
                    path,
                    status: LoadStatus::Failed {
                        error: e.to_string(),
                    },
                });
            }
        }
    }

    Ok(Loaded { items, reports })
}

/// Load veto rules; any unreadable file is an error.
pub fn load_veto_rules(path: &Path) -> Result<Vec<VetoRule>> {
    load_path(path)?.strict()
}

/// Load false-positive patterns; any unreadable file is an error.
pub fn load_patterns(path: &Path) -> Result<Vec<FpPattern>> {
    load_path(path)?.strict()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::veto::VetoEngine;
    use tempfile::TempDir;

    const RULES_YAML: &str = r#"
- name: residual
  reason: residual too high
  primary:
    when: residual_above
    threshold: 1.0
- name: surface-only
  reason: no subsurface support
  vetoing_agent: geology-review
  primary:
    when: detected
    detector: spectral
  secondary:
    when: none_detected
    detectors: [gravity, structural]
"#;

    const PATTERNS_YAML: &str = r#"
- id: fp-iron-staining
  name: Iron oxide staining
  target_category: copper
  context_tag: laterite
  expected:
    spectral: true
    gravity: false
  notes: Weathered surface mimics alteration.
"#;

    #[test]
    fn load_rules_from_file() {
        let dir = TempDir::new().expect("create tempdir");
        let path = dir.path().join("rules.yml");
        fs::write(&path, RULES_YAML).unwrap();

        let rules = load_veto_rules(&path).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "residual");
        assert_eq!(rules[0].primary, Predicate::ResidualAbove { threshold: 1.0 });
        assert!(rules[0].enabled);
        assert_eq!(rules[1].vetoing_agent.as_deref(), Some("geology-review"));
        assert!(rules[1].secondary.is_some());

        VetoEngine::new(rules, true).unwrap();
    }

    #[test]
    fn directory_scan_is_ordered_and_skips_noise() {
        let dir = TempDir::new().expect("create tempdir");
        fs::write(
            dir.path().join("20-late.yml"),
            RULES_YAML.replace("name: residual\n", "name: late\n"),
        )
        .unwrap();
        fs::write(dir.path().join("10-early.yaml"), RULES_YAML).unwrap();
        fs::write(dir.path().join(".hidden.yml"), RULES_YAML).unwrap();
        fs::write(dir.path().join("readme.txt"), "not rules").unwrap();

        let loaded: Loaded<VetoRule> = load_path(dir.path()).unwrap();
        let names: Vec<_> = loaded.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["residual", "surface-only", "late", "surface-only"]);

        let skipped = loaded
            .reports
            .iter()
            .filter(|r| matches!(r.status, LoadStatus::Skipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn broken_file_fails_strict_load() {
        let dir = TempDir::new().expect("create tempdir");
        fs::write(dir.path().join("good.yml"), RULES_YAML).unwrap();
        fs::write(dir.path().join("bad.yml"), "- name: [unclosed").unwrap();

        let loaded: Loaded<VetoRule> = load_path(dir.path()).unwrap();
        assert_eq!(loaded.failures().count(), 1);
        assert_eq!(loaded.items.len(), 2);

        assert!(matches!(
            load_veto_rules(dir.path()),
            Err(RuleError::Validation(_))
        ));
    }

    #[test]
    fn unknown_rule_fields_are_rejected() {
        let dir = TempDir::new().expect("create tempdir");
        let path = dir.path().join("rules.yml");
        fs::write(
            &path,
            "- name: x\n  reason: y\n  primary: { when: structural_failure }\n  severity: high\n",
        )
        .unwrap();
        assert!(matches!(load_veto_rules(&path), Err(RuleError::Parse(_))));
    }

    #[test]
    fn load_patterns_from_file() {
        let dir = TempDir::new().expect("create tempdir");
        let path = dir.path().join("patterns.yaml");
        fs::write(&path, PATTERNS_YAML).unwrap();

        let patterns = load_patterns(&path).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].expected.get("spectral"), Some(&true));
        assert_eq!(patterns[0].expected.get("gravity"), Some(&false));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().expect("create tempdir");
        let result = load_veto_rules(&dir.path().join("absent.yml"));
        assert!(matches!(result, Err(RuleError::Io(_))));
    }
}
