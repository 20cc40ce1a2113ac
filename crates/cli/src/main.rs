mod cli;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use concord_core::{config, EngineConfig, EvaluationResult};
use concord_rules::{default_rules, loader, PatternRegistry, VetoRule};

use crate::cli::{CliArgs, Command};
use crate::scenario::{replay_all, ReplaySetup, Scenario};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    config::load_dotenv();
    let args = CliArgs::parse();

    let engine_config = EngineConfig::for_profile(&args.profile)
        .with_context(|| format!("invalid configuration for profile '{}'", args.profile))?;

    match &args.command {
        Command::Evaluate { scenarios, compact } => {
            evaluate(&args, engine_config, scenarios, *compact).await
        }
        Command::Rules => {
            let rules = resolve_rules(args.rules.as_deref())?;
            print!("{}", serde_yaml::to_string(&rules)?);
            Ok(())
        }
        Command::Config => {
            engine_config.log_summary();
            println!("{}", serde_json::to_string_pretty(&engine_config)?);
            Ok(())
        }
    }
}

fn resolve_rules(path: Option<&Path>) -> Result<Vec<VetoRule>> {
    match path {
        Some(path) => loader::load_veto_rules(path)
            .with_context(|| format!("failed to load veto rules from {}", path.display())),
        None => Ok(default_rules()),
    }
}

async fn evaluate(
    args: &CliArgs,
    engine_config: EngineConfig,
    paths: &[PathBuf],
    compact: bool,
) -> Result<()> {
    let scenarios = paths
        .iter()
        .map(|p| Scenario::load(p))
        .collect::<Result<Vec<_>>>()?;

    engine_config.log_summary();

    let mut setup = ReplaySetup::new(engine_config, resolve_rules(args.rules.as_deref())?);
    if let Some(path) = &args.patterns {
        let patterns = loader::load_patterns(path)
            .with_context(|| format!("failed to load patterns from {}", path.display()))?;
        setup = setup.with_patterns(Arc::new(PatternRegistry::from_patterns(patterns)?));
    }

    info!(scenarios = scenarios.len(), "evaluating scenarios");
    let replay = replay_all(&scenarios, &setup).await?;

    for (label, result) in &replay.results {
        if compact {
            println!("{}", summary_line(label, result));
        } else {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }

    println!("{}", serde_json::to_string_pretty(&replay.stats)?);
    Ok(())
}

fn summary_line(label: &str, result: &EvaluationResult) -> String {
    let mut line = format!(
        "{label}: detected={} confidence={:.3} agreement={:.3} stage={:?}",
        result.detected, result.confidence, result.weighted_agreement, result.stage
    );
    if let Some(rule) = result.veto.as_ref().and_then(|v| v.rule.as_deref()) {
        line.push_str(&format!(" veto={rule}"));
    }
    if let Some(fp) = &result.fp_match {
        line.push_str(&format!(" fp={} ({:.2})", fp.pattern_id, fp.match_score));
    }
    line
}
