use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-detector consensus engine.
///
/// Replays recorded detector outputs through the quality gate, veto rules,
/// false-positive screening and decision fusion.
#[derive(Parser, Debug)]
#[command(name = "concord", about = "Multi-detector consensus engine")]
pub struct CliArgs {
    /// Configuration profile (keys are read as {PROFILE}_{KEY} first)
    #[arg(long, global = true, env = "CONCORD_PROFILE", default_value = "")]
    pub profile: String,

    /// Veto rule file or directory (built-in rules when unset)
    #[arg(long, global = true, env = "CONCORD_RULES_PATH")]
    pub rules: Option<PathBuf>,

    /// False-positive pattern file or directory
    #[arg(long, global = true, env = "CONCORD_PATTERNS_PATH")]
    pub patterns: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one or more scenario files
    Evaluate {
        /// Scenario JSON files
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Print one summary line per result instead of full JSON
        #[arg(long)]
        compact: bool,
    },

    /// Print the effective veto rules in evaluation order
    Rules,

    /// Print the resolved engine configuration
    Config,
}
