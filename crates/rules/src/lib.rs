//! Declarative suppression rules for the consensus engine.
//!
//! This crate provides:
//! - Veto predicates over a full detector result set, as YAML-friendly data
//! - An ordered, first-match-wins veto rule engine with a default rule set
//! - A false-positive pattern registry and fingerprint matcher
//! - A YAML loader for rule and pattern files or directories

pub mod error;
pub mod loader;
pub mod patterns;
pub mod predicate;
pub mod veto;

pub use error::{Result, RuleError};
pub use patterns::{Fingerprint, FpPattern, PatternMatcher, PatternRegistry, PatternSource};
pub use predicate::Predicate;
pub use veto::{default_rules, VetoEngine, VetoRule};
