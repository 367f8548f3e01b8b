//! Core engine.
//!
//! This module contains:
//! - Policy: engine configuration and validation
//! - Rules: weight tables, overrides and thresholds
//! - Aggregator: insert-once evidence collection
//! - Scorer: deterministic verdicts
//! - Orchestrator: concurrent source dispatch
//! - EventLog: append-only analysis log

pub mod aggregator;
pub mod event_log;
pub mod orchestrator;
pub mod policy;
pub mod rules;
pub mod scorer;

// Re-export commonly used types
pub use aggregator::{Aggregator, InsertOutcome};
pub use event_log::EventLog;
pub use orchestrator::{AnalysisReport, EngineError, Orchestrator};
pub use policy::{CollectionPolicy, ConfigError, EngineConfig, RetryPolicy};
pub use rules::{
    FindingRule, OverridePredicate, OverrideRule, RuleConfig, ScoreThresholds, SeverityCurve,
};
pub use scorer::{score, score_from_prior};
