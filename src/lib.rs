//! scamshield - Email fraud/phishing signal orchestration and scoring
//!
//! Collects independent signals about an email (sender identity, URL
//! safety, content similarity to known scams, a structured judgment)
//! concurrently and under deadlines, then fuses them into an explainable
//! risk verdict.
//!
//! # Architecture
//!
//! - Signal sources run in parallel, each bounded by a per-source timeout
//!   and a global deadline; transient failures are retried with backoff
//! - Results land in an insert-once aggregator that is closed exactly once
//! - A pure scorer turns the frozen evidence into a verdict
//! - Every step is recorded as an event; an analysis can be rebuilt by
//!   replaying them
//!
//! # Modules
//!
//! - `core`: Orchestrator, Aggregator, Scorer, rules and engine config
//! - `domain`: Data structures (Email, Evidence, Verdict, events)
//! - `sources`: Signal source trait and built-in sources
//! - `retrieval`: Exemplar similarity index and embedders
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Analyze an email
//! scamshield analyze email.json
//!
//! # Record it and look at it later
//! scamshield analyze email.json --record
//! scamshield history
//! scamshield show <analysis-id>
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod retrieval;
pub mod sources;

// Re-export main types at crate root for convenience
pub use core::{AnalysisReport, EngineConfig, EngineError, Orchestrator, RuleConfig};
pub use domain::{Email, Evidence, EvidenceSet, EvidenceStatus, RiskLevel, SourceId, Verdict};
pub use sources::{SignalSource, SourceError};
