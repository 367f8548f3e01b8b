//! Domain types for the scamshield engine.
//!
//! This module contains the core data structures:
//! - Email: the immutable input
//! - Evidence: per-source findings and the per-round evidence set
//! - Verdict: score, risk band and reasoning trace
//! - Events/Analysis: audit log and lifecycle state machine

pub mod analysis;
pub mod email;
pub mod events;
pub mod evidence;
pub mod verdict;

// Re-export commonly used types
pub use analysis::{Analysis, AnalysisState, SourceProgress, TransitionError};
pub use email::{domain_of, Email};
pub use events::{AnalysisEvent, AnalysisEventType};
pub use evidence::{clamp_unit, Evidence, EvidenceSet, EvidenceStatus, Finding, Findings, SourceId};
pub use verdict::{ReasonEntry, ReasonOrigin, RecommendedAction, RiskLevel, Verdict};
