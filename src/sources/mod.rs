//! Signal sources.
//!
//! A signal source inspects one aspect of an email and reports named
//! findings with a confidence. Network clients (WHOIS/DNS, Safe Browsing,
//! model calls) stay behind the capability traits each source is built on,
//! so the engine only sees latency and typed failures.

pub mod content;
pub mod judgment;
pub mod scripted;
pub mod sender;
pub mod url;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::{Email, Findings, SourceId};

pub use content::{ContentAnalysisSource, MAX_BODY_CHARS};
pub use judgment::{Intent, Judgment, JudgmentBackend, JudgmentSource, KeywordJudge};
pub use scripted::{Behavior, ScriptedSource};
pub use sender::{AuthResults, DomainIntel, DomainRecord, SenderReputationSource, StaticDomainIntel};
pub use url::{PatternBlocklist, UrlInspectionSource, UrlReputation, UrlThreat};

/// One dispatch of one source for one email
#[derive(Debug, Clone)]
pub struct SignalRequest {
    /// The email under analysis (shared, read-only)
    pub email: Arc<Email>,

    /// Source this request is addressed to
    pub source: SourceId,

    /// Instant by which the attempt must finish
    pub deadline: Instant,

    /// 1-based attempt number
    pub attempt: u32,
}

impl SignalRequest {
    /// Time left before the deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Successful output of a source: findings plus a confidence in [0, 1]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub findings: Findings,
    pub confidence: f64,
}

impl Observation {
    pub fn new(confidence: f64) -> Self {
        Self {
            findings: Findings::new(),
            confidence,
        }
    }

    /// Add a finding
    pub fn with(mut self, name: &str, value: impl Into<crate::domain::Finding>) -> Self {
        self.findings.insert(name.to_string(), value.into());
        self
    }
}

/// Whether a failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Typed failure raised by a source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network hiccup, rate limit and the like; retry-eligible
    #[error("Transient source error: {0}")]
    Transient(String),

    /// Malformed input, unsupported message and the like; never retried
    #[error("Source failure: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Transient(detail) | Self::Permanent(detail) => detail,
        }
    }
}

/// Trait for signal sources
///
/// Implementations must be stateless per call: the orchestrator invokes
/// several sources concurrently and may abandon a call at any await point.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Which source this is
    fn id(&self) -> SourceId;

    /// Expected latency of one call
    fn nominal_cost(&self) -> Duration;

    /// Whether transient failures may be retried
    fn retryable(&self) -> bool {
        true
    }

    /// Inspect the email and report findings
    async fn invoke(&self, request: &SignalRequest) -> Result<Observation, SourceError>;
}
