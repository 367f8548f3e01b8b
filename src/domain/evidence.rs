//! Evidence produced by signal sources.
//!
//! Each signal source contributes exactly one `Evidence` record per analysis
//! round. Records are collected into an `EvidenceSet`, which keeps at most
//! one record per `SourceId` and iterates in configuration order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a signal source
///
/// The set of sources is fixed; which of them run for a given analysis is
/// decided by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Sender identity: domain age, SPF/DKIM/DMARC, reply-to and display-name checks
    SenderReputation,

    /// URL safety: reputation lookups plus local URL heuristics
    UrlInspection,

    /// Content semantics: similarity to known scam exemplars
    ContentAnalysis,

    /// Structured judgment from a reasoning backend (model or rule engine)
    Judgment,
}

impl SourceId {
    /// All known sources, in their canonical order
    pub const ALL: [SourceId; 4] = [
        SourceId::SenderReputation,
        SourceId::UrlInspection,
        SourceId::ContentAnalysis,
        SourceId::Judgment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SenderReputation => "sender_reputation",
            Self::UrlInspection => "url_inspection",
            Self::ContentAnalysis => "content_analysis",
            Self::Judgment => "judgment",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named finding: numeric, boolean or categorical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Finding {
    Flag(bool),
    Number(f64),
    Label(String),
}

impl Finding {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => write!(f, "{}", value),
            Self::Number(value) => write!(f, "{}", value),
            Self::Label(value) => f.write_str(value),
        }
    }
}

impl From<bool> for Finding {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<f64> for Finding {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for Finding {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<usize> for Finding {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Finding {
    fn from(value: &str) -> Self {
        Self::Label(value.to_string())
    }
}

impl From<String> for Finding {
    fn from(value: String) -> Self {
        Self::Label(value)
    }
}

/// Named findings, ordered by name so iteration is deterministic
pub type Findings = BTreeMap<String, Finding>;

/// Outcome of one source within a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum EvidenceStatus {
    /// The source reported findings
    Completed,

    /// The source exceeded its timeout; in-flight work was abandoned
    TimedOut,

    /// The source failed permanently or exhausted its retries
    Failed { reason: String },

    /// The round closed before the source reported
    Skipped,
}

impl EvidenceStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Output of one signal source for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Source that produced this record
    pub source: SourceId,

    /// How the source ended
    #[serde(flatten)]
    pub status: EvidenceStatus,

    /// Named findings (empty unless Completed)
    #[serde(default)]
    pub findings: Findings,

    /// Declared confidence in [0, 1]
    pub confidence: f64,

    /// Number of attempts made (0 when the source never ran)
    #[serde(default)]
    pub attempts: u32,

    /// Wall-clock time spent on the source
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl Evidence {
    /// Completed evidence; confidence is clamped into [0, 1] (NaN becomes 0)
    pub fn completed(source: SourceId, findings: Findings, confidence: f64) -> Self {
        Self {
            source,
            status: EvidenceStatus::Completed,
            findings,
            confidence: clamp_unit(confidence),
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn timed_out(source: SourceId) -> Self {
        Self::without_findings(source, EvidenceStatus::TimedOut)
    }

    pub fn failed(source: SourceId, reason: impl Into<String>) -> Self {
        Self::without_findings(
            source,
            EvidenceStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn skipped(source: SourceId) -> Self {
        let mut evidence = Self::without_findings(source, EvidenceStatus::Skipped);
        evidence.attempts = 0;
        evidence
    }

    fn without_findings(source: SourceId, status: EvidenceStatus) -> Self {
        Self {
            source,
            status,
            findings: Findings::new(),
            confidence: 0.0,
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// Get a finding by name
    pub fn finding(&self, name: &str) -> Option<&Finding> {
        self.findings.get(name)
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// Clamp a value into [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Evidence for one analysis round, keyed by source
///
/// `expected` records which sources were dispatched, in configuration order;
/// iteration follows that order, never arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSet {
    expected: Vec<SourceId>,
    records: BTreeMap<SourceId, Evidence>,
}

impl EvidenceSet {
    /// Create an empty set expecting the given sources (duplicates ignored)
    pub fn new(expected: impl IntoIterator<Item = SourceId>) -> Self {
        let mut order = Vec::new();
        for source in expected {
            if !order.contains(&source) {
                order.push(source);
            }
        }
        Self {
            expected: order,
            records: BTreeMap::new(),
        }
    }

    /// Insert a record; returns false (and keeps the existing record) if the
    /// source already reported
    pub fn insert(&mut self, evidence: Evidence) -> bool {
        if self.records.contains_key(&evidence.source) {
            return false;
        }
        if !self.expected.contains(&evidence.source) {
            self.expected.push(evidence.source);
        }
        self.records.insert(evidence.source, evidence);
        true
    }

    pub fn get(&self, source: SourceId) -> Option<&Evidence> {
        self.records.get(&source)
    }

    pub fn contains(&self, source: SourceId) -> bool {
        self.records.contains_key(&source)
    }

    /// Sources this round expected, in configuration order
    pub fn expected(&self) -> &[SourceId] {
        &self.expected
    }

    /// Expected sources that have no record yet
    pub fn outstanding(&self) -> Vec<SourceId> {
        self.expected
            .iter()
            .copied()
            .filter(|source| !self.records.contains_key(source))
            .collect()
    }

    /// Records in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.expected
            .iter()
            .filter_map(move |source| self.records.get(source))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with status Completed
    pub fn completed_count(&self) -> usize {
        self.records.values().filter(|e| e.is_completed()).count()
    }

    /// True iff every expected source reported Completed
    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|source| {
            self.records
                .get(source)
                .map(|e| e.is_completed())
                .unwrap_or(false)
        })
    }
}
