//! The final, explainable risk verdict.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::evidence::SourceId;

/// Ordered risk bands: Safe < Suspicious < HighRisk < Scam
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Suspicious,
    HighRisk,
    Scam,
}

impl RiskLevel {
    /// Bands in ascending order
    pub const ASCENDING: [RiskLevel; 4] = [
        RiskLevel::Safe,
        RiskLevel::Suspicious,
        RiskLevel::HighRisk,
        RiskLevel::Scam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::Suspicious => "Suspicious",
            Self::HighRisk => "HighRisk",
            Self::Scam => "Scam",
        }
    }

    /// What a mail gateway should do with a message in this band
    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            Self::Safe => RecommendedAction::Allow,
            Self::Suspicious => RecommendedAction::FlagForReview,
            Self::HighRisk => RecommendedAction::Quarantine,
            Self::Scam => RecommendedAction::Block,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Allow,
    FlagForReview,
    Quarantine,
    Block,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::FlagForReview => "flag_for_review",
            Self::Quarantine => "quarantine",
            Self::Block => "block",
        };
        f.write_str(s)
    }
}

/// What produced a reasoning entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonOrigin {
    /// Weighted partial score of one source's evidence
    Source(SourceId),

    /// An override rule, by its index in the configured list
    Override(usize),

    /// Upward adjustment for incomplete evidence
    Completeness,

    /// Configured prior score used when no source reported
    Prior,
}

/// One line of the reasoning trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonEntry {
    /// Human-readable cause
    pub cause: String,

    /// Points this entry added to the score
    pub contribution: f64,

    /// The evidence, override or adjustment behind this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ReasonOrigin>,
}

impl ReasonEntry {
    pub fn new(origin: ReasonOrigin, cause: impl Into<String>, contribution: f64) -> Self {
        Self {
            cause: cause.into(),
            contribution,
            origin: Some(origin),
        }
    }
}

/// Fraud score, risk band and reasoning for one email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Integer score in [0, 100]
    pub fraud_score: u8,

    /// Band derived from `fraud_score`
    pub risk_level: RiskLevel,

    /// Source contributions, then overrides, then the completeness adjustment
    pub reasoning: Vec<ReasonEntry>,

    /// False iff any source ended TimedOut, Failed or Skipped
    pub complete: bool,
}

impl Verdict {
    /// Serialize to the wire format
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Entries produced by the given origin
    pub fn reasons_from<'a>(
        &'a self,
        origin: &'a ReasonOrigin,
    ) -> impl Iterator<Item = &'a ReasonEntry> + 'a {
        self.reasoning
            .iter()
            .filter(move |entry| entry.origin.as_ref() == Some(origin))
    }
}
