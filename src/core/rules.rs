//! Scoring rules: weight tables, override rules and risk thresholds.
//!
//! A weight table maps each finding of a source to a severity in [0, 1]
//! through a curve, and gives the finding a weight within its source.
//! Source weights then combine per-source partial scores into one score.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use super::policy::ConfigError;
use crate::domain::{EvidenceSet, Finding, RiskLevel, SourceId};

/// Scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Weight of each source in the final weighted average
    ///
    /// Sources missing from a config file keep their built-in weight.
    #[serde(
        default = "default_source_weights",
        deserialize_with = "overlay_source_weights"
    )]
    pub source_weights: BTreeMap<SourceId, f64>,

    /// Per-source finding rules
    ///
    /// Sources missing from a config file keep their built-in rules.
    #[serde(
        default = "default_weight_table",
        deserialize_with = "overlay_weight_table"
    )]
    pub weight_table: BTreeMap<SourceId, Vec<FindingRule>>,

    /// Hard floors evaluated after the weighted average
    #[serde(default = "default_override_rules")]
    pub override_rules: Vec<OverrideRule>,

    #[serde(default)]
    pub score_thresholds: ScoreThresholds,

    /// Points added when the evidence is incomplete (default: 10)
    #[serde(default = "default_completeness_penalty")]
    pub completeness_penalty: u8,
}

fn default_source_weights() -> BTreeMap<SourceId, f64> {
    BTreeMap::from([
        (SourceId::SenderReputation, 1.0),
        (SourceId::UrlInspection, 1.2),
        (SourceId::ContentAnalysis, 1.0),
        (SourceId::Judgment, 0.8),
    ])
}

fn default_weight_table() -> BTreeMap<SourceId, Vec<FindingRule>> {
    BTreeMap::from([
        (
            SourceId::SenderReputation,
            vec![
                FindingRule::ramp("domain_age_days", 1.0, 365.0, 30.0),
                FindingRule::flag("spf_pass", 0.5, false),
                FindingRule::flag("dkim_pass", 0.5, false),
                FindingRule::flag("dmarc_pass", 0.5, false),
                FindingRule::flag("reply_to_mismatch", 1.0, true),
                FindingRule::flag("display_name_spoof", 1.0, true),
            ],
        ),
        (
            SourceId::UrlInspection,
            vec![
                FindingRule::flag("url_flagged", 2.0, true),
                FindingRule::ramp("suspicious_url_count", 1.0, 0.0, 2.0),
                FindingRule::ramp("insecure_url_count", 0.3, 0.0, 3.0),
            ],
        ),
        (
            SourceId::ContentAnalysis,
            vec![
                FindingRule::ramp("scam_similarity", 1.0, 0.3, 0.85),
                FindingRule::ramp("legitimate_similarity", 0.3, 0.85, 0.3),
                FindingRule::ramp("urgency_terms", 0.5, 0.0, 4.0),
            ],
        ),
        (
            SourceId::Judgment,
            vec![FindingRule::labels(
                "intent",
                1.0,
                &[
                    ("phishing", 1.0),
                    ("scam", 1.0),
                    ("uncertain", 0.5),
                    ("spam", 0.4),
                    ("legitimate", 0.0),
                ],
            )],
        ),
    ])
}

fn default_override_rules() -> Vec<OverrideRule> {
    vec![
        OverrideRule {
            predicate: OverridePredicate::FlagSet {
                source: SourceId::UrlInspection,
                finding: "url_flagged".to_string(),
                min_confidence: 0.8,
            },
            score_floor: 75,
            priority: 0,
        },
        OverrideRule {
            predicate: OverridePredicate::NumberAtLeast {
                source: SourceId::ContentAnalysis,
                finding: "scam_similarity".to_string(),
                threshold: 0.9,
                min_confidence: 0.5,
            },
            score_floor: 70,
            priority: 1,
        },
        OverrideRule {
            predicate: OverridePredicate::LabelIs {
                source: SourceId::Judgment,
                finding: "intent".to_string(),
                label: "phishing".to_string(),
                min_confidence: 0.85,
            },
            score_floor: 60,
            priority: 2,
        },
    ]
}

fn overlay_source_weights<'de, D>(deserializer: D) -> Result<BTreeMap<SourceId, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut weights = default_source_weights();
    weights.extend(BTreeMap::<SourceId, f64>::deserialize(deserializer)?);
    Ok(weights)
}

fn overlay_weight_table<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<SourceId, Vec<FindingRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut table = default_weight_table();
    table.extend(BTreeMap::<SourceId, Vec<FindingRule>>::deserialize(deserializer)?);
    Ok(table)
}

fn default_completeness_penalty() -> u8 {
    10
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            source_weights: default_source_weights(),
            weight_table: default_weight_table(),
            override_rules: default_override_rules(),
            score_thresholds: ScoreThresholds::default(),
            completeness_penalty: default_completeness_penalty(),
        }
    }
}

impl RuleConfig {
    /// A configuration with no weights, rules or overrides
    pub fn empty() -> Self {
        Self {
            source_weights: BTreeMap::new(),
            weight_table: BTreeMap::new(),
            override_rules: Vec::new(),
            score_thresholds: ScoreThresholds::default(),
            completeness_penalty: default_completeness_penalty(),
        }
    }

    /// Weight of a source (0 when unset)
    pub fn source_weight(&self, source: SourceId) -> f64 {
        self.source_weights.get(&source).copied().unwrap_or(0.0)
    }

    /// Finding rules for a source
    pub fn rules_for(&self, source: SourceId) -> &[FindingRule] {
        self.weight_table
            .get(&source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Override rules with their configured index, in evaluation order
    ///
    /// Lower priority values are evaluated first; ties keep declaration order.
    pub fn overrides_by_priority(&self) -> Vec<(usize, &OverrideRule)> {
        let mut rules: Vec<(usize, &OverrideRule)> = self.override_rules.iter().enumerate().collect();
        rules.sort_by_key(|(_, rule)| rule.priority);
        rules
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (source, weight) in &self.source_weights {
            check_weight(*weight, || format!("source {}", source))?;
        }

        for (source, rules) in &self.weight_table {
            for rule in rules {
                let context = || format!("{}.{}", source, rule.finding);
                check_weight(rule.weight, context)?;
                rule.curve.validate().map_err(|reason| ConfigError::InvalidCurve {
                    context: context(),
                    reason,
                })?;
            }
        }

        for rule in &self.override_rules {
            if rule.score_floor > 100 {
                return Err(ConfigError::OutOfRange {
                    field: "score_floor",
                    value: f64::from(rule.score_floor),
                });
            }
            let min_confidence = rule.predicate.min_confidence();
            if !(0.0..=1.0).contains(&min_confidence) {
                return Err(ConfigError::OutOfRange {
                    field: "min_confidence",
                    value: min_confidence,
                });
            }
        }

        self.score_thresholds.validate()?;

        if self.completeness_penalty > 100 {
            return Err(ConfigError::OutOfRange {
                field: "completeness_penalty",
                value: f64::from(self.completeness_penalty),
            });
        }

        Ok(())
    }
}

fn check_weight(weight: f64, context: impl Fn() -> String) -> Result<(), ConfigError> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(ConfigError::InvalidWeight {
            context: context(),
            weight,
        });
    }
    Ok(())
}

/// How one finding feeds its source's partial score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRule {
    pub finding: String,

    /// Weight within the source
    pub weight: f64,

    pub curve: SeverityCurve,
}

impl FindingRule {
    pub fn flag(finding: &str, weight: f64, risky_when: bool) -> Self {
        Self {
            finding: finding.to_string(),
            weight,
            curve: SeverityCurve::Flag { risky_when },
        }
    }

    pub fn ramp(finding: &str, weight: f64, safe_at: f64, risky_at: f64) -> Self {
        Self {
            finding: finding.to_string(),
            weight,
            curve: SeverityCurve::Ramp { safe_at, risky_at },
        }
    }

    pub fn labels(finding: &str, weight: f64, severities: &[(&str, f64)]) -> Self {
        Self {
            finding: finding.to_string(),
            weight,
            curve: SeverityCurve::Labels {
                severities: severities
                    .iter()
                    .map(|(label, severity)| (label.to_string(), *severity))
                    .collect(),
            },
        }
    }
}

/// Maps a finding value to a severity in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeverityCurve {
    /// Boolean finding: severity 1 when it equals `risky_when`, else 0
    Flag {
        #[serde(default = "default_risky_when")]
        risky_when: bool,
    },

    /// Numeric finding: 0 at `safe_at`, 1 at `risky_at`, linear in between.
    /// Either end may be the larger one.
    Ramp { safe_at: f64, risky_at: f64 },

    /// Categorical finding: severity per label
    Labels { severities: BTreeMap<String, f64> },
}

fn default_risky_when() -> bool {
    true
}

impl SeverityCurve {
    /// Severity of a finding, or None when the value doesn't fit the curve
    pub fn severity(&self, finding: &Finding) -> Option<f64> {
        match self {
            Self::Flag { risky_when } => finding
                .as_bool()
                .map(|value| if value == *risky_when { 1.0 } else { 0.0 }),
            Self::Ramp { safe_at, risky_at } => {
                let value = finding.as_f64().filter(|v| v.is_finite())?;
                Some(((value - safe_at) / (risky_at - safe_at)).clamp(0.0, 1.0))
            }
            Self::Labels { severities } => {
                let label = finding.as_label()?;
                severities
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(label))
                    .map(|(_, severity)| *severity)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Flag { .. } => Ok(()),
            Self::Ramp { safe_at, risky_at } => {
                if !safe_at.is_finite() || !risky_at.is_finite() {
                    return Err("ramp ends must be finite".to_string());
                }
                if safe_at == risky_at {
                    return Err("safe_at and risky_at must differ".to_string());
                }
                Ok(())
            }
            Self::Labels { severities } => {
                match severities
                    .iter()
                    .find(|(_, severity)| !(0.0..=1.0).contains(*severity))
                {
                    Some((label, severity)) => Err(format!(
                        "severity {} for label '{}' is outside [0, 1]",
                        severity, label
                    )),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Hard rule: when the predicate matches, the score is at least `score_floor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub predicate: OverridePredicate,

    pub score_floor: u8,

    /// Lower values are evaluated first
    #[serde(default)]
    pub priority: u32,
}

/// Condition on the Completed evidence of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverridePredicate {
    /// A boolean finding is true
    FlagSet {
        source: SourceId,
        finding: String,
        #[serde(default)]
        min_confidence: f64,
    },

    /// A numeric finding is at least `threshold`
    NumberAtLeast {
        source: SourceId,
        finding: String,
        threshold: f64,
        #[serde(default)]
        min_confidence: f64,
    },

    /// A numeric finding is at most `threshold`
    NumberAtMost {
        source: SourceId,
        finding: String,
        threshold: f64,
        #[serde(default)]
        min_confidence: f64,
    },

    /// A categorical finding equals `label` (case-insensitive)
    LabelIs {
        source: SourceId,
        finding: String,
        label: String,
        #[serde(default)]
        min_confidence: f64,
    },
}

impl OverridePredicate {
    pub fn source(&self) -> SourceId {
        match self {
            Self::FlagSet { source, .. }
            | Self::NumberAtLeast { source, .. }
            | Self::NumberAtMost { source, .. }
            | Self::LabelIs { source, .. } => *source,
        }
    }

    pub fn finding(&self) -> &str {
        match self {
            Self::FlagSet { finding, .. }
            | Self::NumberAtLeast { finding, .. }
            | Self::NumberAtMost { finding, .. }
            | Self::LabelIs { finding, .. } => finding,
        }
    }

    pub fn min_confidence(&self) -> f64 {
        match self {
            Self::FlagSet { min_confidence, .. }
            | Self::NumberAtLeast { min_confidence, .. }
            | Self::NumberAtMost { min_confidence, .. }
            | Self::LabelIs { min_confidence, .. } => *min_confidence,
        }
    }

    /// Whether the predicate holds; only Completed evidence can match
    pub fn matches(&self, evidence: &EvidenceSet) -> bool {
        let Some(record) = evidence.get(self.source()) else {
            return false;
        };
        if !record.is_completed() || record.confidence < self.min_confidence() {
            return false;
        }
        let Some(value) = record.finding(self.finding()) else {
            return false;
        };

        match self {
            Self::FlagSet { .. } => value.as_bool() == Some(true),
            Self::NumberAtLeast { threshold, .. } => value.as_f64().is_some_and(|v| v >= *threshold),
            Self::NumberAtMost { threshold, .. } => value.as_f64().is_some_and(|v| v <= *threshold),
            Self::LabelIs { label, .. } => value
                .as_label()
                .is_some_and(|v| v.eq_ignore_ascii_case(label)),
        }
    }
}

impl fmt::Display for OverridePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self.source();
        let finding = self.finding();
        match self {
            Self::FlagSet { .. } => write!(f, "{}.{} is set", source, finding)?,
            Self::NumberAtLeast { threshold, .. } => {
                write!(f, "{}.{} >= {}", source, finding, threshold)?
            }
            Self::NumberAtMost { threshold, .. } => {
                write!(f, "{}.{} <= {}", source, finding, threshold)?
            }
            Self::LabelIs { label, .. } => write!(f, "{}.{} is '{}'", source, finding, label)?,
        }
        if self.min_confidence() > 0.0 {
            write!(f, " (confidence >= {})", self.min_confidence())?;
        }
        Ok(())
    }
}

/// Lower bounds of Safe, Suspicious, HighRisk and Scam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreThresholds(pub [u8; 4]);

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self([0, 25, 60, 85])
    }
}

impl ScoreThresholds {
    /// Risk band containing `score`
    pub fn level_for(&self, score: u8) -> RiskLevel {
        RiskLevel::ASCENDING
            .iter()
            .zip(self.0.iter())
            .rev()
            .find(|(_, lower)| score >= **lower)
            .map(|(level, _)| *level)
            .unwrap_or(RiskLevel::Safe)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = self.0;
        let increasing = bounds.windows(2).all(|pair| pair[0] < pair[1]);
        if bounds[0] != 0 || !increasing || bounds[3] > 100 {
            return Err(ConfigError::InvalidThresholds(bounds));
        }
        Ok(())
    }
}
