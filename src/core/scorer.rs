//! Deterministic scoring of a closed evidence set.
//!
//! 1. Each Completed source's findings go through its weight table to a
//!    partial score in [0, 100], scaled by the source's confidence.
//! 2. Partial scores are averaged with the source weights. Sources that did
//!    not complete, or reported nothing the table can score, stay out of the
//!    denominator.
//! 3. The first matching override (by priority) may raise the score to its
//!    floor.
//! 4. Incomplete evidence adds the completeness penalty, capped at 100.

use tracing::debug;

use super::rules::{FindingRule, RuleConfig};
use crate::domain::{Evidence, EvidenceSet, ReasonEntry, ReasonOrigin, Verdict};

/// Score a closed evidence set
pub fn score(evidence: &EvidenceSet, rules: &RuleConfig) -> Verdict {
    let mut partials = Vec::new();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for record in evidence.iter().filter(|e| e.is_completed()) {
        let weight = rules.source_weight(record.source);
        if weight <= 0.0 {
            continue;
        }
        let Some(partial) = partial_score(record, rules.rules_for(record.source)) else {
            continue;
        };
        weighted_sum += weight * partial.score;
        total_weight += weight;
        partials.push((record, weight, partial));
    }

    let base = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    };

    let mut reasoning = Vec::new();
    for (record, weight, partial) in &partials {
        let contribution = weight * partial.score / total_weight;
        if contribution > 0.0 {
            reasoning.push(ReasonEntry::new(
                ReasonOrigin::Source(record.source),
                partial.describe(record),
                round2(contribution),
            ));
        }
    }

    let mut fraud_score = base.round().clamp(0.0, 100.0) as u8;

    if let Some((index, rule)) = rules
        .overrides_by_priority()
        .into_iter()
        .find(|(_, rule)| rule.predicate.matches(evidence))
    {
        let raise = rule.score_floor.saturating_sub(fraud_score);
        fraud_score = fraud_score.max(rule.score_floor);
        reasoning.push(ReasonEntry::new(
            ReasonOrigin::Override(index),
            format!("Override: {} floors the score at {}", rule.predicate, rule.score_floor),
            f64::from(raise),
        ));
    }

    let complete = evidence.is_complete();
    if !complete {
        fraud_score = apply_completeness_penalty(fraud_score, evidence, rules, &mut reasoning);
    }

    debug!(
        base,
        fraud_score,
        complete,
        scored_sources = partials.len(),
        "Scored evidence"
    );

    Verdict {
        fraud_score,
        risk_level: rules.score_thresholds.level_for(fraud_score),
        reasoning,
        complete,
    }
}

/// Verdict built from a configured prior when no source produced usable
/// evidence
pub fn score_from_prior(evidence: &EvidenceSet, rules: &RuleConfig, prior: u8) -> Verdict {
    let mut fraud_score = prior.min(100);
    let mut reasoning = vec![ReasonEntry::new(
        ReasonOrigin::Prior,
        format!("No source produced usable evidence; prior score {}", fraud_score),
        f64::from(fraud_score),
    )];

    let complete = evidence.is_complete();
    if !complete {
        fraud_score = apply_completeness_penalty(fraud_score, evidence, rules, &mut reasoning);
    }

    Verdict {
        fraud_score,
        risk_level: rules.score_thresholds.level_for(fraud_score),
        reasoning,
        complete,
    }
}

fn apply_completeness_penalty(
    score: u8,
    evidence: &EvidenceSet,
    rules: &RuleConfig,
    reasoning: &mut Vec<ReasonEntry>,
) -> u8 {
    let added = rules.completeness_penalty.min(100u8.saturating_sub(score));
    let degraded: Vec<String> = evidence
        .expected()
        .iter()
        .filter_map(|source| match evidence.get(*source) {
            Some(record) if record.is_completed() => None,
            Some(record) => Some(format!("{} {}", source, record.status.label())),
            None => Some(format!("{} missing", source)),
        })
        .collect();

    reasoning.push(ReasonEntry::new(
        ReasonOrigin::Completeness,
        format!("Incomplete evidence ({})", degraded.join(", ")),
        f64::from(added),
    ));
    score + added
}

struct Partial {
    score: f64,
    drivers: Vec<String>,
}

impl Partial {
    fn describe(&self, record: &Evidence) -> String {
        let drivers = if self.drivers.is_empty() {
            "no risk indicators".to_string()
        } else {
            self.drivers.join(", ")
        };
        format!(
            "{}: {} (partial {:.1}, confidence {:.2})",
            record.source, drivers, self.score, record.confidence
        )
    }
}

/// Confidence-scaled partial score, or None when no finding is scorable
fn partial_score(record: &Evidence, rules: &[FindingRule]) -> Option<Partial> {
    let mut severity_sum = 0.0;
    let mut weight_sum = 0.0;
    let mut drivers = Vec::new();

    for rule in rules {
        let Some(value) = record.finding(&rule.finding) else {
            continue;
        };
        let Some(severity) = rule.curve.severity(value) else {
            continue;
        };
        severity_sum += rule.weight * severity;
        weight_sum += rule.weight;
        if severity > 0.0 && rule.weight > 0.0 {
            drivers.push(format!("{}={}", rule.finding, value));
        }
    }

    if weight_sum <= 0.0 {
        return None;
    }

    Some(Partial {
        score: 100.0 * severity_sum / weight_sum * record.confidence,
        drivers,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
