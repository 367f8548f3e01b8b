//! Scoring Integration Tests
//!
//! Tests for YAML engine settings and the built-in sources end to end.

use std::collections::HashMap;
use std::path::PathBuf;

use scamshield::cli::build_orchestrator;
use scamshield::config::{EmbeddingConfig, ReputationConfig, ResolvedConfig};
use scamshield::core::{score, EngineConfig, SeverityCurve};
use scamshield::domain::{
    Email, Evidence, EvidenceSet, Findings, ReasonOrigin, RiskLevel, SourceId,
};
use scamshield::sources::DomainRecord;

fn resolved(reputation: ReputationConfig) -> ResolvedConfig {
    ResolvedConfig {
        home: PathBuf::from("/tmp/scamshield-test"),
        exemplars: None,
        config_file: None,
        engine: EngineConfig::default(),
        reputation,
        embedding: EmbeddingConfig::default(),
    }
}

fn reputation() -> ReputationConfig {
    let mut domains = HashMap::new();
    domains.insert(
        "paypa1.com".to_string(),
        DomainRecord {
            age_days: Some(3),
            spf_pass: Some(false),
            dkim_pass: Some(false),
            dmarc_pass: Some(false),
        },
    );
    domains.insert(
        "example.com".to_string(),
        DomainRecord {
            age_days: Some(9_000),
            spf_pass: Some(true),
            dkim_pass: Some(true),
            dmarc_pass: Some(true),
        },
    );

    ReputationConfig {
        domains,
        blocklist: vec!["*paypa1.com".to_string()],
        blocklist_confidence: 0.9,
    }
}

#[test]
fn test_engine_config_from_yaml() {
    let yaml = r#"
collection:
  per_source_timeout_ms: 750
  global_deadline_ms: 2500
  retry_policy:
    max_retries: 1
  required_sources: [url_inspection, content_analysis]
  optional_sources: [judgment]
rules:
  source_weights:
    url_inspection: 2.0
    content_analysis: 1.0
    judgment: 0.5
  completeness_penalty: 5
prior_score: 20
"#;

    let config = EngineConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.collection.per_source_timeout_ms, 750);
    assert_eq!(config.collection.retry_policy.max_retries, 1);
    assert_eq!(config.collection.retry_policy.base_backoff_ms, 100);
    assert_eq!(
        config.source_order(),
        vec![
            SourceId::UrlInspection,
            SourceId::ContentAnalysis,
            SourceId::Judgment
        ]
    );
    assert_eq!(config.rules.source_weight(SourceId::UrlInspection), 2.0);
    assert_eq!(config.rules.completeness_penalty, 5);
    assert_eq!(config.prior_score, Some(20));

    // Unspecified tables keep their defaults
    assert!(!config.rules.rules_for(SourceId::UrlInspection).is_empty());
}

#[test]
fn test_engine_config_rejects_invalid_yaml() {
    // Required source with weight zero
    let yaml = r#"
collection:
  required_sources: [judgment]
  optional_sources: []
rules:
  source_weights:
    judgment: 0.0
"#;
    assert!(EngineConfig::from_yaml(yaml).is_err());

    // Duplicate source
    let yaml = r#"
collection:
  required_sources: [judgment]
  optional_sources: [judgment]
"#;
    assert!(EngineConfig::from_yaml(yaml).is_err());

    // Unknown curve kind
    let yaml = r#"
rules:
  weight_table:
    judgment:
      - finding: intent
        weight: 1.0
        curve: { kind: sigmoid }
"#;
    assert!(EngineConfig::from_yaml(yaml).is_err());
}

#[test]
fn test_partial_weight_table_keeps_other_sources_scoring() {
    let yaml = r#"
rules:
  weight_table:
    url_inspection:
      - finding: url_flagged
        weight: 1.0
        curve: { kind: flag }
"#;
    let config = EngineConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.rules.rules_for(SourceId::UrlInspection).len(), 1);
    assert!(!config.rules.rules_for(SourceId::SenderReputation).is_empty());

    let mut sender = Findings::new();
    sender.insert("domain_age_days".to_string(), 2.0.into());
    sender.insert("spf_pass".to_string(), false.into());
    sender.insert("reply_to_mismatch".to_string(), true.into());
    let mut url = Findings::new();
    url.insert("url_flagged".to_string(), false.into());

    let mut evidence = EvidenceSet::new([SourceId::SenderReputation, SourceId::UrlInspection]);
    evidence.insert(Evidence::completed(SourceId::SenderReputation, sender, 1.0));
    evidence.insert(Evidence::completed(SourceId::UrlInspection, url, 0.7));

    let verdict = score(&evidence, &config.rules);
    assert!(verdict.fraud_score > 0);
    assert_eq!(
        verdict
            .reasons_from(&ReasonOrigin::Source(SourceId::SenderReputation))
            .count(),
        1
    );
}

#[test]
fn test_empty_yaml_is_default() {
    let config = EngineConfig::from_yaml("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert!(matches!(
        config.rules.rules_for(SourceId::SenderReputation)[0].curve,
        SeverityCurve::Ramp { .. }
    ));
}

#[tokio::test]
async fn test_phishing_email_scores_high() {
    let cfg = resolved(reputation());
    let orchestrator = build_orchestrator(&cfg).await.unwrap();

    let email = Email::new("security@paypa1.com")
        .with_display_name("service@paypal.com")
        .with_subject("URGENT: verify your account")
        .with_body(
            "Your account has been suspended. Verify your password immediately \
             or it will be closed within 24 hours.",
        )
        .with_url("http://secure.paypa1.com/login")
        .with_header("Reply-To", "collect@mailbox.ru");

    let report = orchestrator.analyze_detailed(email, &cfg.engine).await.unwrap();
    let verdict = &report.verdict;

    assert!(verdict.fraud_score >= 75, "score was {}", verdict.fraud_score);
    assert!(matches!(
        verdict.risk_level,
        RiskLevel::HighRisk | RiskLevel::Scam
    ));
    assert!(verdict.complete);
    assert_eq!(verdict.reasons_from(&ReasonOrigin::Override(0)).count(), 1);
    assert!(verdict
        .reasons_from(&ReasonOrigin::Source(SourceId::UrlInspection))
        .any(|entry| entry.contribution > 0.0));
}

#[tokio::test]
async fn test_ordinary_email_scores_low() {
    let cfg = resolved(reputation());
    let orchestrator = build_orchestrator(&cfg).await.unwrap();

    let email = Email::new("alice@example.com")
        .with_display_name("Alice")
        .with_subject("Notes from Tuesday")
        .with_body("Hi team, attached are the notes from our planning meeting. See you next week.")
        .with_url("https://docs.example.com/notes");

    let verdict = orchestrator.analyze(email, &cfg.engine).await.unwrap();

    assert!(verdict.fraud_score < 25, "score was {}", verdict.fraud_score);
    assert_eq!(verdict.risk_level, RiskLevel::Safe);
    assert!(verdict.complete);
    assert!(verdict
        .reasoning
        .iter()
        .all(|entry| !matches!(entry.origin, Some(ReasonOrigin::Override(_)))));
}

#[tokio::test]
async fn test_same_email_same_verdict() {
    let cfg = resolved(reputation());
    let orchestrator = build_orchestrator(&cfg).await.unwrap();
    let email = Email::new("security@paypa1.com")
        .with_subject("Invoice")
        .with_url("https://paypa1.com/pay");

    let first = orchestrator.analyze(email.clone(), &cfg.engine).await.unwrap();
    let second = orchestrator.analyze(email, &cfg.engine).await.unwrap();
    assert_eq!(first, second);
}
