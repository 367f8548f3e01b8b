//! Orchestrator Integration Tests
//!
//! Tests for deadlines, retries and round closing with scripted sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use scamshield::core::{CollectionPolicy, EngineConfig, EngineError, Orchestrator, RetryPolicy};
use scamshield::domain::{AnalysisEventType, AnalysisState, Email, EvidenceStatus, SourceId};
use scamshield::sources::{Behavior, Observation, ScriptedSource, SignalSource};

fn email() -> Email {
    Email::new("billing@example.com").with_subject("Your invoice")
}

fn engine(
    per_source_timeout_ms: u64,
    global_deadline_ms: u64,
    retry_policy: RetryPolicy,
    sources: Vec<SourceId>,
) -> EngineConfig {
    EngineConfig {
        collection: CollectionPolicy {
            per_source_timeout_ms,
            global_deadline_ms,
            retry_policy,
            required_sources: sources,
            optional_sources: vec![],
        },
        ..Default::default()
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_backoff_ms: 10,
        max_backoff_ms: 40,
        backoff_multiplier: 2.0,
    }
}

fn benign_url() -> Arc<dyn SignalSource> {
    Arc::new(ScriptedSource::succeeding(
        SourceId::UrlInspection,
        Observation::new(0.7).with("url_flagged", false),
    ))
}

#[tokio::test]
async fn test_hanging_sources_do_not_block_the_deadline() {
    let orchestrator = Orchestrator::new(vec![
        Arc::new(ScriptedSource::new(SourceId::SenderReputation, Behavior::Hang)),
        Arc::new(ScriptedSource::new(SourceId::ContentAnalysis, Behavior::Hang)),
        benign_url(),
    ]);
    let config = engine(
        2_000,
        300,
        fast_retries(),
        vec![
            SourceId::SenderReputation,
            SourceId::UrlInspection,
            SourceId::ContentAnalysis,
        ],
    );

    let started = Instant::now();
    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(250), "closed early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(800), "closed late: {:?}", elapsed);

    assert_eq!(
        report.evidence.get(SourceId::SenderReputation).unwrap().status,
        EvidenceStatus::Skipped
    );
    assert_eq!(
        report.evidence.get(SourceId::ContentAnalysis).unwrap().status,
        EvidenceStatus::Skipped
    );
    assert!(report.evidence.get(SourceId::UrlInspection).unwrap().is_completed());
    assert!(!report.verdict.complete);
}

#[tokio::test]
async fn test_per_source_timeout_is_timed_out_not_skipped() {
    let orchestrator = Orchestrator::new(vec![
        Arc::new(ScriptedSource::new(SourceId::Judgment, Behavior::Hang)),
        benign_url(),
    ]);
    let config = engine(
        100,
        1_000,
        fast_retries(),
        vec![SourceId::UrlInspection, SourceId::Judgment],
    );

    let started = Instant::now();
    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(600));

    let judgment = report.evidence.get(SourceId::Judgment).unwrap();
    assert_eq!(judgment.status, EvidenceStatus::TimedOut);
    assert_eq!(judgment.attempts, 1);

    let timed_out = report
        .analysis
        .events
        .iter()
        .filter(|e| e.event_type == AnalysisEventType::SourceTimedOut)
        .count();
    assert_eq!(timed_out, 1);
}

#[tokio::test]
async fn test_flaky_source_is_retried_until_it_succeeds() {
    let flaky = Arc::new(ScriptedSource::new(
        SourceId::ContentAnalysis,
        Behavior::Flaky {
            failures: 2,
            delay: Duration::from_millis(5),
            observation: Observation::new(0.9).with("scam_similarity", 0.2),
        },
    ));
    let orchestrator = Orchestrator::new(vec![flaky.clone()]);
    let config = engine(200, 2_000, fast_retries(), vec![SourceId::ContentAnalysis]);

    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();

    let content = report.evidence.get(SourceId::ContentAnalysis).unwrap();
    assert_eq!(content.status, EvidenceStatus::Completed);
    assert_eq!(content.attempts, 3);
    assert_eq!(flaky.calls(), 3);
    assert!(report.verdict.complete);

    let retries: Vec<_> = report
        .analysis
        .events
        .iter()
        .filter(|e| e.event_type == AnalysisEventType::AttemptRetrying)
        .collect();
    assert_eq!(retries.len(), 2);
    assert!(retries.iter().all(|e| e.error.is_some()));
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let source = Arc::new(ScriptedSource::new(
        SourceId::SenderReputation,
        Behavior::AlwaysTransient {
            delay: Duration::ZERO,
        },
    ));
    let orchestrator = Orchestrator::new(vec![source.clone(), benign_url()]);
    let config = engine(
        200,
        2_000,
        fast_retries(),
        vec![SourceId::SenderReputation, SourceId::UrlInspection],
    );

    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();

    let sender = report.evidence.get(SourceId::SenderReputation).unwrap();
    match &sender.status {
        EvidenceStatus::Failed { reason } => assert!(reason.contains("scripted failure 3")),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(sender.attempts, 3);
    assert_eq!(source.calls(), 3);
    assert!(!report.verdict.complete);
}

#[tokio::test]
async fn test_backoff_past_deadline_fails_without_sleeping() {
    let source = Arc::new(ScriptedSource::new(
        SourceId::SenderReputation,
        Behavior::AlwaysTransient {
            delay: Duration::ZERO,
        },
    ));
    let orchestrator = Orchestrator::new(vec![source.clone(), benign_url()]);
    let retry = RetryPolicy {
        max_retries: 3,
        base_backoff_ms: 5_000,
        max_backoff_ms: 5_000,
        backoff_multiplier: 1.0,
    };
    let config = engine(
        200,
        500,
        retry,
        vec![SourceId::SenderReputation, SourceId::UrlInspection],
    );

    let started = Instant::now();
    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));

    let sender = report.evidence.get(SourceId::SenderReputation).unwrap();
    match &sender.status {
        EvidenceStatus::Failed { reason } => {
            assert!(reason.starts_with("retry budget cut short by global deadline"))
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_non_retryable_source_is_called_once() {
    let source = Arc::new(
        ScriptedSource::new(
            SourceId::Judgment,
            Behavior::AlwaysTransient {
                delay: Duration::ZERO,
            },
        )
        .non_retryable(),
    );
    let orchestrator = Orchestrator::new(vec![source.clone(), benign_url()]);
    let config = engine(
        200,
        1_000,
        fast_retries(),
        vec![SourceId::UrlInspection, SourceId::Judgment],
    );

    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();

    assert_eq!(source.calls(), 1);
    let judgment = report.evidence.get(SourceId::Judgment).unwrap();
    assert!(matches!(judgment.status, EvidenceStatus::Failed { .. }));
    assert_eq!(judgment.attempts, 1);
}

#[tokio::test]
async fn test_late_result_does_not_change_the_verdict() {
    let slow = Arc::new(ScriptedSource::new(
        SourceId::UrlInspection,
        Behavior::Succeed {
            delay: Duration::from_millis(400),
            observation: Observation::new(1.0).with("url_flagged", true),
        },
    ));
    let orchestrator = Orchestrator::new(vec![
        slow.clone(),
        Arc::new(ScriptedSource::succeeding(
            SourceId::ContentAnalysis,
            Observation::new(0.9).with("scam_similarity", 0.1),
        )),
    ]);
    let config = engine(
        2_000,
        150,
        fast_retries(),
        vec![SourceId::UrlInspection, SourceId::ContentAnalysis],
    );

    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();
    assert_eq!(
        report.evidence.get(SourceId::UrlInspection).unwrap().status,
        EvidenceStatus::Skipped
    );
    let score = report.verdict.fraud_score;

    // Give the abandoned attempt time to finish
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(
        report.evidence.get(SourceId::UrlInspection).unwrap().status,
        EvidenceStatus::Skipped
    );
    assert_eq!(report.verdict.fraud_score, score);
    assert!(report.verdict.fraud_score < 75);
}

#[tokio::test]
async fn test_no_configured_sources_is_exhausted() {
    let orchestrator = Orchestrator::new(vec![benign_url()]);
    let config = engine(200, 1_000, fast_retries(), vec![]);

    let err = orchestrator.analyze(email(), &config).await.unwrap_err();
    match err {
        EngineError::Exhausted {
            attempted,
            analysis,
        } => {
            assert_eq!(attempted, 0);
            assert_eq!(analysis.state, AnalysisState::Exhausted);
            assert!(analysis.fraud_score.is_none());
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_all_failures_without_prior_is_exhausted() {
    let orchestrator = Orchestrator::new(vec![Arc::new(ScriptedSource::new(
        SourceId::UrlInspection,
        Behavior::Permanent {
            reason: "unsupported message".to_string(),
        },
    ))]);
    let config = engine(200, 1_000, fast_retries(), vec![SourceId::UrlInspection]);

    let err = orchestrator.analyze(email(), &config).await.unwrap_err();
    assert!(matches!(err, EngineError::Exhausted { attempted: 1, .. }));
}

#[tokio::test]
async fn test_event_trail_is_ordered() {
    let orchestrator = Orchestrator::new(vec![
        benign_url(),
        Arc::new(ScriptedSource::new(SourceId::Judgment, Behavior::Hang)),
    ]);
    let config = engine(
        100,
        1_000,
        fast_retries(),
        vec![SourceId::UrlInspection, SourceId::Judgment],
    );

    let report = orchestrator.analyze_detailed(email(), &config).await.unwrap();
    let events = &report.analysis.events;

    assert_eq!(events.first().unwrap().event_type, AnalysisEventType::RoundDispatched);
    assert_eq!(events.last().unwrap().event_type, AnalysisEventType::Scored);

    let closed: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_type == AnalysisEventType::RoundClosed)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(closed.len(), 1);

    // Every per-source outcome precedes the close
    let outcomes_before_close = events[..closed[0]]
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                AnalysisEventType::SourceCompleted | AnalysisEventType::SourceTimedOut
            )
        })
        .count();
    assert_eq!(outcomes_before_close, 2);

    assert!(events.iter().all(|e| e.analysis_id == report.analysis.id));
    assert_eq!(report.analysis.state, AnalysisState::Scored);
}
