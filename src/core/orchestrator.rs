//! Main orchestrator for email analysis.
//!
//! Dispatches every configured signal source concurrently, enforces the
//! per-source timeout and the global deadline, retries transient failures,
//! closes the round and hands the frozen evidence to the scorer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::domain::{
    Analysis, AnalysisEvent, AnalysisEventType, Email, Evidence, EvidenceSet, EvidenceStatus,
    SourceId, Verdict,
};
use crate::sources::{SignalRequest, SignalSource, SourceError};

use super::aggregator::{Aggregator, InsertOutcome};
use super::policy::{ConfigError, EngineConfig, RetryPolicy};
use super::scorer;

/// Caller-visible failure of an analysis
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No usable evidence from {attempted} configured sources and no prior score")]
    Exhausted {
        attempted: usize,
        analysis: Box<Analysis>,
    },

    #[error("Invalid engine configuration: {0}")]
    Configuration(#[from] ConfigError),
}

/// Everything produced by one analysis
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub analysis: Analysis,

    /// sha256 fingerprint of the analysed email
    pub fingerprint: String,

    /// The frozen evidence the verdict was computed from
    pub evidence: EvidenceSet,

    pub verdict: Verdict,
}

/// Main analysis orchestrator
pub struct Orchestrator {
    sources: BTreeMap<SourceId, Arc<dyn SignalSource>>,
}

impl Orchestrator {
    /// Create an orchestrator over the given sources
    ///
    /// When two sources share an id the first one is kept.
    pub fn new(sources: Vec<Arc<dyn SignalSource>>) -> Self {
        let mut registry: BTreeMap<SourceId, Arc<dyn SignalSource>> = BTreeMap::new();
        for source in sources {
            let id = source.id();
            if registry.contains_key(&id) {
                warn!(source = %id, "Duplicate signal source ignored");
                continue;
            }
            registry.insert(id, source);
        }
        Self { sources: registry }
    }

    /// Registered source ids
    pub fn sources(&self) -> Vec<SourceId> {
        self.sources.keys().copied().collect()
    }

    /// Analyze an email and return its verdict
    pub async fn analyze(&self, email: Email, config: &EngineConfig) -> Result<Verdict, EngineError> {
        self.analyze_detailed(email, config)
            .await
            .map(|report| report.verdict)
    }

    /// Analyze an email, keeping the evidence and the audit trail
    #[instrument(skip_all, fields(fingerprint = tracing::field::Empty))]
    pub async fn analyze_detailed(
        &self,
        email: Email,
        config: &EngineConfig,
    ) -> Result<AnalysisReport, EngineError> {
        config.validate()?;

        let fingerprint = email.fingerprint();
        tracing::Span::current().record("fingerprint", fingerprint.as_str());

        let analysis_id = Uuid::new_v4();
        let policy = &config.collection;
        let order = config.source_order();
        let started = Instant::now();
        let deadline = started + policy.global_deadline();

        let email = Arc::new(email);
        let aggregator = Arc::new(Aggregator::new(order.iter().copied()));
        let mut analysis = Analysis::new(analysis_id);

        record(
            &mut analysis,
            AnalysisEvent::new(
                analysis_id,
                None,
                AnalysisEventType::RoundDispatched,
                format!("Dispatched {} sources for email {}", order.len(), fingerprint),
            )
            .with_fingerprint(fingerprint.clone()),
        );
        info!(%analysis_id, sources = order.len(), "Round dispatched");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(order.len());

        for id in &order {
            let Some(source) = self.sources.get(id) else {
                warn!(source = %id, "Configured source is not registered");
                aggregator.insert(Evidence::failed(*id, "source not registered").with_attempts(0));
                continue;
            };

            let task = SourceTask {
                analysis_id,
                source: Arc::clone(source),
                email: Arc::clone(&email),
                retry: policy.retry_policy.clone(),
                per_source_timeout: policy.per_source_timeout(),
                deadline,
                aggregator: Arc::clone(&aggregator),
                progress: tx.clone(),
            };
            let span = tracing::info_span!("source", source = %id);
            handles.push(tokio::spawn(task.run().instrument(span)));
        }
        drop(tx);

        // Collect until every task has finished or the deadline passes
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => record(&mut analysis, event),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = aggregator.outstanding().len(),
                        "Global deadline reached"
                    );
                    break;
                }
            }
        }

        let (evidence, skipped) = aggregator.close();
        for handle in &handles {
            handle.abort();
        }
        while let Ok(event) = rx.try_recv() {
            record(&mut analysis, event);
        }
        drop(rx);

        for event in outcome_events(analysis_id, &evidence) {
            record(&mut analysis, event);
        }
        for source in &skipped {
            warn!(source = %source, "Source skipped at round close");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        record(
            &mut analysis,
            AnalysisEvent::new(
                analysis_id,
                None,
                AnalysisEventType::RoundClosed,
                format!(
                    "Round closed with {}/{} sources completed",
                    evidence.completed_count(),
                    evidence.expected().len()
                ),
            )
            .with_duration(elapsed_ms),
        );
        info!(
            completed = evidence.completed_count(),
            expected = evidence.expected().len(),
            elapsed_ms,
            "Round closed"
        );
        analysis.evidence = Some(evidence.clone());

        let verdict = if evidence.completed_count() > 0 {
            scorer::score(&evidence, &config.rules)
        } else if let Some(prior) = config.prior_score {
            info!(prior, "No usable evidence, falling back to prior score");
            scorer::score_from_prior(&evidence, &config.rules, prior)
        } else {
            record(
                &mut analysis,
                AnalysisEvent::new(
                    analysis_id,
                    None,
                    AnalysisEventType::Exhausted,
                    "No usable evidence and no prior score".to_string(),
                ),
            );
            error!(attempted = order.len(), "Analysis exhausted");
            return Err(EngineError::Exhausted {
                attempted: order.len(),
                analysis: Box::new(analysis),
            });
        };

        record(
            &mut analysis,
            AnalysisEvent::new(
                analysis_id,
                None,
                AnalysisEventType::Scored,
                format!(
                    "Scored {} ({}), complete={}",
                    verdict.fraud_score, verdict.risk_level, verdict.complete
                ),
            )
            .with_score(verdict.fraud_score)
            .with_duration(started.elapsed().as_millis() as u64),
        );
        analysis.verdict = Some(verdict.clone());
        info!(
            score = verdict.fraud_score,
            level = %verdict.risk_level,
            complete = verdict.complete,
            "Analysis scored"
        );

        Ok(AnalysisReport {
            analysis,
            fingerprint,
            evidence,
            verdict,
        })
    }
}

/// Apply an event to the in-memory analysis record
fn record(analysis: &mut Analysis, event: AnalysisEvent) {
    let event_type = event.event_type;
    if let Err(e) = analysis.apply(event) {
        warn!(?event_type, error = %e, "Dropped out-of-order analysis event");
    }
}

/// One terminal event per record, in configuration order
fn outcome_events(analysis_id: Uuid, evidence: &EvidenceSet) -> Vec<AnalysisEvent> {
    evidence
        .iter()
        .map(|record| {
            let source = record.source;
            let (event_type, summary) = match &record.status {
                EvidenceStatus::Completed => (
                    AnalysisEventType::SourceCompleted,
                    format!(
                        "{} completed in {}ms with {} findings",
                        source,
                        record.elapsed_ms,
                        record.findings.len()
                    ),
                ),
                EvidenceStatus::TimedOut => (
                    AnalysisEventType::SourceTimedOut,
                    format!("{} timed out after {}ms", source, record.elapsed_ms),
                ),
                EvidenceStatus::Failed { .. } => (
                    AnalysisEventType::SourceFailed,
                    format!("{} failed after {} attempts", source, record.attempts),
                ),
                EvidenceStatus::Skipped => (
                    AnalysisEventType::SourceSkipped,
                    format!("{} had not reported when the round closed", source),
                ),
            };

            let event = AnalysisEvent::new(analysis_id, Some(source), event_type, summary)
                .with_attempt(record.attempts)
                .with_duration(record.elapsed_ms);
            match &record.status {
                EvidenceStatus::Failed { reason } => event.with_error(reason.clone()),
                _ => event,
            }
        })
        .collect()
}

/// Everything one spawned source task needs
struct SourceTask {
    analysis_id: Uuid,
    source: Arc<dyn SignalSource>,
    email: Arc<Email>,
    retry: RetryPolicy,
    per_source_timeout: Duration,
    deadline: Instant,
    aggregator: Arc<Aggregator>,
    progress: mpsc::UnboundedSender<AnalysisEvent>,
}

impl SourceTask {
    async fn run(self) {
        let started = Instant::now();
        let (outcome, attempts) = self.collect().await;

        let Some(evidence) = outcome else {
            debug!("Left for the round to mark as skipped");
            return;
        };
        let evidence = evidence
            .with_attempts(attempts)
            .with_elapsed_ms(started.elapsed().as_millis() as u64);

        match self.aggregator.insert(evidence) {
            InsertOutcome::Inserted => {}
            InsertOutcome::Duplicate => warn!("Source reported twice; kept the first record"),
            InsertOutcome::Closed => debug!("Late result discarded"),
        }
    }

    /// Run attempts until one settles the source
    ///
    /// Returns None when the global deadline cut the source off, so the
    /// round records it as Skipped.
    async fn collect(&self) -> (Option<Evidence>, u32) {
        let id = self.source.id();
        let mut attempt = 0u32;

        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (None, attempt);
            }
            attempt += 1;

            let bounded_by_deadline = remaining <= self.per_source_timeout;
            let attempt_deadline = Instant::now() + self.per_source_timeout.min(remaining);
            let request = SignalRequest {
                email: Arc::clone(&self.email),
                source: id,
                deadline: attempt_deadline,
                attempt,
            };

            self.emit(
                AnalysisEvent::new(
                    self.analysis_id,
                    Some(id),
                    AnalysisEventType::AttemptStarted,
                    format!("{} attempt {}", id, attempt),
                )
                .with_attempt(attempt),
            );
            debug!(attempt, "Attempt started");

            let attempt_start = Instant::now();
            let result = tokio::time::timeout_at(attempt_deadline, self.source.invoke(&request)).await;
            let duration_ms = attempt_start.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(observation)) => {
                    debug!(attempt, duration_ms, "Source completed");
                    let evidence =
                        Evidence::completed(id, observation.findings, observation.confidence);
                    return (Some(evidence), attempt);
                }
                Ok(Err(SourceError::Transient(detail)))
                    if self.source.retryable() && self.retry.should_retry(attempt) =>
                {
                    let delay = self.retry.delay_for_retry(attempt);
                    if Instant::now() + delay >= self.deadline {
                        warn!(attempt, error = %detail, "No time left to retry before the global deadline");
                        let reason = format!("retry budget cut short by global deadline: {}", detail);
                        return (Some(Evidence::failed(id, reason)), attempt);
                    }

                    self.emit(
                        AnalysisEvent::new(
                            self.analysis_id,
                            Some(id),
                            AnalysisEventType::AttemptRetrying,
                            format!("{} attempt {} failed, retrying in {:?}", id, attempt, delay),
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(detail.clone()),
                    );
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %detail,
                        "Source failed transiently, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => {
                    error!(attempt, error = %e, "Source failed");
                    return (Some(Evidence::failed(id, e.to_string())), attempt);
                }
                Err(_) if bounded_by_deadline => {
                    warn!(attempt, "Source still running at the global deadline");
                    return (None, attempt);
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.per_source_timeout.as_millis() as u64,
                        "Source timed out"
                    );
                    return (Some(Evidence::timed_out(id)), attempt);
                }
            }
        }
    }

    fn emit(&self, event: AnalysisEvent) {
        // The receiver is gone once the round closes
        let _ = self.progress.send(event);
    }
}
