//! Audit events for an analysis round.
//!
//! The orchestrator records every lifecycle step of a round as an immutable
//! event. The record of an analysis can be rebuilt by replaying its events in
//! order (see `Analysis::from_events`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evidence::SourceId;

/// A single event in an analysis audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The analysis this event belongs to
    pub analysis_id: Uuid,

    /// Source concerned (if any)
    pub source: Option<SourceId>,

    /// Type of event
    pub event_type: AnalysisEventType,

    /// Human-readable summary (never includes message content)
    pub summary: String,

    /// Attempt number for per-source events
    pub attempt: Option<u32>,

    /// Time taken in milliseconds
    pub duration_ms: Option<u64>,

    /// Final score, on `Scored`
    pub score: Option<u8>,

    /// Error message if failed
    pub error: Option<String>,

    /// Email fingerprint, on `RoundDispatched`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl AnalysisEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        analysis_id: Uuid,
        source: Option<SourceId>,
        event_type: AnalysisEventType,
        summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            analysis_id,
            source,
            event_type,
            summary,
            attempt: None,
            duration_ms: None,
            score: None,
            error: None,
            fingerprint: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Types of events recorded during an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisEventType {
    /// Signal requests were dispatched for every configured source
    RoundDispatched,

    /// A source attempt started
    AttemptStarted,

    /// A source failed transiently and will be retried
    AttemptRetrying,

    /// A source reported findings
    SourceCompleted,

    /// A source failed permanently or ran out of retries
    SourceFailed,

    /// A source exceeded its timeout
    SourceTimedOut,

    /// The round closed before the source reported
    SourceSkipped,

    /// The collection round closed
    RoundClosed,

    /// A verdict was produced
    Scored,

    /// No usable evidence and no prior score; no verdict
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AnalysisEvent::new(
            Uuid::new_v4(),
            Some(SourceId::UrlInspection),
            AnalysisEventType::AttemptRetrying,
            "url_inspection attempt 1 failed".to_string(),
        )
        .with_attempt(1)
        .with_error("rate limited".to_string());

        let json = serde_json::to_string(&event).unwrap();
        let parsed: AnalysisEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, AnalysisEventType::AttemptRetrying);
        assert_eq!(parsed.source, Some(SourceId::UrlInspection));
        assert_eq!(parsed.attempt, Some(1));
        assert_eq!(parsed.error, Some("rate limited".to_string()));
    }

    #[test]
    fn test_event_with_score() {
        let event = AnalysisEvent::new(
            Uuid::new_v4(),
            None,
            AnalysisEventType::Scored,
            "scored".to_string(),
        )
        .with_score(87)
        .with_duration(1500);

        assert_eq!(event.score, Some(87));
        assert_eq!(event.duration_ms, Some(1500));
    }
}
