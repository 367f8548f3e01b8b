//! Analysis record and its state machine.
//!
//! An analysis moves strictly forward:
//! `Dispatched -> Collecting -> Closed -> Scored` (or `Closed -> Exhausted`
//! when nothing usable was collected). `Closed` is entered exactly once.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::events::{AnalysisEvent, AnalysisEventType};
use super::evidence::{EvidenceSet, SourceId};
use super::verdict::Verdict;

/// Lifecycle state of one analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    /// Signal requests are out
    Dispatched,

    /// Results are arriving
    Collecting,

    /// The evidence set is frozen
    Closed,

    /// A verdict was produced (terminal)
    Scored,

    /// No verdict could be produced (terminal)
    Exhausted,
}

impl AnalysisState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: AnalysisState) -> bool {
        matches!(
            (self, next),
            (Self::Dispatched, Self::Collecting)
                | (Self::Collecting, Self::Closed)
                | (Self::Closed, Self::Scored)
                | (Self::Closed, Self::Exhausted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Scored | Self::Exhausted)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal analysis transition: {from:?} -> {to:?}")]
    Illegal {
        from: AnalysisState,
        to: AnalysisState,
    },

    #[error("Cannot replay an analysis from zero events")]
    NoEvents,

    #[error("Event log starts with {0:?}, expected round_dispatched")]
    MissingDispatch(AnalysisEventType),
}

/// Progress of a single source as seen through the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProgress {
    Running { attempt: u32 },
    Completed,
    Failed,
    TimedOut,
    Skipped,
}

/// The record of one analysis, derived from its events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Unique identifier for this analysis
    pub id: Uuid,

    /// Current lifecycle state
    pub state: AnalysisState,

    /// When dispatch happened
    pub started_at: DateTime<Utc>,

    /// When the round closed
    pub closed_at: Option<DateTime<Utc>>,

    /// When the analysis reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Per-source progress
    pub sources: BTreeMap<SourceId, SourceProgress>,

    /// sha256 fingerprint of the analysed email
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Final score, once scored
    pub fraud_score: Option<u8>,

    /// Frozen evidence, once the round closed
    #[serde(default)]
    pub evidence: Option<EvidenceSet>,

    /// Verdict, once scored
    #[serde(default)]
    pub verdict: Option<Verdict>,

    /// Every event applied so far, in order
    pub events: Vec<AnalysisEvent>,
}

impl Analysis {
    /// Start a new analysis in state `Dispatched`
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            state: AnalysisState::Dispatched,
            started_at: Utc::now(),
            closed_at: None,
            finished_at: None,
            sources: BTreeMap::new(),
            fingerprint: None,
            fraud_score: None,
            evidence: None,
            verdict: None,
            events: Vec::new(),
        }
    }

    /// Rebuild an analysis by replaying its events
    pub fn from_events(events: &[AnalysisEvent]) -> Result<Self, TransitionError> {
        let first = events.first().ok_or(TransitionError::NoEvents)?;
        if first.event_type != AnalysisEventType::RoundDispatched {
            return Err(TransitionError::MissingDispatch(first.event_type));
        }

        let mut analysis = Self::new(first.analysis_id);
        analysis.started_at = first.timestamp;
        for event in events {
            analysis.apply(event.clone())?;
        }
        Ok(analysis)
    }

    /// Apply one event, enforcing forward-only transitions
    pub fn apply(&mut self, event: AnalysisEvent) -> Result<(), TransitionError> {
        match event.event_type {
            AnalysisEventType::RoundDispatched => {
                if self.state != AnalysisState::Dispatched || !self.events.is_empty() {
                    return Err(TransitionError::Illegal {
                        from: self.state,
                        to: AnalysisState::Dispatched,
                    });
                }
                self.fingerprint = event.fingerprint.clone();
            }
            AnalysisEventType::AttemptStarted | AnalysisEventType::AttemptRetrying => {
                self.enter_collecting()?;
                if let (Some(source), Some(attempt)) = (event.source, event.attempt) {
                    self.sources
                        .insert(source, SourceProgress::Running { attempt });
                }
            }
            AnalysisEventType::SourceCompleted => {
                self.record_source(&event, SourceProgress::Completed)?;
            }
            AnalysisEventType::SourceFailed => {
                self.record_source(&event, SourceProgress::Failed)?;
            }
            AnalysisEventType::SourceTimedOut => {
                self.record_source(&event, SourceProgress::TimedOut)?;
            }
            AnalysisEventType::SourceSkipped => {
                self.record_source(&event, SourceProgress::Skipped)?;
            }
            AnalysisEventType::RoundClosed => {
                if self.state == AnalysisState::Dispatched {
                    self.advance(AnalysisState::Collecting)?;
                }
                self.advance(AnalysisState::Closed)?;
                self.closed_at = Some(event.timestamp);
            }
            AnalysisEventType::Scored => {
                self.advance(AnalysisState::Scored)?;
                self.fraud_score = event.score;
                self.finished_at = Some(event.timestamp);
            }
            AnalysisEventType::Exhausted => {
                self.advance(AnalysisState::Exhausted)?;
                self.finished_at = Some(event.timestamp);
            }
        }

        self.events.push(event);
        Ok(())
    }

    /// Move to `next`, rejecting backward or skipping transitions
    pub fn advance(&mut self, next: AnalysisState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn enter_collecting(&mut self) -> Result<(), TransitionError> {
        match self.state {
            AnalysisState::Dispatched => self.advance(AnalysisState::Collecting),
            AnalysisState::Collecting => Ok(()),
            other => Err(TransitionError::Illegal {
                from: other,
                to: AnalysisState::Collecting,
            }),
        }
    }

    fn record_source(
        &mut self,
        event: &AnalysisEvent,
        progress: SourceProgress,
    ) -> Result<(), TransitionError> {
        self.enter_collecting()?;
        if let Some(source) = event.source {
            self.sources.insert(source, progress);
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Sources that ended in anything but Completed
    pub fn degraded_sources(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .filter(|(_, progress)| {
                matches!(
                    progress,
                    SourceProgress::Failed | SourceProgress::TimedOut | SourceProgress::Skipped
                )
            })
            .map(|(source, _)| *source)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: Uuid, source: Option<SourceId>, event_type: AnalysisEventType) -> AnalysisEvent {
        AnalysisEvent::new(id, source, event_type, format!("{:?}", event_type))
    }

    #[test]
    fn test_forward_transitions_only() {
        let mut state = AnalysisState::Dispatched;
        assert!(state.can_advance_to(AnalysisState::Collecting));
        assert!(!state.can_advance_to(AnalysisState::Scored));

        state = AnalysisState::Closed;
        assert!(!state.can_advance_to(AnalysisState::Collecting));
        assert!(!state.can_advance_to(AnalysisState::Closed));
        assert!(state.can_advance_to(AnalysisState::Scored));

        assert!(!AnalysisState::Scored.can_advance_to(AnalysisState::Closed));
    }

    #[test]
    fn test_replay_full_round() {
        let id = Uuid::new_v4();
        let url = Some(SourceId::UrlInspection);
        let sender = Some(SourceId::SenderReputation);

        let events = vec![
            event(id, None, AnalysisEventType::RoundDispatched)
                .with_fingerprint("9f2c01ab".to_string()),
            event(id, url, AnalysisEventType::AttemptStarted).with_attempt(1),
            event(id, sender, AnalysisEventType::AttemptStarted).with_attempt(1),
            event(id, url, AnalysisEventType::SourceCompleted),
            event(id, sender, AnalysisEventType::SourceSkipped),
            event(id, None, AnalysisEventType::RoundClosed),
            event(id, None, AnalysisEventType::Scored).with_score(64),
        ];

        let analysis = Analysis::from_events(&events).unwrap();
        assert_eq!(analysis.id, id);
        assert_eq!(analysis.state, AnalysisState::Scored);
        assert_eq!(analysis.fraud_score, Some(64));
        assert_eq!(analysis.fingerprint.as_deref(), Some("9f2c01ab"));
        assert!(analysis.evidence.is_none());
        assert_eq!(analysis.sources[&SourceId::UrlInspection], SourceProgress::Completed);
        assert_eq!(analysis.degraded_sources(), vec![SourceId::SenderReputation]);
        assert!(analysis.closed_at.is_some());
        assert!(analysis.is_finished());
    }

    #[test]
    fn test_closed_is_entered_once() {
        let id = Uuid::new_v4();
        let events = vec![
            event(id, None, AnalysisEventType::RoundDispatched),
            event(id, None, AnalysisEventType::RoundClosed),
            event(id, None, AnalysisEventType::RoundClosed),
        ];

        let err = Analysis::from_events(&events).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: AnalysisState::Closed,
                to: AnalysisState::Closed
            }
        );
    }

    #[test]
    fn test_no_source_events_after_close() {
        let id = Uuid::new_v4();
        let mut analysis = Analysis::new(id);
        analysis
            .apply(event(id, None, AnalysisEventType::RoundDispatched))
            .unwrap();
        analysis
            .apply(event(id, None, AnalysisEventType::RoundClosed))
            .unwrap();

        let late = event(id, Some(SourceId::Judgment), AnalysisEventType::SourceCompleted);
        assert!(analysis.apply(late).is_err());
        assert_eq!(analysis.events.len(), 2);
    }

    #[test]
    fn test_replay_requires_dispatch_first() {
        assert_eq!(Analysis::from_events(&[]).unwrap_err(), TransitionError::NoEvents);

        let id = Uuid::new_v4();
        let events = vec![event(id, None, AnalysisEventType::Scored)];
        assert!(matches!(
            Analysis::from_events(&events),
            Err(TransitionError::MissingDispatch(AnalysisEventType::Scored))
        ));
    }
}
