//! Concurrency-safe evidence collection for one round.
//!
//! Source tasks insert their evidence as they finish. Once the orchestrator
//! closes the round, every outstanding source is recorded as Skipped and all
//! later inserts become no-ops.

use std::sync::{Mutex, MutexGuard};

use crate::domain::{Evidence, EvidenceSet, SourceId};

/// What happened to an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,

    /// The source already reported; the first record is kept
    Duplicate,

    /// The round is closed; the record was discarded
    Closed,
}

#[derive(Debug)]
struct RoundState {
    evidence: EvidenceSet,
    closed: bool,
}

/// Insert-once evidence collector shared by the source tasks of a round
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<RoundState>,
}

impl Aggregator {
    /// Start collecting for the given sources, in configuration order
    pub fn new(expected: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            state: Mutex::new(RoundState {
                evidence: EvidenceSet::new(expected),
                closed: false,
            }),
        }
    }

    // Every critical section leaves the set consistent; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, evidence: Evidence) -> InsertOutcome {
        let mut state = self.lock();
        if state.closed {
            return InsertOutcome::Closed;
        }
        if state.evidence.insert(evidence) {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        }
    }

    /// Close the round, marking outstanding sources Skipped
    ///
    /// Returns the frozen evidence and the sources that were skipped. Closing
    /// twice returns the same evidence and no newly skipped sources.
    pub fn close(&self) -> (EvidenceSet, Vec<SourceId>) {
        let mut state = self.lock();
        if state.closed {
            return (state.evidence.clone(), Vec::new());
        }

        let skipped = state.evidence.outstanding();
        for source in &skipped {
            state.evidence.insert(Evidence::skipped(*source));
        }
        state.closed = true;
        (state.evidence.clone(), skipped)
    }

    /// Copy of the evidence collected so far
    pub fn snapshot(&self) -> EvidenceSet {
        self.lock().evidence.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sources that have not reported yet
    pub fn outstanding(&self) -> Vec<SourceId> {
        self.lock().evidence.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EvidenceStatus, Findings};
    use std::sync::Arc;

    #[test]
    fn test_insert_once_per_source() {
        let aggregator = Aggregator::new([SourceId::UrlInspection]);
        let first = Evidence::completed(SourceId::UrlInspection, Findings::new(), 0.7);

        assert_eq!(aggregator.insert(first.clone()), InsertOutcome::Inserted);
        assert_eq!(
            aggregator.insert(Evidence::failed(SourceId::UrlInspection, "late")),
            InsertOutcome::Duplicate
        );
        assert_eq!(aggregator.snapshot().get(SourceId::UrlInspection), Some(&first));
    }

    #[test]
    fn test_close_marks_outstanding_skipped() {
        let aggregator = Aggregator::new([SourceId::SenderReputation, SourceId::Judgment]);
        aggregator.insert(Evidence::completed(
            SourceId::SenderReputation,
            Findings::new(),
            1.0,
        ));

        let (evidence, skipped) = aggregator.close();
        assert_eq!(skipped, vec![SourceId::Judgment]);
        assert_eq!(
            evidence.get(SourceId::Judgment).map(|e| e.status.clone()),
            Some(EvidenceStatus::Skipped)
        );
        assert!(aggregator.is_closed());
        assert!(aggregator.outstanding().is_empty());

        let (again, skipped_again) = aggregator.close();
        assert_eq!(again, evidence);
        assert!(skipped_again.is_empty());
    }

    #[test]
    fn test_late_writes_are_noops() {
        let aggregator = Aggregator::new([SourceId::ContentAnalysis]);
        let (frozen, _) = aggregator.close();

        let late = Evidence::completed(SourceId::ContentAnalysis, Findings::new(), 1.0);
        assert_eq!(aggregator.insert(late), InsertOutcome::Closed);
        assert_eq!(aggregator.snapshot(), frozen);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let aggregator = Aggregator::new([SourceId::UrlInspection, SourceId::Judgment]);
        let before = aggregator.snapshot();
        aggregator.insert(Evidence::timed_out(SourceId::UrlInspection));
        assert!(before.is_empty());
        assert_eq!(aggregator.snapshot().len(), 1);
    }

    #[test]
    fn test_concurrent_inserts_keep_exactly_one_record() {
        let aggregator = Arc::new(Aggregator::new([SourceId::Judgment]));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    aggregator.insert(Evidence::completed(
                        SourceId::Judgment,
                        Findings::new(),
                        f64::from(i) / 16.0,
                    ))
                })
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == InsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(aggregator.snapshot().len(), 1);
    }
}
