//! Content analysis source.
//!
//! Embeds the subject and body, looks up the nearest known exemplars in the
//! retrieval index, and counts pressure/credential-harvest phrases.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Observation, SignalRequest, SignalSource, SourceError};
use crate::domain::SourceId;
use crate::retrieval::{EmbedError, Embedder, ExemplarLabel, RetrievalError, RetrievalIndex};

/// Bodies are truncated to this many characters before embedding
pub const MAX_BODY_CHARS: usize = 1500;

const URGENCY_PHRASES: &[&str] = &[
    "urgent",
    "immediately",
    "act now",
    "within 24 hours",
    "account suspended",
    "verify your account",
    "confirm your identity",
    "update your payment",
    "password",
    "wire transfer",
    "gift card",
    "bank details",
    "inheritance",
    "lottery",
    "click here",
];

/// Count distinct urgency phrases in already-lowercased text
pub fn urgency_terms(lowercased: &str) -> usize {
    URGENCY_PHRASES
        .iter()
        .filter(|phrase| lowercased.contains(*phrase))
        .count()
}

/// Similarity of the email to known scam and legitimate exemplars
pub struct ContentAnalysisSource {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn RetrievalIndex>,
    top_k: usize,
    nominal_cost: Duration,
}

impl ContentAnalysisSource {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn RetrievalIndex>) -> Self {
        Self {
            embedder,
            index,
            top_k: 5,
            nominal_cost: Duration::from_millis(250),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_nominal_cost(mut self, cost: Duration) -> Self {
        self.nominal_cost = cost;
        self
    }
}

#[async_trait]
impl SignalSource for ContentAnalysisSource {
    fn id(&self) -> SourceId {
        SourceId::ContentAnalysis
    }

    fn nominal_cost(&self) -> Duration {
        self.nominal_cost
    }

    async fn invoke(&self, request: &SignalRequest) -> Result<Observation, SourceError> {
        let email = &request.email;
        let body: String = email.body.chars().take(MAX_BODY_CHARS).collect();
        let text = format!("{}\n{}", email.subject, body);

        let vector = self
            .embedder
            .embed(std::slice::from_ref(&text))
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SourceError::Transient(
                    EmbedError::CountMismatch {
                        expected: 1,
                        actual: 0,
                    }
                    .to_string(),
                )
            })?;

        let matches = self
            .index
            .query(&vector, self.top_k)
            .await
            .map_err(|e| match e {
                RetrievalError::Unavailable(_) => SourceError::Transient(e.to_string()),
                RetrievalError::DimensionMismatch { .. } => SourceError::Permanent(e.to_string()),
            })?;

        let best = |label: ExemplarLabel| {
            matches
                .iter()
                .filter(|m| m.exemplar_label == label)
                .map(|m| m.similarity)
                .fold(0.0_f64, f64::max)
        };
        let scam_similarity = best(ExemplarLabel::Scam);
        let legitimate_similarity = best(ExemplarLabel::Legitimate);
        let scam_matches = matches
            .iter()
            .filter(|m| m.exemplar_label == ExemplarLabel::Scam)
            .count();

        let top = matches.first().map(|m| m.similarity).unwrap_or(0.0);
        let urgency = urgency_terms(&text.to_lowercase());

        debug!(
            neighbours = matches.len(),
            scam_similarity, legitimate_similarity, urgency, "Content analysis collected"
        );

        Ok(Observation::new(0.5 + 0.5 * top)
            .with("scam_similarity", scam_similarity)
            .with("legitimate_similarity", legitimate_similarity)
            .with("scam_match_count", scam_matches)
            .with("urgency_terms", urgency))
    }
}
