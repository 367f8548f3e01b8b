//! In-memory exemplar index with exact cosine search.
//!
//! The index is built once (from vectors or from a labelled JSONL corpus)
//! and then only read, so it can be shared behind an `Arc` without locks.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::embedder::normalize;
use super::{
    EmbedError, Embedder, ExemplarLabel, RetrievalError, RetrievalIndex, RetrievalMatch,
};
use crate::sources::MAX_BODY_CHARS;

/// Exemplars are embedded in batches of this size
const EMBED_BATCH_SIZE: usize = 32;

/// A stored exemplar (vector kept at unit length)
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    pub id: String,
    pub label: ExemplarLabel,
    pub vector: Vec<f32>,
}

/// One line of a labelled corpus file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub label: ExemplarLabel,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    dimension: usize,
    exemplars: Vec<Exemplar>,
}

impl InMemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            exemplars: Vec::new(),
        }
    }

    /// Add an exemplar; the vector is normalized on the way in
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        label: ExemplarLabel,
        mut vector: Vec<f32>,
    ) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        normalize(&mut vector);
        self.exemplars.push(Exemplar {
            id: id.into(),
            label,
            vector,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    /// Count exemplars per label
    pub fn label_counts(&self) -> (usize, usize, usize) {
        self.exemplars
            .iter()
            .fold((0, 0, 0), |(scam, legit, ambiguous), e| match e.label {
                ExemplarLabel::Scam => (scam + 1, legit, ambiguous),
                ExemplarLabel::Legitimate => (scam, legit + 1, ambiguous),
                ExemplarLabel::Ambiguous => (scam, legit, ambiguous + 1),
            })
    }

    /// Embed labelled records and add them to the index
    pub async fn extend_from_records(
        &mut self,
        embedder: &dyn Embedder,
        records: Vec<CorpusRecord>,
    ) -> Result<usize> {
        let mut added = 0;
        for batch in records.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|r| truncate_chars(&r.text)).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .context("Failed to embed exemplar batch")?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }

            for (record, vector) in batch.iter().zip(vectors) {
                let id = record
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("exemplar-{}", self.exemplars.len()));
                self.insert(id, record.label, vector)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Build an index from a JSONL corpus of `{"id", "label", "text"}` rows
    ///
    /// Rows that fail to parse are skipped with a warning.
    pub async fn from_corpus(embedder: &dyn Embedder, path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read exemplar corpus: {}", path.display()))?;

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CorpusRecord>(line) {
                Ok(mut record) => {
                    if record.id.is_none() {
                        record.id = Some(format!("line-{}", line_no + 1));
                    }
                    records.push(record);
                }
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping invalid corpus row"),
            }
        }

        let mut index = Self::new(embedder.dimension());
        let added = index.extend_from_records(embedder, records).await?;
        info!(path = %path.display(), exemplars = added, "Loaded exemplar corpus");
        Ok(index)
    }
}

fn truncate_chars(text: &str) -> String {
    text.chars().take(MAX_BODY_CHARS).collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalMatch>, RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut matches: Vec<RetrievalMatch> = self
            .exemplars
            .iter()
            .map(|exemplar| RetrievalMatch {
                exemplar_id: exemplar.id.clone(),
                similarity: cosine(vector, &exemplar.vector).clamp(0.0, 1.0),
                exemplar_label: exemplar.label,
            })
            .collect();

        // Ties broken by id so results never depend on insertion order
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.exemplar_id.cmp(&b.exemplar_id))
        });
        matches.truncate(k);
        Ok(matches)
    }
}
