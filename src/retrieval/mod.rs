//! Retrieval of known fraud/legitimate exemplars.
//!
//! The engine consumes nearest-neighbour search as a capability: any vector
//! store can sit behind `RetrievalIndex`. Lookups are read-only and safe to
//! run concurrently from several signal sources.

pub mod embedder;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use embedder::HashingEmbedder;
pub use memory::{CorpusRecord, Exemplar, InMemoryIndex};

/// Ground-truth label of an exemplar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarLabel {
    Scam,
    Legitimate,
    Ambiguous,
}

/// One neighbour returned by a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub exemplar_id: String,

    /// Similarity in [0, 1]
    pub similarity: f64,

    pub exemplar_label: ExemplarLabel,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    #[error("Vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),
}

/// Nearest-neighbour lookup over fixed-dimension vectors
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Dimension of every stored vector
    fn dimension(&self) -> usize;

    /// Up to `k` matches, ordered by descending similarity
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalMatch>, RetrievalError>;
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding backend returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

/// Text-to-vector capability
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}
