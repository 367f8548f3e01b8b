//! Engine configuration and validation.
//!
//! The engine is configured in YAML. Every field has a default, so an empty
//! document is a valid configuration. Durations are given in milliseconds.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rules::RuleConfig;
use crate::domain::SourceId;

/// Everything `Orchestrator::analyze` needs besides the email
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How sources are dispatched and retried
    #[serde(default)]
    pub collection: CollectionPolicy,

    /// How evidence is turned into a score
    #[serde(default)]
    pub rules: RuleConfig,

    /// Score used when no source produced usable evidence
    #[serde(default)]
    pub prior_score: Option<u8>,
}

impl EngineConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse and validate YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).context("Failed to parse engine config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collection.validate()?;
        self.rules.validate()?;

        for source in &self.collection.required_sources {
            if self.rules.source_weight(*source) == 0.0 {
                return Err(ConfigError::ZeroRequiredWeight(*source));
            }
            if self.rules.rules_for(*source).is_empty() {
                return Err(ConfigError::NoRequiredRules(*source));
            }
        }

        if let Some(prior) = self.prior_score {
            if prior > 100 {
                return Err(ConfigError::OutOfRange {
                    field: "prior_score",
                    value: f64::from(prior),
                });
            }
        }

        Ok(())
    }

    /// Dispatch order: required sources, then optional ones
    pub fn source_order(&self) -> Vec<SourceId> {
        self.collection.source_order()
    }
}

/// Timeouts, retries and the set of sources to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPolicy {
    /// Bound on each attempt of each source (default: 2s)
    #[serde(default = "default_per_source_timeout")]
    pub per_source_timeout_ms: u64,

    /// Hard ceiling on the whole collection round (default: 5s)
    #[serde(default = "default_global_deadline")]
    pub global_deadline_ms: u64,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Sources whose absence makes a verdict incomplete
    #[serde(default = "default_required_sources")]
    pub required_sources: Vec<SourceId>,

    #[serde(default = "default_optional_sources")]
    pub optional_sources: Vec<SourceId>,
}

fn default_per_source_timeout() -> u64 {
    2000
}
fn default_global_deadline() -> u64 {
    5000
}
fn default_required_sources() -> Vec<SourceId> {
    vec![
        SourceId::SenderReputation,
        SourceId::UrlInspection,
        SourceId::ContentAnalysis,
    ]
}
fn default_optional_sources() -> Vec<SourceId> {
    vec![SourceId::Judgment]
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        Self {
            per_source_timeout_ms: default_per_source_timeout(),
            global_deadline_ms: default_global_deadline(),
            retry_policy: RetryPolicy::default(),
            required_sources: default_required_sources(),
            optional_sources: default_optional_sources(),
        }
    }
}

impl CollectionPolicy {
    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }

    pub fn global_deadline(&self) -> Duration {
        Duration::from_millis(self.global_deadline_ms)
    }

    pub fn source_order(&self) -> Vec<SourceId> {
        self.required_sources
            .iter()
            .chain(self.optional_sources.iter())
            .copied()
            .collect()
    }

    pub fn is_required(&self, source: SourceId) -> bool {
        self.required_sources.contains(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_source_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("per_source_timeout_ms"));
        }
        if self.global_deadline_ms == 0 {
            return Err(ConfigError::ZeroDuration("global_deadline_ms"));
        }

        let mut seen = Vec::new();
        for source in self.source_order() {
            if seen.contains(&source) {
                return Err(ConfigError::DuplicateSource(source));
            }
            seen.push(source);
        }

        self.retry_policy.validate()
    }
}

/// Retry policy for transient source failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_backoff() -> u64 {
    100
}
fn default_max_backoff() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the given retry (1-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::from_millis(self.base_backoff_ms.min(self.max_backoff_ms));
        }

        let delay =
            self.base_backoff_ms as f64 * self.backoff_multiplier.powi((retry - 1) as i32);

        let capped = delay.min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Whether another attempt may follow the given (1-indexed) attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }
}

/// Invalid engine configuration; raised before any analysis starts
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Source {0} is configured more than once")]
    DuplicateSource(SourceId),

    #[error("Required source {0} has weight zero")]
    ZeroRequiredWeight(SourceId),

    #[error("Required source {0} has no finding rules")]
    NoRequiredRules(SourceId),

    #[error("Invalid weight {weight} for {context}")]
    InvalidWeight { context: String, weight: f64 },

    #[error("Invalid severity curve for {context}: {reason}")]
    InvalidCurve { context: String, reason: String },

    #[error("Backoff multiplier must be a finite number >= 1, got {0}")]
    InvalidMultiplier(f64),

    #[error("Score thresholds {0:?} must start at 0, be strictly increasing and stay within 100")]
    InvalidThresholds([u8; 4]),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}
