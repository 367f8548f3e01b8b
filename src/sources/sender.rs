//! Sender reputation source.
//!
//! Combines local header checks (Authentication-Results, Reply-To, display
//! name) with a domain intelligence lookup (WHOIS age, DNS auth records)
//! behind the `DomainIntel` capability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Observation, SignalRequest, SignalSource, SourceError};
use crate::domain::{domain_of, SourceId};

/// What is known about a sending domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Days since registration
    #[serde(default)]
    pub age_days: Option<u32>,

    #[serde(default)]
    pub spf_pass: Option<bool>,

    #[serde(default)]
    pub dkim_pass: Option<bool>,

    #[serde(default)]
    pub dmarc_pass: Option<bool>,
}

/// Domain intelligence capability (WHOIS/DNS client)
#[async_trait]
pub trait DomainIntel: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<DomainRecord, SourceError>;
}

/// Offline domain table; unknown domains yield an empty record
#[derive(Debug, Clone, Default)]
pub struct StaticDomainIntel {
    records: HashMap<String, DomainRecord>,
}

impl StaticDomainIntel {
    pub fn new(records: HashMap<String, DomainRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|(domain, record)| (domain.to_lowercase(), record))
            .collect();
        Self { records }
    }

    pub fn with_domain(mut self, domain: &str, record: DomainRecord) -> Self {
        self.records.insert(domain.to_lowercase(), record);
        self
    }
}

#[async_trait]
impl DomainIntel for StaticDomainIntel {
    async fn lookup(&self, domain: &str) -> Result<DomainRecord, SourceError> {
        Ok(self.records.get(domain).cloned().unwrap_or_default())
    }
}

/// Verdicts parsed from an `Authentication-Results` header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthResults {
    pub spf: Option<bool>,
    pub dkim: Option<bool>,
    pub dmarc: Option<bool>,
}

impl AuthResults {
    /// Parse `method=result` pairs, e.g. `mx.example; spf=pass; dkim=fail`
    pub fn parse(header: &str) -> Self {
        let mut results = Self::default();
        for token in header.split(|c: char| c == ';' || c.is_whitespace()) {
            let Some((method, outcome)) = token.split_once('=') else {
                continue;
            };
            let passed = Some(outcome.trim().eq_ignore_ascii_case("pass"));
            match method.trim().to_ascii_lowercase().as_str() {
                "spf" => results.spf = passed,
                "dkim" => results.dkim = passed,
                "dmarc" => results.dmarc = passed,
                _ => {}
            }
        }
        results
    }
}

/// Sender identity checks
pub struct SenderReputationSource {
    intel: Arc<dyn DomainIntel>,
    nominal_cost: Duration,
}

impl SenderReputationSource {
    pub fn new(intel: Arc<dyn DomainIntel>) -> Self {
        Self {
            intel,
            nominal_cost: Duration::from_millis(400),
        }
    }

    pub fn with_nominal_cost(mut self, cost: Duration) -> Self {
        self.nominal_cost = cost;
        self
    }
}

#[async_trait]
impl SignalSource for SenderReputationSource {
    fn id(&self) -> SourceId {
        SourceId::SenderReputation
    }

    fn nominal_cost(&self) -> Duration {
        self.nominal_cost
    }

    async fn invoke(&self, request: &SignalRequest) -> Result<Observation, SourceError> {
        let email = &request.email;
        let domain = email.sender_domain().ok_or_else(|| {
            SourceError::Permanent(format!("sender '{}' has no domain", email.sender))
        })?;

        let record = self.intel.lookup(&domain).await?;
        let auth = email
            .header("Authentication-Results")
            .map(AuthResults::parse)
            .unwrap_or_default();

        // Header verdicts describe this message; intel describes the domain
        let spf = auth.spf.or(record.spf_pass);
        let dkim = auth.dkim.or(record.dkim_pass);
        let dmarc = auth.dmarc.or(record.dmarc_pass);

        let mut observation = Observation::default();
        let mut known = 0u32;

        if let Some(age) = record.age_days {
            observation = observation.with("domain_age_days", age);
            known += 1;
        }
        for (name, value) in [("spf_pass", spf), ("dkim_pass", dkim), ("dmarc_pass", dmarc)] {
            if let Some(value) = value {
                observation = observation.with(name, value);
                known += 1;
            }
        }

        if let Some(reply_domain) = email.header("Reply-To").and_then(domain_of) {
            observation = observation.with("reply_to_mismatch", reply_domain != domain);
        }

        let spoofed = domain_of(&email.display_name)
            .map(|shown| shown != domain)
            .unwrap_or(false);
        observation = observation.with("display_name_spoof", spoofed);

        observation.confidence = 0.5 + 0.125 * f64::from(known);
        debug!(%domain, known, "Sender reputation collected");

        Ok(observation)
    }
}
