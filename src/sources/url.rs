//! URL inspection source.
//!
//! Asks a `UrlReputation` capability (e.g. a Safe Browsing client) which of
//! the email's URLs are known bad, and applies local structural heuristics
//! to every URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use tracing::debug;
use url::{Host, Url};

use super::{Observation, SignalRequest, SignalSource, SourceError};
use crate::domain::SourceId;

/// A URL reported as dangerous by a reputation service
#[derive(Debug, Clone, PartialEq)]
pub struct UrlThreat {
    pub url: String,
    pub category: String,
    pub confidence: f64,
}

/// URL reputation capability
#[async_trait]
pub trait UrlReputation: Send + Sync {
    /// Return the subset of `urls` known to be dangerous
    async fn check(&self, urls: &[String]) -> Result<Vec<UrlThreat>, SourceError>;
}

/// Offline reputation: glob patterns over URL hosts (e.g. `*.paypa1.com`)
#[derive(Debug, Clone)]
pub struct PatternBlocklist {
    patterns: Vec<Pattern>,
    confidence: f64,
}

impl PatternBlocklist {
    pub fn new(patterns: &[String]) -> Result<Self, glob::PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(&p.to_lowercase()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            confidence: 0.9,
        })
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Check a single host against the blocklist
    pub fn is_blocked(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.patterns.iter().any(|pattern| pattern.matches(&host))
    }
}

#[async_trait]
impl UrlReputation for PatternBlocklist {
    async fn check(&self, urls: &[String]) -> Result<Vec<UrlThreat>, SourceError> {
        let threats = urls
            .iter()
            .filter_map(|raw| {
                let parsed = Url::parse(raw).ok()?;
                let host = parsed.host_str()?;
                self.is_blocked(host).then(|| UrlThreat {
                    url: raw.clone(),
                    category: "blocklisted_host".to_string(),
                    confidence: self.confidence,
                })
            })
            .collect();
        Ok(threats)
    }
}

/// Structural red flags of one URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UrlShape {
    suspicious: bool,
    insecure: bool,
}

fn inspect_shape(raw: &str) -> UrlShape {
    let Ok(url) = Url::parse(raw) else {
        return UrlShape {
            suspicious: true,
            insecure: false,
        };
    };

    let ip_literal = matches!(url.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)));
    let punycode = url
        .host_str()
        .map(|host| host.split('.').any(|label| label.starts_with("xn--")))
        .unwrap_or(false);
    let userinfo = !url.username().is_empty() || url.password().is_some();

    UrlShape {
        suspicious: ip_literal || punycode || userinfo || url.host().is_none(),
        insecure: url.scheme() == "http",
    }
}

/// URL safety checks
pub struct UrlInspectionSource {
    reputation: Arc<dyn UrlReputation>,
    nominal_cost: Duration,
}

impl UrlInspectionSource {
    pub fn new(reputation: Arc<dyn UrlReputation>) -> Self {
        Self {
            reputation,
            nominal_cost: Duration::from_millis(300),
        }
    }

    pub fn with_nominal_cost(mut self, cost: Duration) -> Self {
        self.nominal_cost = cost;
        self
    }
}

#[async_trait]
impl SignalSource for UrlInspectionSource {
    fn id(&self) -> SourceId {
        SourceId::UrlInspection
    }

    fn nominal_cost(&self) -> Duration {
        self.nominal_cost
    }

    async fn invoke(&self, request: &SignalRequest) -> Result<Observation, SourceError> {
        let urls = &request.email.urls;

        let threats = if urls.is_empty() {
            Vec::new()
        } else {
            self.reputation.check(urls).await?
        };

        let shapes: Vec<UrlShape> = urls.iter().map(|u| inspect_shape(u)).collect();
        let suspicious = shapes.iter().filter(|s| s.suspicious).count();
        let insecure = shapes.iter().filter(|s| s.insecure).count();

        let confidence = if urls.is_empty() {
            1.0
        } else if threats.is_empty() {
            0.7
        } else {
            threats
                .iter()
                .map(|t| t.confidence)
                .fold(0.0_f64, f64::max)
        };

        debug!(
            urls = urls.len(),
            flagged = threats.len(),
            suspicious,
            "URL inspection collected"
        );

        Ok(Observation::new(confidence)
            .with("url_count", urls.len())
            .with("url_flagged", !threats.is_empty())
            .with("flagged_url_count", threats.len())
            .with("suspicious_url_count", suspicious)
            .with("insecure_url_count", insecure))
    }
}
