//! Judgment source.
//!
//! Wraps a reasoning backend (a language-model call or a rule engine) that
//! returns an intent label with a confidence. The engine does not care which
//! kind of backend produced the judgment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::content::urgency_terms;
use super::{Observation, SignalRequest, SignalSource, SourceError};
use crate::domain::{Email, SourceId};

/// Intent classification of an email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Phishing,
    Scam,
    Spam,
    Legitimate,
    Uncertain,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phishing => "phishing",
            Self::Scam => "scam",
            Self::Spam => "spam",
            Self::Legitimate => "legitimate",
            Self::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured judgment returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub intent: Intent,
    pub confidence: f64,
}

/// Reasoning backend capability
#[async_trait]
pub trait JudgmentBackend: Send + Sync {
    async fn judge(&self, email: &Email) -> Result<Judgment, SourceError>;
}

const CREDENTIAL_TERMS: &[&str] = &["password", "login", "verify your account", "confirm your identity", "ssn"];
const MONEY_TERMS: &[&str] = &["wire transfer", "gift card", "inheritance", "lottery", "bitcoin", "western union"];
const PROMO_TERMS: &[&str] = &["unsubscribe", "special offer", "discount", "limited time"];

fn hits(text: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|term| text.contains(*term)).count()
}

/// Rule-based backend for offline use
#[derive(Debug, Clone, Default)]
pub struct KeywordJudge;

#[async_trait]
impl JudgmentBackend for KeywordJudge {
    async fn judge(&self, email: &Email) -> Result<Judgment, SourceError> {
        let text = format!("{}\n{}", email.subject, email.body).to_lowercase();
        let urgency = urgency_terms(&text);
        let credential = hits(&text, CREDENTIAL_TERMS);
        let money = hits(&text, MONEY_TERMS);
        let promo = hits(&text, PROMO_TERMS);

        let boost = 0.05 * urgency.min(4) as f64;
        let judgment = if credential > 0 && !email.urls.is_empty() {
            Judgment {
                intent: Intent::Phishing,
                confidence: 0.6 + 0.1 * credential.min(2) as f64 + boost,
            }
        } else if money > 0 {
            Judgment {
                intent: Intent::Scam,
                confidence: 0.6 + 0.1 * money.min(2) as f64 + boost,
            }
        } else if promo > 0 {
            Judgment {
                intent: Intent::Spam,
                confidence: 0.6,
            }
        } else if urgency > 0 {
            Judgment {
                intent: Intent::Uncertain,
                confidence: 0.5,
            }
        } else {
            Judgment {
                intent: Intent::Legitimate,
                confidence: 0.6,
            }
        };

        Ok(judgment)
    }
}

/// Judgment signal source
pub struct JudgmentSource {
    backend: Arc<dyn JudgmentBackend>,
    nominal_cost: Duration,
}

impl JudgmentSource {
    pub fn new(backend: Arc<dyn JudgmentBackend>) -> Self {
        Self {
            backend,
            nominal_cost: Duration::from_secs(2),
        }
    }

    pub fn with_nominal_cost(mut self, cost: Duration) -> Self {
        self.nominal_cost = cost;
        self
    }
}

#[async_trait]
impl SignalSource for JudgmentSource {
    fn id(&self) -> SourceId {
        SourceId::Judgment
    }

    fn nominal_cost(&self) -> Duration {
        self.nominal_cost
    }

    async fn invoke(&self, request: &SignalRequest) -> Result<Observation, SourceError> {
        let judgment = self.backend.judge(&request.email).await?;
        Ok(Observation::new(judgment.confidence).with("intent", judgment.intent.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phishing_needs_credentials_and_links() {
        let email = Email::new("it@corp-helpdesk.example")
            .with_subject("Password expiry")
            .with_body("Your password expires today. Verify your account immediately.")
            .with_url("https://corp-helpdesk.example/login");

        let judgment = KeywordJudge.judge(&email).await.unwrap();
        assert_eq!(judgment.intent, Intent::Phishing);
        assert!(judgment.confidence > 0.8);

        let no_link = Email::new("it@corp.example").with_body("Reminder: never share your password.");
        assert_ne!(KeywordJudge.judge(&no_link).await.unwrap().intent, Intent::Phishing);
    }

    #[tokio::test]
    async fn test_money_scam_and_legitimate() {
        let scam = Email::new("x@y.example").with_body("Pay the release fee by gift card to claim your lottery win");
        assert_eq!(KeywordJudge.judge(&scam).await.unwrap().intent, Intent::Scam);

        let normal = Email::new("x@y.example").with_body("See you at lunch");
        let judgment = KeywordJudge.judge(&normal).await.unwrap();
        assert_eq!(judgment.intent, Intent::Legitimate);
        assert_eq!(judgment.confidence, 0.6);
    }
}
