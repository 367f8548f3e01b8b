//! The email under analysis.
//!
//! An `Email` is created once per analysis request and shared read-only
//! (behind an `Arc`) with every signal source dispatched for it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An incoming email, already parsed by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Envelope/From address (e.g. "billing@paypa1.com")
    pub sender: String,

    /// Display name shown next to the sender address
    #[serde(default)]
    pub display_name: String,

    /// Subject line
    #[serde(default)]
    pub subject: String,

    /// Plain-text body
    #[serde(default)]
    pub body: String,

    /// URLs extracted from the body, in order of appearance
    #[serde(default)]
    pub urls: Vec<String>,

    /// Raw header mapping (names compared case-insensitively)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Email {
    /// Create an email with only a sender; use the `with_*` builders for the rest
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            display_name: String::new(),
            subject: String::new(),
            body: String::new(),
            urls: Vec::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Lowercased domain part of the sender address
    pub fn sender_domain(&self) -> Option<String> {
        domain_of(&self.sender)
    }

    /// Look up a header by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Stable content fingerprint (first 16 hex chars of SHA256)
    ///
    /// Headers are excluded: relays rewrite them, the message stays the same.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.trim().to_lowercase().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.subject.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.body.as_bytes());
        for url in &self.urls {
            hasher.update([0u8]);
            hasher.update(url.as_bytes());
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

/// Extract the lowercased domain of an address such as `"Name" <a@b.com>`
pub fn domain_of(address: &str) -> Option<String> {
    let address = address.trim().trim_end_matches('>');
    let (_, domain) = address.rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_domain() {
        let email = Email::new("Billing@PayPa1.com");
        assert_eq!(email.sender_domain(), Some("paypa1.com".to_string()));

        assert_eq!(domain_of("Support <help@bank.example>"), Some("bank.example".to_string()));
        assert_eq!(domain_of("no-at-sign"), None);
        assert_eq!(domain_of("trailing@"), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let email = Email::new("a@b.com").with_header("Reply-To", "x@y.com");
        assert_eq!(email.header("reply-to"), Some("x@y.com"));
        assert_eq!(email.header("REPLY-TO"), Some("x@y.com"));
        assert_eq!(email.header("From"), None);
    }

    #[test]
    fn test_fingerprint_ignores_headers() {
        let a = Email::new("a@b.com").with_subject("hi").with_body("body");
        let b = a.clone().with_header("Received", "relay-1");
        let c = a.clone().with_body("other body");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let email: Email = serde_json::from_str(r#"{"sender": "a@b.com"}"#).unwrap();
        assert!(email.urls.is_empty());
        assert!(email.headers.is_empty());
        assert_eq!(email.subject, "");
    }
}
