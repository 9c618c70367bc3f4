//! Event sanitization applied before storage.
//!
//! - PII scrubbing of the label, metadata and context extras
//! - AES-256-GCM encryption of selected metadata fields
//! - Retention window used by maintenance cleanup

mod encryption;
mod pii;

pub use encryption::{FieldEncryptor, ENCRYPTED_PREFIX, KEY_SIZE};
pub use pii::{PiiKind, PiiMatch, PiiSanitizer};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::SecurityConfig;
use crate::event::TelemetryEvent;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("invalid PII pattern: {0}")]
    Pattern(String),
}

pub struct SecurityProvider {
    pii: Option<PiiSanitizer>,
    encryption: Option<FieldEncryptor>,
    retention: Duration,
}

impl SecurityProvider {
    pub fn new(config: &SecurityConfig) -> Result<Self, SecurityError> {
        let pii = if config.pii.enabled {
            Some(PiiSanitizer::new(&config.pii)?)
        } else {
            None
        };
        let encryption = if config.encryption.enabled {
            Some(FieldEncryptor::new(&config.encryption)?)
        } else {
            None
        };
        Ok(Self {
            pii,
            encryption,
            retention: Duration::days(i64::from(config.retention.max_age_days)),
        })
    }

    /// Sanitize an enriched event. Identity fields are never touched.
    pub fn sanitize(&self, mut event: TelemetryEvent) -> Result<TelemetryEvent, SecurityError> {
        if let Some(pii) = &self.pii {
            if let Some(label) = event.label.as_mut() {
                *label = pii.scrub(label);
            }
            pii.scrub_map(&mut event.metadata);
            pii.scrub_map(&mut event.context.extra);
        }
        if let Some(encryption) = &self.encryption {
            encryption.encrypt_fields(&mut event.metadata)?;
        }
        Ok(event)
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecurityError> {
        match &self.encryption {
            Some(encryption) => encryption.decrypt(encoded),
            None => Err(SecurityError::Encryption("encryption is not enabled".into())),
        }
    }

    /// Records older than the returned instant are past retention. A
    /// retention reaching before the earliest representable instant keeps
    /// everything.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn pii_enabled(&self) -> bool {
        self.pii.is_some()
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncryptionConfig, PiiConfig, PiiMode};
    use crate::event::{enrich, EventContext, NewEvent};
    use serde_json::json;

    #[test]
    fn test_sanitize_scrubs_and_encrypts() {
        let config = SecurityConfig {
            pii: PiiConfig {
                enabled: true,
                mode: PiiMode::Redact,
                fields: vec!["password".into()],
            },
            encryption: EncryptionConfig {
                enabled: true,
                key_hex: Some("11".repeat(KEY_SIZE)),
                password: None,
                fields: vec!["prompt".into()],
            },
            ..Default::default()
        };
        let security = SecurityProvider::new(&config).unwrap();
        let event = enrich(
            NewEvent::new("claude", "code")
                .label("mail me at a@b.io")
                .meta("password", json!("pw"))
                .meta("prompt", json!("write a poem")),
            &EventContext::default(),
        );
        let id = event.id.clone();

        let clean = security.sanitize(event).unwrap();
        assert_eq!(clean.id, id);
        assert_eq!(clean.label.as_deref(), Some("mail me at [REDACTED:email]"));
        assert_eq!(clean.metadata["password"], "[REDACTED]");
        let sealed = clean.metadata["prompt"].as_str().unwrap();
        assert_eq!(security.decrypt(sealed).unwrap(), "write a poem");
    }

    #[test]
    fn test_disabled_security_passes_events_through() {
        let security = SecurityProvider::new(&SecurityConfig::default()).unwrap();
        let event = enrich(
            NewEvent::new("claude", "code").label("a@b.io"),
            &EventContext::default(),
        );
        let out = security.sanitize(event.clone()).unwrap();
        assert_eq!(out, event);
    }

    #[test]
    fn test_retention_cutoff() {
        let security = SecurityProvider::new(&SecurityConfig::default()).unwrap();
        let now = Utc::now();
        assert_eq!(security.retention_cutoff(now), now - Duration::days(30));
    }

    #[test]
    fn test_retention_beyond_calendar_keeps_everything() {
        let mut config = SecurityConfig::default();
        config.retention.max_age_days = u32::MAX;
        let security = SecurityProvider::new(&config).unwrap();
        assert_eq!(security.retention_cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_encrypts_non_string_fields_as_json_text() {
        let config = SecurityConfig {
            encryption: EncryptionConfig {
                enabled: true,
                key_hex: Some("22".repeat(KEY_SIZE)),
                password: None,
                fields: vec!["usage".into(), "missing".into()],
            },
            ..Default::default()
        };
        let security = SecurityProvider::new(&config).unwrap();
        let event = enrich(
            NewEvent::new("claude", "code").meta("usage", json!({ "tokens": 12 })),
            &EventContext::default(),
        );

        let clean = security.sanitize(event).unwrap();
        let sealed = clean.metadata["usage"].as_str().unwrap();
        assert_eq!(security.decrypt(sealed).unwrap(), r#"{"tokens":12}"#);
        assert!(!clean.metadata.contains_key("missing"));
    }
}
