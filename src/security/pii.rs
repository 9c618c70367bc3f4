//! PII detection and scrubbing over event strings and metadata.

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::SecurityError;
use crate::config::{PiiConfig, PiiMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    Email,
    CreditCard,
    Ssn,
    Phone,
    IpAddress,
    ApiKey,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::CreditCard => "credit_card",
            Self::Ssn => "ssn",
            Self::Phone => "phone",
            Self::IpAddress => "ip_address",
            Self::ApiKey => "api_key",
        }
    }
}

/// A detected PII span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

/// Scrubs PII from free text and from sensitive metadata keys.
pub struct PiiSanitizer {
    mode: PiiMode,
    patterns: Vec<(PiiKind, Regex)>,
    fields: Vec<String>,
}

impl PiiSanitizer {
    pub fn new(config: &PiiConfig) -> Result<Self, SecurityError> {
        let sources: [(PiiKind, &str); 7] = [
            (PiiKind::ApiKey, r"\b(?:sk-[A-Za-z0-9]{20,}|ghp_[A-Za-z0-9]{36}|xox[baprs]-[A-Za-z0-9-]{10,})\b"),
            (PiiKind::Email, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
            (PiiKind::CreditCard, r"\b(?:\d{4}[-\s]?){3}\d{4}\b"),
            (PiiKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
            (PiiKind::Phone, r"(?:\+?1[-.\s]?)?\(?\b[0-9]{3}\)?[-.\s][0-9]{3}[-.\s][0-9]{4}\b"),
            (PiiKind::IpAddress, r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b"),
            (PiiKind::IpAddress, r"\b(?:[A-Fa-f0-9]{1,4}:){7}[A-Fa-f0-9]{1,4}\b"),
        ];
        let mut patterns = Vec::with_capacity(sources.len());
        for (kind, source) in sources {
            let regex = Regex::new(source).map_err(|e| SecurityError::Pattern(e.to_string()))?;
            patterns.push((kind, regex));
        }

        Ok(Self {
            mode: config.mode,
            patterns,
            fields: config.fields.iter().map(|f| f.to_ascii_lowercase()).collect(),
        })
    }

    pub fn mode(&self) -> PiiMode {
        self.mode
    }

    /// Non-overlapping PII spans in `text`, leftmost first. Earlier
    /// patterns win ties.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut matches: Vec<PiiMatch> = Vec::new();
        for (kind, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                if *kind == PiiKind::CreditCard && !luhn_check(m.as_str()) {
                    continue;
                }
                let overlaps = matches.iter().any(|o| m.start() < o.end && o.start < m.end());
                if !overlaps {
                    matches.push(PiiMatch {
                        kind: *kind,
                        start: m.start(),
                        end: m.end(),
                    });
                }
            }
        }
        matches.sort_by_key(|m| m.start);
        matches
    }

    pub fn contains_pii(&self, text: &str) -> bool {
        !self.detect(text).is_empty()
    }

    /// Scrub PII spans in `text` according to the mode.
    pub fn scrub(&self, text: &str) -> String {
        let matches = self.detect(text);
        if matches.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in matches {
            out.push_str(&text[last..m.start]);
            match self.mode {
                PiiMode::Redact => {
                    out.push_str("[REDACTED:");
                    out.push_str(m.kind.as_str());
                    out.push(']');
                }
                PiiMode::Hash => out.push_str(&pseudonym(&text[m.start..m.end])),
                PiiMode::Remove => {}
            }
            last = m.end;
        }
        out.push_str(&text[last..]);
        out
    }

    /// Scrub every string in a metadata map, descending into nested values.
    /// Keys named in `fields` are treated as wholly sensitive.
    pub fn scrub_map(&self, map: &mut Map<String, Value>) {
        let sensitive: Vec<String> = map
            .keys()
            .filter(|k| self.is_sensitive_key(k))
            .cloned()
            .collect();
        for key in sensitive {
            match self.mode {
                PiiMode::Remove => {
                    map.remove(&key);
                }
                PiiMode::Redact => {
                    map.insert(key, Value::from("[REDACTED]"));
                }
                PiiMode::Hash => {
                    if let Some(value) = map.get_mut(&key) {
                        let raw = match &*value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        *value = Value::from(pseudonym(&raw));
                    }
                }
            }
        }

        for (key, value) in map.iter_mut() {
            if !self.is_sensitive_key(key) {
                self.scrub_value(value);
            }
        }
    }

    fn scrub_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.scrub(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.scrub_value(v)),
            Value::Object(map) => self.scrub_map(map),
            _ => {}
        }
    }

    fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.fields.iter().any(|f| *f == key)
    }
}

/// Stable pseudonym for a PII value.
fn pseudonym(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("[HASH:{}]", &hex::encode(digest)[..16])
}

fn luhn_check(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
