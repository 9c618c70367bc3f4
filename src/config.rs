//! Service configuration.
//!
//! Configuration is read from a TOML file (camelCase keys, every section
//! optional), then selectively overridden by `GG_TELEMETRY_*` environment
//! variables. Invalid environment values are ignored and the file value is
//! kept.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `GG_TELEMETRY_SERVICE_NAME` | `serviceName` |
//! | `GG_TELEMETRY_SERVICE_VERSION` | `serviceVersion` |
//! | `GG_TELEMETRY_ENVIRONMENT` | `environment` |
//! | `GG_TELEMETRY_HOOK_TIMEOUT_MS` | `hooks.timeoutMs` |
//! | `GG_TELEMETRY_HOOK_PARALLEL` | `hooks.parallel` |
//! | `GG_TELEMETRY_HOOK_CONTINUE_ON_ERROR` | `hooks.continueOnError` |
//! | `GG_TELEMETRY_RATE_LIMIT_ENABLED` | `reliability.rateLimit.enabled` |
//! | `GG_TELEMETRY_RATE_LIMIT_MAX_EVENTS` | `reliability.rateLimit.maxEvents` |
//! | `GG_TELEMETRY_RETENTION_DAYS` | `security.retention.maxAgeDays` |
//! | `GG_TELEMETRY_PII_ENABLED` | `security.pii.enabled` |
//! | `GG_TELEMETRY_PII_MODE` | `security.pii.mode` |
//! | `GG_TELEMETRY_ENCRYPTION_KEY` | `security.encryption.keyHex` (enables encryption) |
//! | `GG_TELEMETRY_STREAMING_ENABLED` | `streaming.enabled` |
//! | `GG_TELEMETRY_MAINTENANCE_INTERVAL_MS` | `maintenanceIntervalMs` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::EventContext;
use crate::plugin::HookOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {}", join(.0))]
    Rejected(Vec<ConfigError>),
}

fn join(errors: &[ConfigError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub storage: Vec<StorageConfig>,
    pub streaming: StreamingConfig,
    pub security: SecurityConfig,
    pub reliability: ReliabilityConfig,
    pub analytics: AnalyticsConfig,
    /// Plugin names that must be registered when the service initializes.
    pub plugins: Vec<String>,
    pub hooks: HookConfig,
    pub maintenance_interval_ms: u64,
    pub default_context: EventContext,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            service_version: "0.0.0".to_string(),
            environment: "development".to_string(),
            storage: vec![StorageConfig::default()],
            streaming: StreamingConfig::default(),
            security: SecurityConfig::default(),
            reliability: ReliabilityConfig::default(),
            analytics: AnalyticsConfig::default(),
            plugins: Vec::new(),
            hooks: HookConfig::default(),
            maintenance_interval_ms: 300_000,
            default_context: EventContext::default(),
        }
    }
}

/// One storage backend entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: String,
    pub enabled: bool,
    pub options: Map<String, Value>,
}

impl StorageConfig {
    pub fn new(storage_type: impl Into<String>) -> Self {
        Self {
            storage_type: storage_type.into(),
            ..Default::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "memory".to_string(),
            enabled: true,
            options: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub stream_type: String,
    /// Accepted for compatibility; the in-process stream does not listen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub buffer_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_type: "broadcast".to_string(),
            port: None,
            buffer_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub pii: PiiConfig,
    pub encryption: EncryptionConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiMode {
    #[default]
    Redact,
    Hash,
    Remove,
}

impl FromStr for PiiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redact" => Ok(Self::Redact),
            "hash" => Ok(Self::Hash),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown PII mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PiiConfig {
    pub enabled: bool,
    pub mode: PiiMode,
    /// Metadata keys whose values are always treated as sensitive.
    pub fields: Vec<String>,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: PiiMode::Redact,
            fields: ["password", "secret", "token", "apiKey", "authorization"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    /// 32-byte key, hex encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_hex: Option<String>,
    /// Used to derive a key when `key_hex` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Metadata keys to encrypt.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_age_days: 30 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReliabilityConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Half-open successes that close it again.
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_events: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_events: 1000,
            window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    /// Entries reported in ranked insights.
    pub top_n: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: 10,
        }
    }
}

/// Default hook execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookConfig {
    pub timeout_ms: u64,
    pub continue_on_error: bool,
    pub parallel: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            continue_on_error: true,
            parallel: false,
        }
    }
}

impl HookConfig {
    pub fn to_options(&self) -> HookOptions {
        HookOptions {
            continue_on_error: self.continue_on_error,
            timeout: Duration::from_millis(self.timeout_ms),
            parallel: self.parallel,
            skip_plugins: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let string = |key: &str, target: &mut String| {
            if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = v;
            }
        };
        string("GG_TELEMETRY_SERVICE_NAME", &mut self.service_name);
        string("GG_TELEMETRY_SERVICE_VERSION", &mut self.service_version);
        string("GG_TELEMETRY_ENVIRONMENT", &mut self.environment);

        parse_into(&lookup, "GG_TELEMETRY_HOOK_TIMEOUT_MS", &mut self.hooks.timeout_ms);
        parse_into(&lookup, "GG_TELEMETRY_HOOK_PARALLEL", &mut self.hooks.parallel);
        parse_into(
            &lookup,
            "GG_TELEMETRY_HOOK_CONTINUE_ON_ERROR",
            &mut self.hooks.continue_on_error,
        );
        parse_into(
            &lookup,
            "GG_TELEMETRY_RATE_LIMIT_ENABLED",
            &mut self.reliability.rate_limit.enabled,
        );
        parse_into(
            &lookup,
            "GG_TELEMETRY_RATE_LIMIT_MAX_EVENTS",
            &mut self.reliability.rate_limit.max_events,
        );
        parse_into(
            &lookup,
            "GG_TELEMETRY_RETENTION_DAYS",
            &mut self.security.retention.max_age_days,
        );
        parse_into(&lookup, "GG_TELEMETRY_PII_ENABLED", &mut self.security.pii.enabled);
        parse_into(&lookup, "GG_TELEMETRY_PII_MODE", &mut self.security.pii.mode);
        parse_into(&lookup, "GG_TELEMETRY_STREAMING_ENABLED", &mut self.streaming.enabled);
        parse_into(
            &lookup,
            "GG_TELEMETRY_MAINTENANCE_INTERVAL_MS",
            &mut self.maintenance_interval_ms,
        );

        if let Some(key) = lookup("GG_TELEMETRY_ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()) {
            self.security.encryption.enabled = true;
            self.security.encryption.key_hex = Some(key);
        }
    }

    /// Check every field, reporting all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.service_name.trim().is_empty() {
            errors.push(ConfigError::Missing("serviceName"));
        }
        if self.storage.iter().any(|s| s.storage_type.trim().is_empty()) {
            errors.push(invalid("storage", "storage entries need a type"));
        }
        if self.hooks.timeout_ms == 0 {
            errors.push(invalid("hooks.timeoutMs", "must be greater than zero"));
        }
        if self.maintenance_interval_ms == 0 {
            errors.push(invalid("maintenanceIntervalMs", "must be greater than zero"));
        }
        if self.streaming.enabled && self.streaming.buffer_size == 0 {
            errors.push(invalid("streaming.bufferSize", "must be greater than zero"));
        }

        let reliability = &self.reliability;
        if reliability.circuit_breaker.enabled && reliability.circuit_breaker.failure_threshold == 0 {
            errors.push(invalid(
                "reliability.circuitBreaker.failureThreshold",
                "must be greater than zero",
            ));
        }
        if reliability.rate_limit.enabled {
            if reliability.rate_limit.max_events == 0 {
                errors.push(invalid("reliability.rateLimit.maxEvents", "must be greater than zero"));
            }
            if reliability.rate_limit.window_ms == 0 {
                errors.push(invalid("reliability.rateLimit.windowMs", "must be greater than zero"));
            }
        }
        if reliability.retry.max_attempts == 0 {
            errors.push(invalid("reliability.retry.maxAttempts", "must be at least 1"));
        }

        let encryption = &self.security.encryption;
        if encryption.enabled {
            match (&encryption.key_hex, &encryption.password) {
                (None, None) => errors.push(invalid(
                    "security.encryption",
                    "enabled without keyHex or password",
                )),
                (Some(key), _) if key.trim().len() != 64 || hex::decode(key.trim()).is_err() => {
                    errors.push(invalid("security.encryption.keyHex", "expected 64 hex characters"))
                }
                _ => {}
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Rejected(errors)),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Overwrite `target` with a parsed variable, keeping it on missing or
/// invalid input.
fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(parsed) = lookup(key).and_then(|v| v.trim().parse::<T>().ok()) {
        *target = parsed;
    }
}
