// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for the `gg-telemetry` binary.
//!
//! ## Usage
//!
//! ```bash
//! gg-telemetry ingest --config telemetry.toml --format csv < events.jsonl
//! gg-telemetry config show --config telemetry.toml
//! gg-telemetry config defaults
//! ```

pub mod config_cmd;
pub mod ingest;

pub use ingest::{run_ingest, IngestOptions, IngestSummary};

use std::path::PathBuf;

use crate::config::{ConfigError, TelemetryConfig};

/// Service name used when no configuration file is given.
pub const DEFAULT_SERVICE_NAME: &str = "gg-telemetry";

/// Exit code for configuration problems.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Load `path` if given, otherwise the defaults with environment
/// overrides applied. Either way the result is validated.
pub fn load_config(path: Option<&PathBuf>) -> Result<TelemetryConfig, ConfigError> {
    match path {
        Some(path) => TelemetryConfig::load(path),
        None => {
            let mut config = TelemetryConfig::new(DEFAULT_SERVICE_NAME);
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
