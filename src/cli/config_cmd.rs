// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use std::path::PathBuf;

use super::{load_config, DEFAULT_SERVICE_NAME, EXIT_CONFIG_ERROR};
use crate::config::TelemetryConfig;

/// Print the effective configuration as TOML.
pub fn run_show(path: Option<&PathBuf>) -> i32 {
    match load_config(path) {
        Ok(config) => print_config(&config),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            EXIT_CONFIG_ERROR
        }
    }
}

/// Print the default configuration (no file, no env overrides).
pub fn run_defaults() -> i32 {
    print_config(&TelemetryConfig::new(DEFAULT_SERVICE_NAME))
}

/// Validate a configuration, listing every problem found.
pub fn run_validate(path: Option<&PathBuf>) -> i32 {
    match load_config(path) {
        Ok(_) => {
            println!("Configuration is valid.");
            0
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            EXIT_CONFIG_ERROR
        }
    }
}

fn print_config(config: &TelemetryConfig) -> i32 {
    match config.to_toml_string() {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Failed to render configuration: {}", e);
            1
        }
    }
}
