// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! GG-TELEMETRY entry point.
//!
//! ## CLI Subcommands
//!
//! - `gg-telemetry ingest` - Track JSON-lines events from stdin and print the export
//! - `gg-telemetry config show|defaults|validate` - Inspect configuration
//! - `gg-telemetry help` / `version`

use std::path::PathBuf;
use std::process::ExitCode;

use gg_telemetry::cli::{self, config_cmd, flag_value, IngestOptions, EXIT_CONFIG_ERROR};
use gg_telemetry::observability::{init_logging, LogConfig, LogFormat};
use gg_telemetry::TelemetryService;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let config_path = flag_value(&args, "--config").map(PathBuf::from);

    match command {
        "ingest" => {
            let code = run_ingest(&args, config_path.as_ref()).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(config_path.as_ref()) as u8),
                "defaults" => ExitCode::from(config_cmd::run_defaults() as u8),
                "validate" => ExitCode::from(config_cmd::run_validate(config_path.as_ref()) as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("gg-telemetry {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

async fn run_ingest(args: &[String], config_path: Option<&PathBuf>) -> i32 {
    let log = LogConfig {
        format: LogFormat::Json,
        level: "warn".to_string(),
        output_path: None,
    };
    if let Err(e) = init_logging(&log) {
        eprintln!("Logging disabled: {}", e);
    }

    let config = match cli::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };
    let options = IngestOptions {
        format: flag_value(args, "--format").unwrap_or("json").to_string(),
    };

    let service = match TelemetryService::new(config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };
    if let Err(e) = service.initialize().await {
        eprintln!("Failed to initialize: {}", e);
        return 1;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let outcome = cli::run_ingest(&service, stdin, &options).await;
    service.shutdown().await;

    match outcome {
        Ok(summary) => {
            for (line, reason) in &summary.skipped {
                eprintln!("line {}: {}", line, reason);
            }
            println!("{}", summary.export.data);
            eprintln!(
                "Tracked {} events, skipped {}",
                summary.tracked,
                summary.skipped.len()
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "GG-TELEMETRY - telemetry event pipeline v{}

USAGE:
    gg-telemetry [COMMAND] [OPTIONS]

COMMANDS:
    ingest       Track JSON-lines events from stdin and print the export
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    -h, --help       Show help for command
    -V, --version    Show version information
    --config PATH    Load configuration from a TOML file

ENVIRONMENT:
    GG_TELEMETRY_LOG           Log filter (debug, info, warn, error)
    GG_TELEMETRY_SERVICE_NAME  Service name when no config file is given
    GG_TELEMETRY_*             See `gg-telemetry help config`

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "ingest" => {
            eprintln!(
                "gg-telemetry ingest - Track events from stdin

USAGE:
    gg-telemetry ingest [--config PATH] [--format json|csv]

DESCRIPTION:
    Reads one JSON event per line, e.g.
      {{\"category\":\"claude\",\"action\":\"code\",\"eventType\":\"start\"}}
    tracks each through the pipeline, then prints every stored event
    in the requested format. Lines that fail are reported on stderr.

EXAMPLES:
    gg-telemetry ingest < events.jsonl
    gg-telemetry ingest --format csv --config telemetry.toml < events.jsonl
"
            );
        }
        "config" => {
            eprintln!(
                "gg-telemetry config - Manage configuration

USAGE:
    gg-telemetry config <SUBCOMMAND> [--config PATH]

SUBCOMMANDS:
    show           Show the effective configuration
    defaults       Show the default configuration
    validate       Validate configuration, listing every problem

EXAMPLES:
    gg-telemetry config show --config telemetry.toml
    gg-telemetry config defaults
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'gg-telemetry help' for general usage.",
                command
            );
        }
    }
}
