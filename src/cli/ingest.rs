// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! `ingest`: track JSON-lines events from a reader, then export them.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::event::{NewEvent, QueryFilter};
use crate::export::ExportResult;
use crate::service::{TelemetryError, TelemetryService};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub format: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct IngestSummary {
    pub tracked: usize,
    /// `(line number, reason)` for every line that was not tracked.
    pub skipped: Vec<(usize, String)>,
    pub export: ExportResult,
}

/// Track every non-blank line of `input` as an event, then export
/// everything stored. Bad lines are skipped and reported, not fatal.
pub async fn run_ingest<R>(
    service: &TelemetryService,
    input: R,
    options: &IngestOptions,
) -> Result<IngestSummary, TelemetryError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut tracked = 0;
    let mut skipped = Vec::new();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: NewEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                skipped.push((line_no, format!("invalid event: {e}")));
                continue;
            }
        };
        match service.track(event).await {
            Ok(_) => tracked += 1,
            Err(e @ (TelemetryError::NotInitialized | TelemetryError::ShuttingDown)) => return Err(e),
            Err(e) => skipped.push((line_no, e.to_string())),
        }
    }

    tracing::info!(tracked, skipped = skipped.len(), "ingest complete");
    let export = service.export(&options.format, QueryFilter::default()).await?;
    Ok(IngestSummary {
        tracked,
        skipped,
        export,
    })
}
