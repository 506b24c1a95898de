//! Newline-delimited JSON record feed.
//!
//! Each non-empty line is one flat JSON object. Nested values are ignored by
//! [`Record::from_json`]; malformed lines are logged and skipped.

use pulse_core::types::Record;
use pulse_gateway::Gateway;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownController;

/// Why a feed line was skipped.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The line is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The line is JSON but not an object.
    #[error("Record must be a JSON object")]
    NotAnObject,
}

/// Totals for one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    /// Lines read, blank lines included.
    pub lines: u64,
    /// Records processed.
    pub records: u64,
    /// Lines skipped as malformed.
    pub skipped: u64,
    /// Alerts produced.
    pub alerts: u64,
}

/// Parses one feed line.
pub fn parse_record(line: &str) -> Result<Record, FeedError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    Record::from_json(&value).ok_or(FeedError::NotAnObject)
}

/// Reads records from `reader` into the gateway until EOF, a read error or
/// shutdown.
pub async fn run_feed<R>(reader: R, gateway: &Gateway, shutdown: &ShutdownController) -> FeedStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.wait_for_shutdown() => break,
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Feed read failed");
                break;
            }
        };
        stats.lines += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_record(trimmed) {
            Ok(record) => {
                let alerts = gateway.process_record(&record).await;
                stats.records += 1;
                stats.alerts += alerts.len() as u64;
                debug!(line = stats.lines, alerts = alerts.len(), "Record processed");
            }
            Err(e) => {
                stats.skipped += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed record");
            }
        }
    }

    info!(
        records = stats.records,
        skipped = stats.skipped,
        alerts = stats.alerts,
        "Feed finished"
    );
    stats
}
