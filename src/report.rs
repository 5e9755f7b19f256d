//! Report writers for a finished session
//!
//! Two minimal collaborators for the session result: collapsed-stack
//! lines (the standard flame graph input format) and a JSON summary.
//! No profile container format is defined here.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use crate::aggregator::AggregatedData;
use crate::session::SessionResult;

/// Write `stack count` lines, sorted by stack for deterministic output.
///
/// Degenerate samples with no frames fold to the empty key; they have no
/// renderable stack and are omitted here (they still count in the JSON
/// summary's `samples_taken`).
pub fn write_folded(data: &AggregatedData, writer: &mut impl Write) -> Result<()> {
    let entries: BTreeMap<&str, u64> = data.iter().collect();
    for (stack, count) in entries {
        if stack.is_empty() {
            continue;
        }
        writeln!(writer, "{} {}", stack, count).context("Failed to write folded stacks")?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    samples_taken: u64,
    duration_seconds: f64,
    early_exit: bool,
    target_exit_code: Option<i32>,
    termination_forced: bool,
    stacks: BTreeMap<&'a str, u64>,
}

/// Write the session outcome and frequency table as pretty JSON.
pub fn write_json(result: &SessionResult, writer: &mut impl Write) -> Result<()> {
    let report = JsonReport {
        samples_taken: result.samples_taken,
        duration_seconds: result.duration_elapsed.as_secs_f64(),
        early_exit: result.early_exit,
        target_exit_code: result.target_exit_code,
        termination_forced: result.termination_forced,
        stacks: result.aggregated.iter().collect(),
    };
    serde_json::to_writer_pretty(&mut *writer, &report)
        .context("Failed to serialize JSON report")?;
    writeln!(writer).context("Failed to write JSON report")?;
    Ok(())
}
