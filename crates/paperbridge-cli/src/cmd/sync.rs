//! `paperbridge sync`: one reconciliation pass, then exit.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use crate::runtime::Runtime;
use anyhow::{Result, bail};
use paperbridge_core::config::Config;
use paperbridge_core::sync::SyncSummary;
use std::io::{self, Write};

pub fn run_sync(config: &Config, output: OutputMode) -> Result<()> {
    let runtime = Runtime::from_config(config)?;
    let summary = runtime.run_sync()?;

    render_mode(output, &summary, write_text, write_pretty)?;

    if !summary.is_clean() {
        bail!(
            "{} of {} records failed to deliver; they stay pending for the next pass",
            summary.failed.len(),
            summary.records
        );
    }
    Ok(())
}

fn write_text(summary: &SyncSummary, w: &mut dyn Write) -> io::Result<()> {
    for posted in &summary.posted {
        writeln!(w, "posted\t{}\t#{}", posted.paper_id, posted.issue_number)?;
    }
    for failed in &summary.failed {
        writeln!(w, "failed\t{}\t{}\t{}", failed.paper_id, failed.code, failed.message)?;
    }
    writeln!(
        w,
        "summary\tposted={}\texisting={}\tduplicates={}\tfailed={}",
        summary.posted.len(),
        summary.skipped_existing,
        summary.skipped_duplicate,
        summary.failed.len()
    )
}

fn write_pretty(summary: &SyncSummary, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Sync pass")?;
    pretty_kv(w, "authority", summary.strategy.as_str())?;
    pretty_kv(w, "records", summary.records.to_string())?;
    pretty_kv(w, "posted", summary.posted.len().to_string())?;
    pretty_kv(w, "already delivered", summary.skipped_existing.to_string())?;
    pretty_kv(w, "duplicate rows", summary.skipped_duplicate.to_string())?;
    pretty_kv(w, "failed", summary.failed.len().to_string())?;
    pretty_kv(w, "duration", format!("{} ms", summary.duration_ms))?;

    if !summary.posted.is_empty() {
        writeln!(w)?;
        for posted in &summary.posted {
            writeln!(w, "  + {:<16} #{}", posted.paper_id, posted.issue_number)?;
        }
    }
    if !summary.failed.is_empty() {
        writeln!(w)?;
        for failed in &summary.failed {
            writeln!(w, "  ! {:<16} [{}] {}", failed.paper_id, failed.code, failed.message)?;
        }
    }
    Ok(())
}
