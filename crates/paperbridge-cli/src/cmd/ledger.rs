//! `paperbridge ledger`: inspect or edit the identity ledger.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result, bail};
use clap::Subcommand;
use paperbridge_core::config::Config;
use paperbridge_core::ledger::{DeliveryRecord, SqliteLedger};
use paperbridge_core::lock::SyncLock;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// List every recorded delivery, newest first.
    List,
    /// Drop the entry for a paper so the next pass posts it again.
    Forget {
        /// Paper identifier to forget.
        paper_id: String,
    },
}

#[derive(Debug, Serialize)]
struct Forgotten {
    paper_id: String,
    issue_number: u64,
}

pub fn run_ledger(command: &LedgerCommand, config: &Config, output: OutputMode) -> Result<()> {
    match command {
        LedgerCommand::List => list(config, output),
        LedgerCommand::Forget { paper_id } => forget(config, paper_id, output),
    }
}

fn list(config: &Config, output: OutputMode) -> Result<()> {
    let ledger = SqliteLedger::open(&config.ledger)?;
    let entries = ledger.entries()?;

    render_mode(
        output,
        entries.as_slice(),
        |entries, w| {
            for entry in entries {
                writeln!(
                    w,
                    "{}\t{}\t{}",
                    entry.paper_id,
                    entry.issue_number,
                    entry.recorded_at.to_rfc3339()
                )?;
            }
            Ok(())
        },
        write_pretty,
    )
}

fn write_pretty(entries: &[DeliveryRecord], w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Ledger ({} entries)", entries.len()))?;
    for entry in entries {
        writeln!(
            w,
            "  {:<16} #{:<6} {}",
            entry.paper_id,
            entry.issue_number,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
    }
    Ok(())
}

// Holds the sync lock so a running pass never sees a half-edited ledger.
fn forget(config: &Config, paper_id: &str, output: OutputMode) -> Result<()> {
    let lock = SyncLock::acquire(&config.lock_path(), config.lock_timeout())
        .context("failed to take the sync lock")?;
    let mut ledger = SqliteLedger::open(&config.ledger)?;

    let Some(entry) = ledger.get(paper_id)? else {
        bail!("no ledger entry for paper {paper_id}");
    };
    ledger.forget(paper_id)?;
    lock.release();

    let forgotten = Forgotten {
        paper_id: entry.paper_id,
        issue_number: entry.issue_number,
    };
    render_mode(
        output,
        &forgotten,
        |f, w| writeln!(w, "forgot\t{}\t{}", f.paper_id, f.issue_number),
        |f, w| {
            pretty_kv(w, "forgot", &f.paper_id)?;
            pretty_kv(w, "was issue", format!("#{}", f.issue_number))?;
            writeln!(w, "The next sync pass will post this paper again.")
        },
    )
}
