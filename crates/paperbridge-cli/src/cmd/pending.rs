//! `paperbridge pending`: records the next pass would post.

use crate::output::{OutputMode, pretty_section, render_mode};
use crate::runtime::Runtime;
use anyhow::Result;
use paperbridge_core::config::Config;
use paperbridge_core::dataset::load_dataset;
use paperbridge_core::ledger::SqliteLedger;
use paperbridge_core::model::DatasetRecord;
use paperbridge_core::render;
use paperbridge_core::sync::{ReconcileStrategy, pending_from_ledger};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Serialize)]
pub struct PendingRecord {
    pub paper_id: String,
    pub title: String,
}

impl From<&DatasetRecord> for PendingRecord {
    fn from(record: &DatasetRecord) -> Self {
        Self {
            paper_id: record.paper_id.clone(),
            title: render::title(record),
        }
    }
}

/// With the ledger as authority this never touches the network.
pub fn run_pending(config: &Config, output: OutputMode) -> Result<()> {
    let pending = match config.reconcile {
        ReconcileStrategy::Ledger => {
            let records = load_dataset(&config.dataset)?;
            let ledger = SqliteLedger::open(&config.ledger)?;
            pending_from_ledger(&records, &ledger)?
        }
        ReconcileStrategy::Remote => Runtime::from_config(config)?.pending()?,
    };
    let rows: Vec<PendingRecord> = pending.iter().map(PendingRecord::from).collect();

    render_mode(output, rows.as_slice(), write_text, write_pretty)
}

fn write_text(rows: &[PendingRecord], w: &mut dyn Write) -> io::Result<()> {
    for row in rows {
        writeln!(w, "{}\t{}", row.paper_id, row.title)?;
    }
    Ok(())
}

fn write_pretty(rows: &[PendingRecord], w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Pending ({})", rows.len()))?;
    if rows.is_empty() {
        writeln!(w, "Nothing to post.")?;
    }
    for row in rows {
        writeln!(w, "  {:<16} {}", row.paper_id, row.title)?;
    }
    Ok(())
}
