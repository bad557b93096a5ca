//! `paperbridge render`: preview the issue a record would produce.

use crate::output::{OutputMode, pretty_kv, pretty_rule, render_mode};
use anyhow::{Result, bail};
use clap::Args;
use paperbridge_core::config::Config;
use paperbridge_core::dataset::load_dataset;
use paperbridge_core::render::render;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Paper identifier from the dataset.
    pub paper_id: String,
}

pub fn run_render(args: &RenderArgs, config: &Config, output: OutputMode) -> Result<()> {
    let records = load_dataset(&config.dataset)?;
    let wanted = args.paper_id.trim();
    let Some(record) = records.iter().find(|record| record.paper_id == wanted) else {
        bail!(
            "paper {wanted} is not in the dataset at {}",
            config.dataset.display()
        );
    };
    let issue = render(record);

    render_mode(
        output,
        &issue,
        |issue, w| {
            writeln!(w, "{}", issue.title)?;
            writeln!(w, "{}", issue.labels.join(","))?;
            writeln!(w, "{}", issue.body)
        },
        |issue, w| {
            pretty_kv(w, "title", &issue.title)?;
            pretty_kv(w, "labels", issue.labels.join(", "))?;
            pretty_rule(w)?;
            writeln!(w, "{}", issue.body)
        },
    )
}
