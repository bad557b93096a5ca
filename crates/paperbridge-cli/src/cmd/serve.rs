//! `paperbridge serve`: webhook server with an optional startup pass.

use crate::runtime::Runtime;
use crate::server::{ServiceState, serve};
use anyhow::{Context as _, Result};
use clap::Args;
use paperbridge_core::config::Config;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides config and `PAPERBRIDGE_BIND`).
    #[arg(long)]
    pub bind: Option<String>,

    /// Skip the sync pass normally started alongside the server.
    #[arg(long)]
    pub no_startup_sync: bool,
}

pub fn run_serve(args: &ServeArgs, config: &Config) -> Result<()> {
    let runtime = Arc::new(Runtime::from_config(config)?);
    let state = ServiceState::new(runtime, config.operation_timeout());
    let bind = args.bind.clone().unwrap_or_else(|| config.server.bind.clone());
    let startup_sync = config.server.sync_on_start && !args.no_startup_sync;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    rt.block_on(async move {
        // The pass runs in the background; webhooks are served meanwhile.
        if startup_sync && state.start_sync() {
            tracing::info!("startup sync pass started");
        }
        serve(state, &bind).await
    })
}
