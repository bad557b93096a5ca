#![forbid(unsafe_code)]

mod cmd;
mod output;
mod runtime;
mod server;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode};
use paperbridge_core::config::load_config;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "paperbridge: post dataset rows as GitHub issues and relay form events as comments",
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./paperbridge.toml when present).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Debug-level logging (same as setting `DEBUG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Service",
        about = "Run the webhook server",
        long_about = "Serve POST /webhook, GET /health and POST /sync. A sync pass starts \
                      in the background unless disabled."
    )]
    Serve(cmd::serve::ServeArgs),

    #[command(
        next_help_heading = "Sync",
        about = "Run one sync pass",
        long_about = "Post an issue for every dataset record not yet delivered, then exit. \
                      Exits non-zero when any record failed."
    )]
    Sync,

    #[command(
        next_help_heading = "Sync",
        about = "List records the next pass would post"
    )]
    Pending,

    #[command(next_help_heading = "Sync", about = "Inspect or edit the identity ledger")]
    Ledger {
        #[command(subcommand)]
        command: cmd::ledger::LedgerCommand,
    },

    #[command(
        next_help_heading = "Read",
        about = "Preview the issue rendered for one record"
    )]
    Render(cmd::render::RenderArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("PAPERBRIDGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "paperbridge=debug,paperbridge_core=debug,info"
        } else {
            "paperbridge=info,paperbridge_core=info,warn"
        })
    });

    let format = env::var("PAPERBRIDGE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so stdout stays parseable.
    let registry = tracing_subscriber::registry().with(filter);
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Serve(args) => cmd::serve::run_serve(args, &config),
        Commands::Sync => cmd::sync::run_sync(&config, output),
        Commands::Pending => cmd::pending::run_pending(&config, output),
        Commands::Ledger { command } => cmd::ledger::run_ledger(command, &config, output),
        Commands::Render(args) => cmd::render::run_render(args, &config, output),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = cli.output_mode();

    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            let cli_error = CliError::from_anyhow(&err);
            if output::render_error(output, &cli_error).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
