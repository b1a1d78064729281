mod config;
mod dispatch;
mod download;
mod prompt;
mod render;
mod toolchain;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Error;
use bundlepatch_installer::PipelineError;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::render::{current_output_style, render_status_line};

const LOG_ENV: &str = "BUNDLEPATCH_LOG";

#[derive(Parser, Debug)]
#[command(name = "bundlepatch")]
#[command(
    about = "Stage a resource bundle into an installed application and patch it",
    long_about = None
)]
struct Cli {
    /// Patch profile to use (defaults to ./bundlepatch.toml).
    #[arg(long, global = true)]
    profile: Option<PathBuf>,
    /// Overrides BUNDLEPATCH_INSTALL_ROOT and the profile's install_root.
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Unpack and patch the application's bundle.
    Install(PatchArgs),
    /// Replace an already patched app folder without asking.
    Update(PatchArgs),
    /// Show the installation state of the install root.
    Status {
        #[arg(long)]
        json: bool,
    },
    Completions {
        shell: Shell,
    },
    Version,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
struct PatchArgs {
    /// Use a local payload archive instead of the profile's download.
    #[arg(long)]
    payload: Option<PathBuf>,
    /// Answer yes to the overwrite confirmation; never prompt.
    #[arg(long, short = 'y')]
    yes: bool,
    #[arg(long)]
    remove_update_manifest: bool,
    #[arg(long)]
    remove_leftover_manifest: bool,
    #[arg(long)]
    force_redownload: bool,
    /// Print the plan and exit without changing anything.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match dispatch::run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn pipeline_error(err: &Error) -> Option<&PipelineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}

fn exit_code_for(err: &Error) -> u8 {
    pipeline_error(err).map_or(1, PipelineError::exit_code)
}

fn report_failure(err: &Error) {
    let style = current_output_style();
    eprintln!("{}", render_status_line(style, "err", &format!("{err:#}")));
    if let Some(hint) = pipeline_error(err).and_then(PipelineError::remediation) {
        eprintln!("hint: {hint}");
    }
}

#[cfg(test)]
mod tests;
