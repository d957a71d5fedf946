mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::PlaygroundConfig;

#[derive(Parser)]
#[command(name = "hdlplay")]
#[command(about = "Run HDL playground programs in a sandbox")]
#[command(version)]
pub struct Cli {
    /// Settings file (default: ~/.config/hdlplay/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program once and stream its output
    Run {
        /// Program file, or `-` for stdin
        file: PathBuf,

        /// Package version to run with
        #[arg(long)]
        version: Option<String>,

        /// Directory to write design.il, design.v and waveforms.json into
        #[arg(short, long)]
        artifacts: Option<PathBuf>,
    },
    /// List known package versions
    Versions,
    /// Print the demo program of a version
    Demo {
        #[arg(long)]
        version: Option<String>,
    },
    /// Print a share link for a program
    Share {
        /// Program file, or `-` for stdin
        file: PathBuf,

        #[arg(long)]
        version: Option<String>,

        /// Playground URL the link points to
        #[arg(long)]
        base: Option<String>,
    },
    /// Decode a share link and print its version and program
    Open {
        /// Share URL or bare fragment
        link: String,
    },
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file {}", path.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "hdlplay={},hdlplay_sandbox={},hdlplay_common={}",
                    log_level, log_level, log_level
                ))
            }),
        )
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, cli.log_file.as_deref())?;
    let config = PlaygroundConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            version,
            artifacts,
        } => {
            let succeeded =
                commands::execute_run(&config, &file, version.as_deref(), artifacts.as_deref())
                    .await?;
            Ok(if succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Versions => {
            commands::execute_versions(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Demo { version } => {
            commands::execute_demo(&config, version.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Share {
            file,
            version,
            base,
        } => {
            commands::execute_share(&config, &file, version.as_deref(), base.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Open { link } => {
            commands::execute_open(&link)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
