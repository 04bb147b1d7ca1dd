use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use sems_apdu_transport_pcsc::PcscDeviceManager;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod utils;

use commands::*;
use utils::{DigestArg, SourceArgs, reader};

#[derive(Parser)]
#[command(version, about = "Play secure element management scripts against a card")]
struct Cli {
    /// Optional reader name to use (falls back to the configured selection)
    #[arg(short, long, global = true)]
    reader: Option<String>,

    /// Configuration file (defaults to ~/.sems/sems.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available readers
    Readers,

    /// List stored scripts
    List,

    /// Run a script against the card
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Caller the script is run for
        #[arg(long, required = true)]
        caller: String,

        /// Name under which input and output are stored
        #[arg(long)]
        name: Option<String>,

        /// Application to start on, in hex
        #[arg(long)]
        aid: Option<String>,

        /// Digest applied to the caller identity
        #[arg(long, value_enum)]
        digest: Option<DigestArg>,

        /// Reader holding the external element to relay through
        #[arg(long)]
        relay_reader: Option<String>,

        /// Print the exchange log
        #[arg(long)]
        show_log: bool,
    },

    /// Show the result of the last script the card processed
    Status,

    /// Print the output log of a previous run
    Log {
        /// Script name
        #[arg(required = true)]
        name: String,
    },
}

fn main() -> eyre::Result<ExitCode> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = config::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::List => list_command(&config)?,
        Commands::Log { name } => log_command(&config, name)?,
        Commands::Readers => reader::list_readers(&PcscDeviceManager::new()?)?,
        Commands::Status => {
            let manager = PcscDeviceManager::new()?;
            let transport = reader::connect_card(&manager, &config, cli.reader.as_deref())?;
            status_command(&config, transport)?
        }
        Commands::Run {
            source,
            caller,
            name,
            aid,
            digest,
            relay_reader,
            show_log,
        } => {
            let manager = PcscDeviceManager::new()?;
            let transport = reader::connect_card(&manager, &config, cli.reader.as_deref())?;
            let relay = reader::connect_relay(&manager, &config, relay_reader.as_deref())?;

            return run_command(
                &config,
                transport,
                relay,
                RunOptions {
                    source,
                    name: name.as_deref(),
                    caller,
                    aid: aid.as_deref(),
                    digest: digest.map(Into::into),
                    show_log: *show_log,
                },
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .init();
}
