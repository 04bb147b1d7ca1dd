//! Commands running and inspecting scripts

use std::process::ExitCode;

use colored::Colorize;
use sems::{
    DigestAlgorithm, FileStorage, Outcome, ScriptStorage, SemsAgent,
    channel::{CardChannel, CardRelay},
};
use sems_apdu_transport_pcsc::PcscTransport;
use tracing::info;

use crate::{
    config::Config,
    utils::{SourceArgs, parse_aid},
};

/// Options of a script run
#[derive(Debug)]
pub(crate) struct RunOptions<'a> {
    pub(crate) source: &'a SourceArgs,
    pub(crate) name: Option<&'a str>,
    pub(crate) caller: &'a str,
    pub(crate) aid: Option<&'a str>,
    pub(crate) digest: Option<DigestAlgorithm>,
    pub(crate) show_log: bool,
}

fn storage(config: &Config) -> eyre::Result<FileStorage> {
    Ok(FileStorage::new(config.storage_dir()?).with_comment_prefix(&config.engine.comment_prefix))
}

/// Run a script and report its outcome
///
/// The exit code is the outcome code of the run.
pub(crate) fn run_command(
    config: &Config,
    transport: PcscTransport,
    relay: Option<PcscTransport>,
    options: RunOptions<'_>,
) -> eyre::Result<ExitCode> {
    let mut request = options
        .source
        .request(options.name, &config.engine.comment_prefix)?
        .with_caller(options.caller);
    if let Some(aid) = options.aid {
        request = request.with_aid(parse_aid(aid)?);
    }
    if options.show_log {
        request = request.with_log();
    }

    let mut builder = SemsAgent::builder(CardChannel::new(transport), storage(config)?)
        .config(config.engine.clone());
    if let Some(relay) = relay {
        builder = builder.relay(CardRelay::new(relay));
    }
    let agent = builder.build();
    if let Some(digest) = options.digest {
        agent.set_digest_algorithm(digest);
    }

    info!(name = %request.name, digest = %agent.digest_algorithm(), "Running script");
    let completion = agent.execute_blocking(request)?;

    if let Some(log) = &completion.log {
        print!("{log}");
    }

    let outcome = match completion.outcome {
        Outcome::Success => completion.outcome.to_string().as_str().green(),
        _ => completion.outcome.to_string().as_str().red(),
    };
    println!(
        "{} {} (status {})",
        "Outcome:".bold(),
        outcome,
        completion.status
    );

    Ok(ExitCode::from(completion.outcome.code()))
}

/// List the stored scripts
pub(crate) fn list_command(config: &Config) -> eyre::Result<()> {
    let scripts = storage(config)?.list_scripts()?;

    if scripts.is_empty() {
        println!("No stored scripts");
        return Ok(());
    }

    println!("Stored scripts:");
    for name in scripts {
        println!("  {name}");
    }
    Ok(())
}

/// Print the output log of a previous run
pub(crate) fn log_command(config: &Config, name: &str) -> eyre::Result<()> {
    match storage(config)?.read_output(name)? {
        Some(log) => print!("{log}"),
        None => println!("{}", format!("No output log for '{name}'").as_str().yellow()),
    }
    Ok(())
}
