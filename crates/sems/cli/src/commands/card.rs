//! Commands talking to the card outside of a script run

use colored::Colorize;
use sems::{FileStorage, SemsAgent, channel::CardChannel};
use sems_apdu_transport_pcsc::PcscTransport;
use tracing::debug;

use crate::config::Config;

/// Query the result of the last script the card processed
pub(crate) fn status_command(config: &Config, transport: PcscTransport) -> eyre::Result<()> {
    let storage = FileStorage::new(config.storage_dir()?);
    let agent = SemsAgent::builder(CardChannel::new(transport), storage)
        .config(config.engine.clone())
        .build();

    let status = agent.last_execution_status()?;
    debug!(?status, "Queried last execution status");

    let result = if status.succeeded {
        "succeeded".green()
    } else {
        "failed".red()
    };
    println!("{} {}", "Last script:".bold(), result);
    println!(
        "{} {}",
        "Signature:".bold(),
        status.signature.as_deref().unwrap_or("none")
    );

    Ok(())
}
