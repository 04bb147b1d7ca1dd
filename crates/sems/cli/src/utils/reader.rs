use colored::Colorize;
use eyre::WrapErr;
use sems_apdu_transport_pcsc::{PcscDeviceManager, PcscTransport, ReaderSelection};
use tracing::info;

use crate::config::Config;

/// List all available readers
pub(crate) fn list_readers(manager: &PcscDeviceManager) -> eyre::Result<()> {
    let readers = manager.list_readers()?;

    if readers.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    println!("Available readers:");
    for (i, reader) in readers.iter().enumerate() {
        let status = match reader.atr() {
            Some(atr) => format!("card present, ATR {}", hex::encode_upper(atr))
                .as_str()
                .green(),
            None => "no card".yellow(),
        };
        println!("{}. {} ({})", i + 1, reader.name(), status);
    }

    Ok(())
}

/// Connect to the card reader, preferring `reader` over the configured selection
pub(crate) fn connect_card(
    manager: &PcscDeviceManager,
    config: &Config,
    reader: Option<&str>,
) -> eyre::Result<PcscTransport> {
    let selection = reader.map_or_else(
        || config.reader.clone(),
        |name| ReaderSelection::Named(name.to_string()),
    );

    let transport = manager
        .connect(&selection, config.pcsc.clone())
        .wrap_err_with(|| format!("failed to connect using {selection:?}"))?;
    info!("Using reader: {}", transport.reader_name());
    Ok(transport)
}

/// Connect to the reader holding the external element, if one is named
pub(crate) fn connect_relay(
    manager: &PcscDeviceManager,
    config: &Config,
    reader: Option<&str>,
) -> eyre::Result<Option<PcscTransport>> {
    let Some(name) = reader.or(config.relay_reader.as_deref()) else {
        return Ok(None);
    };

    let transport = manager
        .open_reader_with_config(name, config.pcsc.clone())
        .wrap_err_with(|| format!("failed to open relay reader '{name}'"))?;
    info!("Relaying through reader: {}", transport.reader_name());
    Ok(Some(transport))
}
