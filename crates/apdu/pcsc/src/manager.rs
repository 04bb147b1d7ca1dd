//! Device manager for PC/SC operations

use std::fmt;

use pcsc::{Context, ReaderState, Scope, State};
use tracing::debug;

use crate::{
    config::{PcscConfig, ReaderSelection},
    error::PcscError,
    reader::PcscReader,
    transport::PcscTransport,
    util::atr_has_prefix,
};

/// Manager for PC/SC device operations
pub struct PcscDeviceManager {
    context: Context,
}

impl fmt::Debug for PcscDeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscDeviceManager").finish_non_exhaustive()
    }
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager
    pub fn new() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let names = self.context.list_readers_owned()?;
        if names.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut states: Vec<ReaderState> = names
            .iter()
            .map(|name| ReaderState::new(name.clone(), State::UNAWARE))
            .collect();

        if let Err(e) = self.context.get_status_change(None, &mut states) {
            debug!(error = %e, "Could not query reader states");
            return Ok(names
                .into_iter()
                .map(|name| PcscReader::new(name.to_string_lossy().into_owned(), None))
                .collect());
        }

        let readers: Vec<PcscReader> = states.iter().map(PcscReader::from_reader_state).collect();
        for reader in &readers {
            debug!(
                reader = reader.name(),
                atr = %reader.atr().map(hex::encode_upper).unwrap_or_default(),
                "Found reader"
            );
        }
        Ok(readers)
    }

    /// Open a connection to a specific reader
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscTransport, PcscError> {
        self.open_reader_with_config(reader_name, PcscConfig::default())
    }

    /// Open a connection to a specific reader with custom configuration
    pub fn open_reader_with_config(
        &self,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        PcscTransport::new(self.context.clone(), reader_name, config)
    }

    /// Connect to the reader picked by `selection`
    pub fn connect(
        &self,
        selection: &ReaderSelection,
        config: PcscConfig,
    ) -> Result<PcscTransport, PcscError> {
        match selection {
            ReaderSelection::Named(name) => self.open_reader_with_config(name, config),
            ReaderSelection::AnyCard => {
                let reader = self
                    .list_readers()?
                    .into_iter()
                    .find(PcscReader::has_card)
                    .ok_or_else(|| PcscError::NoCard("no reader with a card".to_string()))?;
                self.open_reader_with_config(reader.name(), config)
            }
            ReaderSelection::AtrPrefix(prefix) => {
                let reader = self
                    .list_readers()?
                    .into_iter()
                    .find(|r| r.atr().is_some_and(|atr| atr_has_prefix(atr, prefix)))
                    .ok_or_else(|| PcscError::NoCard("no card with matching ATR".to_string()))?;
                self.open_reader_with_config(reader.name(), config)
            }
            ReaderSelection::FirstAvailable => {
                let reader = self
                    .list_readers()?
                    .into_iter()
                    .next()
                    .ok_or(PcscError::NoReadersAvailable)?;
                self.open_reader_with_config(reader.name(), config)
            }
        }
    }
}
