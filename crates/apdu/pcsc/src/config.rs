//! Configuration options for the PC/SC transport

use pcsc::ShareMode as PcscShareMode;
use serde::Deserialize;

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShareMode {
    /// Exclusive access to the card, recommended while a script runs
    Exclusive,
    /// Shared access to the card
    #[default]
    Shared,
    /// Direct connection to the reader
    Direct,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
            ShareMode::Direct => Self::Direct,
        }
    }
}

/// How a reader is picked when connecting
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderSelection {
    /// Connect to a specific reader by name
    Named(String),
    /// Connect to the first reader holding a card
    #[default]
    AnyCard,
    /// Connect to the first card whose ATR starts with this prefix
    AtrPrefix(#[serde(with = "hex")] Vec<u8>),
    /// Connect to the first listed reader
    FirstAvailable,
}

/// Configuration options for the PC/SC transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PcscConfig {
    /// Sharing mode for card connections
    pub share_mode: ShareMode,
    /// Reconnect and retry once when the card was reset underneath us
    pub auto_reconnect: bool,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            auto_reconnect: true,
        }
    }
}

impl PcscConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set whether to automatically reconnect
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}
