//! Core error type for APDU operations

use crate::response::status::StatusWord;

/// Result alias used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while building, sending or parsing APDUs
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Failed to connect to the device
    #[error("Connection error: failed to connect to device")]
    Connection,

    /// Failed to transmit data
    #[error("Transmission error: failed to transmit data")]
    Transmission,

    /// The device reported a failure
    #[error("Device error: {0}")]
    Device(String),

    /// Response shorter than a status word
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// Command bytes could not be parsed
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Command payload exceeds what an extended APDU can carry
    #[error("Command data too long: {0} bytes")]
    DataTooLong(usize),

    /// Card answered with an unexpected status word
    #[error("Status error {0}")]
    Status(StatusWord),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Wrap this error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a status error from the two status bytes
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::Status(StatusWord::new(sw1, sw2))
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
