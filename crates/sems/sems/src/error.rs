//! Error types for the script engine

use sems_apdu_core::StatusWord;

use crate::{constants::status, executor::State};

/// Result alias used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised outside of a script run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// APDU layer error
    #[error(transparent)]
    Apdu(#[from] sems_apdu_core::Error),

    /// Storage I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script text is not valid hex
    #[error("Invalid script {name}: {source}")]
    InvalidScript {
        /// Script name
        name: String,
        /// Decoding error
        source: hex::FromHexError,
    },

    /// Name cannot be used as a storage key
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Storage was used before `prepare`
    #[error("Storage not prepared")]
    NotPrepared,

    /// Worker thread went away without reporting
    #[error("Worker terminated without completing")]
    WorkerLost,
}

impl Error {
    /// Status word reported when this error prevents a run
    pub const fn status(&self) -> StatusWord {
        match self {
            Self::InvalidScript { .. } | Self::InvalidName(_) => status::SCRIPT_ERROR,
            _ => status::IO_ERROR,
        }
    }
}

/// Reasons a script run terminates early
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The channel raised an I/O fault
    #[error("Transport error: {0}")]
    Transport(#[from] sems_apdu_core::Error),

    /// The card answered a protocol step with an unexpected status word
    #[error("Unexpected status {status} during {state}")]
    Protocol {
        /// Step that failed
        state: State,
        /// Offending status word
        status: StatusWord,
    },

    /// The SELECT response carries no trust anchors
    #[error("SELECT response carries no trust anchors")]
    MissingTrustAnchors,

    /// The script does not follow the frame grammar
    #[error("Malformed script: {0}")]
    Malformed(&'static str),

    /// The external element produced no reply
    #[error("External secure element returned no reply")]
    RelayFailed,

    /// The authentication gate refused the run
    #[error("Authentication gate denied the run")]
    AuthenticationDenied,

    /// A certificate fragment or secure command was rejected
    #[error("Card rejected frame with status {0}")]
    Rejected(StatusWord),
}

impl ScriptError {
    /// Final status word of a run ending with this error
    pub const fn final_status(&self) -> StatusWord {
        match self {
            Self::Transport(_) => status::IO_ERROR,
            Self::Protocol { .. }
            | Self::MissingTrustAnchors
            | Self::Malformed(_)
            | Self::RelayFailed => status::SCRIPT_ERROR,
            Self::AuthenticationDenied => status::SECURITY_NOT_SATISFIED,
            Self::Rejected(sw) => *sw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status() {
        assert_eq!(
            ScriptError::Transport(sems_apdu_core::Error::Transmission).final_status(),
            status::IO_ERROR
        );
        assert_eq!(
            ScriptError::Protocol {
                state: State::StoreIdentity,
                status: StatusWord::new(0x6A, 0x82),
            }
            .final_status(),
            status::SCRIPT_ERROR
        );
        assert_eq!(
            ScriptError::Rejected(StatusWord::new(0x6A, 0x80)).final_status(),
            StatusWord::new(0x6A, 0x80)
        );
    }

    #[test]
    fn test_protocol_display() {
        let err = ScriptError::Protocol {
            state: State::Select,
            status: StatusWord::new(0x6A, 0x82),
        };
        assert_eq!(err.to_string(), "Unexpected status 6A 82 during Select");
    }
}
