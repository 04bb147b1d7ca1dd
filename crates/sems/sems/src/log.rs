//! Human-readable trace of a script run

use std::fmt::Write as _;

use derive_more::Display;
use tracing::trace;

/// Role of a logged frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FrameRole {
    /// Command sent to the card
    #[display("Command")]
    Command,
    /// Raw response received from the card
    #[display("Response")]
    Response,
    /// Final status of the run
    #[display("Status")]
    Status,
    /// Error marker
    #[display("Error")]
    Error,
}

/// Append-only log of every frame exchanged during a run
///
/// Each entry is one line of the form `Role: HEX`. Entries with the
/// [`FrameRole::Error`] role are accepted but leave no line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionLog {
    text: String,
}

impl ExecutionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame
    pub fn record(&mut self, role: FrameRole, frame: &[u8]) {
        if role == FrameRole::Error {
            return;
        }

        let frame = hex::encode_upper(frame);
        trace!(%role, %frame, "Logging frame");
        let _ = writeln!(self.text, "{role}: {frame}");
    }

    /// The log text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether nothing was logged
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Iterate over the logged lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    /// Consume the log, returning its text
    pub fn into_string(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_record_lines() {
        let mut log = ExecutionLog::new();
        log.record(FrameRole::Command, &hex!("00A4040000"));
        log.record(FrameRole::Response, &hex!("9000"));
        log.record(FrameRole::Error, &hex!("6987"));
        log.record(FrameRole::Status, &hex!("9000"));

        assert_eq!(
            log.lines().collect::<Vec<_>>(),
            vec!["Command: 00A4040000", "Response: 9000", "Status: 9000"]
        );
        assert!(log.as_str().ends_with('\n'));
    }

    #[test]
    fn test_error_role_writes_nothing() {
        let mut log = ExecutionLog::new();
        log.record(FrameRole::Error, &hex!("6F00"));
        assert!(log.is_empty());
    }
}
