//! Utility functions for APDU response handling

use tracing::debug;

use crate::response::status::StatusWord;
use crate::{Error, Result};

/// Split raw response data into its status word and payload
///
/// # Errors
/// Returns an error if the data is too short to contain a status word.
pub fn extract_status_and_payload(data: &[u8]) -> Result<(StatusWord, &[u8])> {
    if data.len() < 2 {
        debug!("Response too short: {} bytes", data.len());
        return Err(Error::IncompleteResponse(data.len()));
    }

    let (payload, sw) = data.split_at(data.len() - 2);
    Ok((StatusWord::new(sw[0], sw[1]), payload))
}
