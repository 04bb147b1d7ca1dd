//! Constants used by the script protocol
//!
//! Command classes, instruction codes, frame tags, status words and the
//! application identifiers of the on-card script processor.

use sems_apdu_core::StatusWord;

/// Command classes
pub mod cla {
    /// ISO7816 command class
    pub const ISO7816: u8 = 0x00;
    /// Proprietary command class
    pub const PROPRIETARY: u8 = 0x80;
}

/// Instruction codes
pub mod ins {
    /// SELECT command
    pub const SELECT: u8 = 0xA4;
    /// Register the caller identity digest
    pub const STORE_IDENTITY: u8 = 0xE2;
    /// Upload a certificate fragment
    pub const PUT_CERTIFICATE: u8 = 0xA0;
    /// Hand an external secure element reply back to the card
    pub const PROCESS_SE_RESPONSE: u8 = 0xA2;
    /// GET DATA command
    pub const GET_DATA: u8 = 0xCA;
}

/// Parameter values for SELECT command (P1)
pub mod select_p1 {
    /// Select by DF name
    pub const BY_NAME: u8 = 0x04;
}

/// Script and certificate tags
pub mod tags {
    use crate::tlv::Tag;

    /// Certificate frame
    pub const CERTIFICATE: Tag = 0x7F21;
    /// Authentication frame
    pub const AUTHENTICATION: Tag = 0x60;
    /// Secure command frame
    pub const SECURE_COMMAND: Tag = 0x40;
    /// Inert comment frame
    pub const COMMENT: Tag = 0x41;
    /// Inner script delimiter
    pub const INNER_SCRIPT: Tag = 0x7F20;

    /// Certificate holder identity
    pub const IDENTITY: Tag = 0x93;
    /// Root entity key identifier
    pub const ROOT_KEY_ID: Tag = 0x42;
    /// Subject key identifier
    pub const SUBJECT_KEY_ID: Tag = 0x5F20;
    /// Key usage
    pub const KEY_USAGE: Tag = 0x95;
    /// Second root entity key identifier
    pub const SECOND_ROOT_KEY_ID: Tag = 0x45;
    /// Discretionary data
    pub const DISCRETIONARY_DATA: Tag = 0x53;
    /// Signature block
    pub const SIGNATURE: Tag = 0x5F37;
    /// Public key block
    pub const PUBLIC_KEY: Tag = 0x7F49;
    /// Public key point inside the public key block
    pub const PUBLIC_KEY_POINT: Tag = 0x86;

    /// Delay hint structure
    pub const DELAY_HINT: Tag = 0x73;
    /// Delay hint application identifier
    pub const DELAY_HINT_APP_ID: Tag = 0x5C;
    /// Ordinal of the command to delay
    pub const DELAY_HINT_ORDINAL: Tag = 0x5D;
    /// Delay in milliseconds
    pub const DELAY_HINT_MILLIS: Tag = 0x5E;

    /// File control information template
    pub const FCI: Tag = 0x6F;
    /// Proprietary FCI template
    pub const FCI_PROPRIETARY: Tag = 0xA5;
    /// Application identifier
    pub const AID: Tag = 0x4F;

    /// Signature of the last executed script
    pub const LAST_SIGNATURE: Tag = 0x46;
    /// Status of the last executed script
    pub const LAST_STATUS: Tag = 0x47;
}

/// Status words with a protocol meaning
pub mod status {
    use super::StatusWord;

    /// Success
    pub const SUCCESS: StatusWord = StatusWord::SUCCESS;
    /// Card asks for the payload to be forwarded to the external secure element
    pub const FORWARD_TO_SE: StatusWord = StatusWord::new(0x63, 0x10);
    /// Card asks to continue on another application
    pub const SWITCH_REQUIRED: StatusWord = StatusWord::new(0x63, 0x20);
    /// Command partially succeeded, script continues
    pub const PARTIAL_SUCCESS: StatusWord = StatusWord::new(0x63, 0x30);
    /// Script processing error
    pub const SCRIPT_ERROR: StatusWord = StatusWord::new(0x69, 0x87);
    /// Authentication gate denied the run
    pub const SECURITY_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    /// Transport or I/O error
    pub const IO_ERROR: StatusWord = StatusWord::new(0x6F, 0x00);
}

/// Application identifiers
pub mod aid {
    /// Script processor application
    pub const PRIMARY: [u8; 15] = [
        0xA0, 0x00, 0x00, 0x03, 0x96, 0x54, 0x53, 0x00, 0x00, 0x00, 0x01, 0x03, 0x30, 0x00, 0x00,
    ];
    /// Updater application, tried when the primary cannot be selected
    pub const UPDATER: [u8; 15] = [
        0xA0, 0x00, 0x00, 0x03, 0x96, 0x54, 0x53, 0x00, 0x00, 0x00, 0x01, 0x03, 0x31, 0x00, 0x00,
    ];
    /// Application identifier a delay hint must carry to be honored
    pub const DELAY_HINT: [u8; 12] = [
        0xA0, 0x00, 0x00, 0x03, 0x96, 0x54, 0x53, 0x00, 0x00, 0x00, 0x01, 0x04,
    ];
}

/// Largest data field of a short APDU
pub const MAX_FRAME: usize = sems_apdu_core::command::SHORT_MAX_DATA;

/// Encoded size of the signature block (`5F37 40` followed by 64 bytes)
pub const SIGNATURE_BLOCK_LEN: usize = 3 + 64;

/// Encoded size of the public key block (`7F49 43 86 41` followed by 65 bytes)
pub const PUBLIC_KEY_BLOCK_LEN: usize = 5 + 65;
