//! Core types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types used to talk to a secure element:
//!
//! - [`Command`] builds ISO/IEC 7816-4 command APDUs (short and extended length)
//! - [`Response`] splits a raw response into payload and [`StatusWord`]
//! - [`CardTransport`] is the raw byte pipe to a card, implemented by concrete readers
//!
//! Everything above this layer (script execution, relaying, persistence) lives in
//! the `sems` crate.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod response;
pub mod transport;

mod error;
pub use error::{Error, Result, ResultExt};

pub use command::Command;
pub use response::status::StatusWord;
pub use response::{Response, utils};
pub use transport::CardTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Response, Result, response::status::StatusWord,
        transport::CardTransport,
    };
}
