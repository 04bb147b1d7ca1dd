//! PC/SC transport for APDU operations
//!
//! This crate implements [`sems_apdu_core::CardTransport`] on top of the PC/SC API
//! so scripts can be played against a secure element sitting in a reader.
//!
//! ```no_run
//! use sems_apdu_core::CardTransport;
//! use sems_apdu_transport_pcsc::{PcscConfig, PcscDeviceManager, ReaderSelection};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PcscDeviceManager::new()?;
//! let mut transport = manager.connect(&ReaderSelection::AnyCard, PcscConfig::default())?;
//! let response = transport.transmit_raw(&[0x00, 0xA4, 0x04, 0x00, 0x00])?;
//! println!("{}", hex::encode(response));
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod reader;
mod transport;
mod util;

pub use config::{PcscConfig, ReaderSelection, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;
pub use transport::PcscTransport;
