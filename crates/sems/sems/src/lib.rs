//! Secure-element management script engine
//!
//! Plays signed administration scripts against a secure element: the on-card
//! script processor is selected, the caller identity registered, the matching
//! certificate uploaded and the authentication frame verified before the
//! secure commands of the script are streamed to the card.
//!
//! - [`tlv`] decodes and encodes the BER-TLV frames scripts are made of
//! - [`executor`] is the protocol state machine
//! - [`agent`] runs scripts on worker threads and answers status queries
//! - [`channel`] and [`storage`] are the seams to the card and to persistence
//!
//! ```no_run
//! use sems::{MemoryStorage, ScriptRequest, SemsAgent, channel::CardChannel};
//! # fn run<T: sems_apdu_core::CardTransport + 'static>(transport: T) -> sems::Result<()> {
//! let agent = SemsAgent::builder(CardChannel::new(transport), MemoryStorage::new()).build();
//! let completion = agent.execute_blocking(
//!     ScriptRequest::buffer("update", vec![0x41, 0x00]).with_caller("com.example.wallet"),
//! )?;
//! println!("outcome {}", completion.outcome.code());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

pub mod agent;
pub mod certificate;
pub mod channel;
pub mod config;
pub mod constants;
pub mod delay;
pub mod executor;
pub mod log;
pub mod storage;
pub mod tlv;

mod error;
pub use error::{Error, Result, ScriptError};

pub use agent::{Completion, LastExecutionStatus, ScriptRequest, ScriptSource, SemsAgent};
pub use channel::{SeChannel, SeRelay};
pub use config::{DigestAlgorithm, SemsConfig};
pub use executor::{ExecutionReport, Outcome, ScriptExecutor, State};
pub use storage::{CallerIdentity, FileStorage, MemoryStorage, ScriptStorage};
