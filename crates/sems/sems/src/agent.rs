//! Entry points for callers
//!
//! [`SemsAgent`] owns the collaborators of the engine and starts every run on
//! its own worker thread. Only one run should be in flight at a time: the
//! channel lock serializes runs but nothing queues or rejects a second one.

use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use sems_apdu_core::{Response, StatusWord};
use tracing::{debug, info, instrument, warn};

use crate::{
    Error, Result,
    channel::{NoRelay, SeChannel, SeRelay},
    config::{DigestAlgorithm, SemsConfig},
    constants::{cla, ins, status, tags},
    delay::{Sleeper, ThreadSleeper},
    executor::{AuthGate, ExecutionReport, Outcome, ScriptExecutor},
    storage::{CallerIdentity, ScriptStorage},
    tlv,
};

/// Where the script of a run comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Raw script bytes
    Buffer(Bytes),
    /// Script stored under a name
    Stored(String),
}

/// A request to run a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Name under which input and output are stored
    pub name: String,
    /// Script to run
    pub source: ScriptSource,
    /// Caller the run is performed for
    pub caller: String,
    /// Application to start on instead of the primary one
    pub aid: Option<Bytes>,
    /// Whether the completion carries the exchange log
    pub include_log: bool,
}

impl ScriptRequest {
    /// Run raw script bytes
    pub fn buffer(name: impl Into<String>, script: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            source: ScriptSource::Buffer(script.into()),
            caller: String::new(),
            aid: None,
            include_log: false,
        }
    }

    /// Run a stored script
    pub fn stored(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: ScriptSource::Stored(name.clone()),
            name,
            caller: String::new(),
            aid: None,
            include_log: false,
        }
    }

    /// Set the caller
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = caller.into();
        self
    }

    /// Start on `aid`
    pub fn with_aid(mut self, aid: impl Into<Bytes>) -> Self {
        self.aid = Some(aid.into());
        self
    }

    /// Deliver the exchange log with the completion
    pub const fn with_log(mut self) -> Self {
        self.include_log = true;
        self
    }
}

/// Delivered when a run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Outcome code
    pub outcome: Outcome,
    /// Final status word
    pub status: StatusWord,
    /// Exchange log, when requested
    pub log: Option<String>,
}

impl Completion {
    fn aborted(error: &Error) -> Self {
        let status = error.status();
        Self {
            outcome: Outcome::from_status(status),
            status,
            log: None,
        }
    }
}

/// Result of the last script the card processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastExecutionStatus {
    /// Hex encoded signature of the last script, if the card reported one
    pub signature: Option<String>,
    /// Whether that script succeeded
    pub succeeded: bool,
}

/// Collaborators shared by every run
struct SharedContext {
    channel: Mutex<Box<dyn SeChannel>>,
    relay: Mutex<Box<dyn SeRelay>>,
    storage: Mutex<Box<dyn ScriptStorage>>,
    sleeper: Arc<dyn Sleeper>,
    config: SemsConfig,
    digest: Mutex<DigestAlgorithm>,
    auth_gate: Option<AuthGate>,
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("config", &self.config)
            .field("digest", &*self.digest.lock())
            .field("auth_gate", &self.auth_gate.is_some())
            .finish_non_exhaustive()
    }
}

impl SharedContext {
    #[instrument(skip_all, fields(name = %request.name))]
    fn run(&self, request: ScriptRequest) -> Completion {
        let (identity, script) = {
            let mut storage = self.storage.lock();
            let prepared = storage.prepare(&request.caller).and_then(|identity| {
                let script = match &request.source {
                    ScriptSource::Buffer(script) => script.clone(),
                    ScriptSource::Stored(name) => storage.read_script(name)?,
                };
                Ok((identity, script))
            });

            match prepared {
                Ok((identity, script)) => {
                    if let Err(e) = storage.write_input(&request.name, &script) {
                        warn!(error = %e, "Failed to archive script input");
                    }
                    (identity, script)
                }
                Err(e) => {
                    warn!(error = %e, "Script could not be prepared");
                    return Completion::aborted(&e);
                }
            }
        };

        let report = {
            let mut channel = self.channel.lock();
            let mut relay = self.relay.lock();
            let digest = *self.digest.lock();

            ScriptExecutor::new(&mut **channel, &mut **relay, &*self.sleeper, &self.config)
                .with_digest(digest)
                .with_auth_gate(self.auth_gate.clone())
                .run(&script, &identity, request.aid.as_deref())
        };

        let ExecutionReport {
            status,
            outcome,
            log,
            ..
        } = report;

        if let Err(e) = self.storage.lock().write_output(&request.name, log.as_str().as_bytes()) {
            warn!(error = %e, "Failed to store execution log");
        }

        Completion {
            outcome,
            status,
            log: request.include_log.then(|| log.into_string()),
        }
    }

    /// Open the first candidate application answering `90 00`
    fn select_application(&self, channel: &mut dyn SeChannel) -> Result<Vec<u8>> {
        let mut last = status::SCRIPT_ERROR;

        for aid in self.config.candidate_aids(None) {
            let response = Response::from_bytes(&channel.open(&aid)?)?;
            if response.is_success() {
                return Ok(aid);
            }
            debug!(
                aid = %hex::encode_upper(&aid),
                status = %response.status(),
                "Application not selectable"
            );
            last = response.status();
        }

        Err(sems_apdu_core::Error::Status(last).into())
    }

    fn query_last_status(&self, channel: &mut dyn SeChannel) -> Result<LastExecutionStatus> {
        let aid = self.select_application(channel)?;
        debug!(aid = %hex::encode_upper(&aid), "Querying last execution status");

        let signature = get_data(channel, tags::LAST_SIGNATURE)?
            .filter(|value| !value.is_empty())
            .map(hex::encode_upper);

        let succeeded = get_data(channel, tags::LAST_STATUS)?
            .is_some_and(|value| value.iter().all(|byte| *byte == 0x00));

        Ok(LastExecutionStatus {
            signature,
            succeeded,
        })
    }
}

/// Read a status object, returning the value of its TLV
///
/// A card answering `90 00` without the TLV yields an empty value, which
/// counts as a successful last run.
fn get_data(channel: &mut dyn SeChannel, tag: tlv::Tag) -> Result<Option<Bytes>> {
    let command = sems_apdu_core::Command::new(cla::PROPRIETARY, ins::GET_DATA, 0x00, tag as u8)
        .with_le(0x00)
        .to_bytes()?;
    let response = Response::from_bytes(&channel.transmit(&command)?)?;
    if !response.is_success() {
        debug!(tag, status = %response.status(), "Status object not available");
        return Ok(None);
    }

    let nodes = tlv::decode(response.payload());
    Ok(Some(
        tlv::find(&nodes, tag).map_or_else(Bytes::new, |node| node.value().clone()),
    ))
}

/// Facade over the script engine
#[derive(Debug, Clone)]
pub struct SemsAgent {
    context: Arc<SharedContext>,
}

impl SemsAgent {
    /// Start building an agent over `channel` and `storage`
    pub fn builder(
        channel: impl SeChannel + 'static,
        storage: impl ScriptStorage + 'static,
    ) -> SemsAgentBuilder {
        SemsAgentBuilder {
            channel: Box::new(channel),
            storage: Box::new(storage),
            relay: Box::new(NoRelay),
            sleeper: Arc::new(ThreadSleeper),
            config: SemsConfig::default(),
            auth_gate: None,
        }
    }

    /// Run a script on a worker thread, handing the result to `callback`
    pub fn execute<F>(&self, request: ScriptRequest, callback: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let handle = thread::Builder::new()
            .name(format!("sems-{}", request.name))
            .spawn(move || callback(context.run(request)))?;
        Ok(handle)
    }

    /// Run a script and wait for its completion
    pub fn execute_blocking(&self, request: ScriptRequest) -> Result<Completion> {
        let (tx, rx) = bounded(1);
        self.execute(request, move |completion| {
            let _ = tx.send(completion);
        })?;
        rx.recv().map_err(|_| Error::WorkerLost)
    }

    /// Execution log stored for `name`
    pub fn output_log(&self, name: &str) -> Result<Option<String>> {
        self.context.storage.lock().read_output(name)
    }

    /// Names of the stored scripts
    pub fn stored_scripts(&self) -> Result<Vec<String>> {
        self.context.storage.lock().list_scripts()
    }

    /// Ask the selectable application about the last script it processed
    pub fn last_execution_status(&self) -> Result<LastExecutionStatus> {
        let mut channel = self.context.channel.lock();
        let result = self.context.query_last_status(&mut **channel);
        if let Err(e) = channel.close() {
            warn!(error = %e, "Failed to close channel");
        }
        if let Ok(status) = &result {
            info!(
                succeeded = status.succeeded,
                signature = ?status.signature,
                "Last execution status"
            );
        }
        result
    }

    /// Digest used for the caller identity
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        *self.context.digest.lock()
    }

    /// Change the digest used for the caller identity
    pub fn set_digest_algorithm(&self, digest: DigestAlgorithm) {
        *self.context.digest.lock() = digest;
    }

    /// Engine configuration
    pub fn config(&self) -> &SemsConfig {
        &self.context.config
    }
}

/// Builder for [`SemsAgent`]
pub struct SemsAgentBuilder {
    channel: Box<dyn SeChannel>,
    storage: Box<dyn ScriptStorage>,
    relay: Box<dyn SeRelay>,
    sleeper: Arc<dyn Sleeper>,
    config: SemsConfig,
    auth_gate: Option<AuthGate>,
}

impl fmt::Debug for SemsAgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemsAgentBuilder")
            .field("channel", &self.channel)
            .field("storage", &self.storage)
            .field("relay", &self.relay)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SemsAgentBuilder {
    /// Relay for commands the card forwards to an external element
    pub fn relay(mut self, relay: impl SeRelay + 'static) -> Self {
        self.relay = Box::new(relay);
        self
    }

    /// Sleeper used for delay hints
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Engine configuration
    pub fn config(mut self, config: SemsConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate consulted once per run after the first SELECT
    pub fn auth_gate<F>(mut self, gate: F) -> Self
    where
        F: Fn(&CallerIdentity) -> bool + Send + Sync + 'static,
    {
        self.auth_gate = Some(Arc::new(gate));
        self
    }

    /// Build the agent
    pub fn build(self) -> SemsAgent {
        let digest = self.config.digest;
        SemsAgent {
            context: Arc::new(SharedContext {
                channel: Mutex::new(self.channel),
                relay: Mutex::new(self.relay),
                storage: Mutex::new(self.storage),
                sleeper: self.sleeper,
                config: self.config,
                digest: Mutex::new(digest),
                auth_gate: self.auth_gate,
            }),
        }
    }
}
