//! Script executor
//!
//! A run walks a fixed sequence of protocol states. Each state performs one
//! step against the channel and reports what it observed as a [`Step`];
//! [`transition`] alone decides the next state and where the frame cursor
//! moves. A run never returns an error: whatever ends it is folded into the
//! final status word of the [`ExecutionReport`].

use std::{fmt, sync::Arc};

use bytes::Bytes;
use derive_more::Display;
use sems_apdu_core::{Command, Response, StatusWord};
use tracing::{debug, info, instrument, warn};

use crate::{
    certificate::{Certificate, TrustAnchors},
    channel::{self, SeChannel, SeRelay},
    config::{DigestAlgorithm, SemsConfig},
    constants::{cla, ins, status, tags},
    delay::{DelayHint, DelayInspector, Sleeper},
    error::ScriptError,
    log::{ExecutionLog, FrameRole},
    storage::CallerIdentity,
    tlv::{self, TlvNode},
};

/// Callback deciding whether a run may proceed past the first SELECT
pub type AuthGate = Arc<dyn Fn(&CallerIdentity) -> bool + Send + Sync>;

/// Protocol states of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum State {
    /// Select the on-card application and read its trust anchors
    Select,
    /// Register the caller identity digest
    StoreIdentity,
    /// Locate and upload the matching certificate
    CheckCertificate,
    /// Send the authentication frame
    VerifySignature,
    /// Stream secure commands
    ProcessSecureCommands,
    /// Run finished successfully
    Completed,
    /// Run aborted
    Failed,
}

impl State {
    /// Whether no further steps follow
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome code reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u8)]
pub enum Outcome {
    /// `90 00`
    #[display("success")]
    Success = 0,
    /// `69 87`
    #[display("script processing error")]
    ScriptProcessingError = 1,
    /// `6F 00`
    #[display("I/O error")]
    IoError = 2,
    /// Any other status word
    #[display("unknown")]
    Unknown = 3,
}

impl Outcome {
    /// Map a final status word to its outcome
    pub const fn from_status(status: StatusWord) -> Self {
        match status {
            status::SUCCESS => Self::Success,
            status::SCRIPT_ERROR => Self::ScriptProcessingError,
            status::IO_ERROR => Self::IoError,
            _ => Self::Unknown,
        }
    }

    /// Numeric outcome code
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Position of a run within the script frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Next frame to look at
    pub position: usize,
    /// An inner script marker was seen since the last resumption
    pub inner_script: bool,
}

impl Cursor {
    const fn advance(self) -> Self {
        Self {
            position: self.position + 1,
            ..self
        }
    }

    const fn resume_at(index: usize) -> Self {
        Self {
            position: index,
            inner_script: false,
        }
    }
}

/// What a state observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Application selected and anchors extracted
    Selected,
    /// Identity digest accepted
    IdentityStored,
    /// Certificate uploaded, authentication frame at the given index
    CertificateUploaded {
        /// Index of the authentication frame
        authentication: usize,
    },
    /// Authentication accepted, secure commands start at `next`
    SignatureVerified {
        /// Index of the first frame to process
        next: usize,
    },
    /// Secure command accepted
    CommandAccepted,
    /// Comment frame skipped
    CommentSkipped,
    /// Inner script marker skipped
    InnerScriptMarker,
    /// Card asked to continue on another application
    SwitchRequested {
        /// Whether frames follow the current one
        remaining: bool,
    },
    /// Original application re-selected after an inner script
    Resumed,
    /// No frames left
    EndOfScript {
        /// Status word of the last exchange
        status: StatusWord,
    },
    /// Run aborted
    Aborted(ScriptError),
}

/// Result of [`transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Next state
    pub state: State,
    /// Cursor after the step
    pub cursor: Cursor,
    /// Final status word when the run ends
    pub terminal: Option<StatusWord>,
}

/// Transition function of the run state machine
pub fn transition(state: State, step: &Step, cursor: Cursor) -> Transition {
    use State::*;

    let (state, cursor, terminal) = match (state, step) {
        (_, Step::Aborted(error)) => (Failed, cursor, Some(error.final_status())),
        (Select, Step::Selected) => (StoreIdentity, cursor, None),
        (StoreIdentity, Step::IdentityStored) => (CheckCertificate, cursor, None),
        (CheckCertificate, Step::CertificateUploaded { authentication }) => (
            VerifySignature,
            Cursor {
                position: *authentication,
                ..cursor
            },
            None,
        ),
        (VerifySignature, Step::SignatureVerified { next }) => (
            ProcessSecureCommands,
            Cursor {
                position: *next,
                inner_script: false,
                ..cursor
            },
            None,
        ),
        (ProcessSecureCommands, Step::CommandAccepted | Step::CommentSkipped) => {
            (ProcessSecureCommands, cursor.advance(), None)
        }
        (ProcessSecureCommands, Step::InnerScriptMarker) => (
            ProcessSecureCommands,
            Cursor {
                inner_script: true,
                ..cursor.advance()
            },
            None,
        ),
        (ProcessSecureCommands, Step::SwitchRequested { remaining: true }) => {
            (Select, Cursor::resume_at(cursor.position + 1), None)
        }
        (ProcessSecureCommands, Step::SwitchRequested { remaining: false }) => (
            Completed,
            Cursor::resume_at(cursor.position + 1),
            Some(status::SUCCESS),
        ),
        (ProcessSecureCommands, Step::Resumed) => {
            (StoreIdentity, Cursor::resume_at(cursor.position), None)
        }
        (ProcessSecureCommands, Step::EndOfScript { status }) if status.is_success() => {
            (Completed, cursor, Some(*status))
        }
        (ProcessSecureCommands, Step::EndOfScript { status }) => (Failed, cursor, Some(*status)),
        (state, step) => {
            warn!(%state, ?step, "Step does not belong to state");
            (Failed, cursor, Some(status::SCRIPT_ERROR))
        }
    };

    Transition {
        state,
        cursor,
        terminal,
    }
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Terminal state
    pub state: State,
    /// Final status word
    pub status: StatusWord,
    /// Outcome derived from the status word
    pub outcome: Outcome,
    /// Exchange log, ending with the final status
    pub log: ExecutionLog,
}

/// Per-run context
#[derive(Debug)]
struct Run {
    frames: Vec<TlvNode>,
    identity: CallerIdentity,
    aid: Option<Vec<u8>>,
    original_aid: Option<Vec<u8>>,
    anchors: Option<TrustAnchors>,
    /// Certificate and authentication frame indices of the current session
    selected: Option<(usize, usize)>,
    /// Frame to continue at once a reused certificate is verified
    resume_at: Option<usize>,
    gate_passed: bool,
    last_status: StatusWord,
    log: ExecutionLog,
}

struct Located {
    certificate: usize,
    authentication: usize,
    resume_at: Option<usize>,
}

/// Plays scripts against a secure element
pub struct ScriptExecutor<'a> {
    channel: &'a mut dyn SeChannel,
    relay: &'a mut dyn SeRelay,
    sleeper: &'a dyn Sleeper,
    config: &'a SemsConfig,
    digest: DigestAlgorithm,
    auth_gate: Option<AuthGate>,
    delay: DelayInspector,
}

impl fmt::Debug for ScriptExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("channel", &self.channel)
            .field("relay", &self.relay)
            .field("digest", &self.digest)
            .field("auth_gate", &self.auth_gate.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> ScriptExecutor<'a> {
    /// Create an executor over the given collaborators
    pub fn new(
        channel: &'a mut dyn SeChannel,
        relay: &'a mut dyn SeRelay,
        sleeper: &'a dyn Sleeper,
        config: &'a SemsConfig,
    ) -> Self {
        Self {
            channel,
            relay,
            sleeper,
            config,
            digest: config.digest,
            auth_gate: None,
            delay: DelayInspector::new(),
        }
    }

    /// Override the identity digest algorithm
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Install an authentication gate
    pub fn with_auth_gate(mut self, gate: Option<AuthGate>) -> Self {
        self.auth_gate = gate;
        self
    }

    /// Play `script` for `identity`, starting on `aid` or the primary application
    ///
    /// The channel is closed and the final status appended to the log no
    /// matter how the run ends.
    #[instrument(skip_all, fields(identity = %identity, len = script.len()))]
    pub fn run(
        &mut self,
        script: &[u8],
        identity: &CallerIdentity,
        aid: Option<&[u8]>,
    ) -> ExecutionReport {
        let mut run = Run {
            frames: tlv::decode_with(script, &[tags::INNER_SCRIPT]),
            identity: identity.clone(),
            aid: aid.map(<[u8]>::to_vec),
            original_aid: None,
            anchors: None,
            selected: None,
            resume_at: None,
            gate_passed: false,
            last_status: status::SUCCESS,
            log: ExecutionLog::new(),
        };
        self.delay.reset();
        debug!(frames = run.frames.len(), "Decoded script");

        let mut state = State::Select;
        let mut cursor = Cursor::default();
        let mut terminal = None;

        while terminal.is_none() && !state.is_terminal() {
            let step = match state {
                State::Select => self.select(&mut run),
                State::StoreIdentity => self.store_identity(&mut run),
                State::CheckCertificate => self.check_certificate(&mut run, cursor),
                State::VerifySignature => self.verify_signature(&mut run, cursor),
                State::ProcessSecureCommands => self.process_frame(&mut run, cursor),
                State::Completed | State::Failed => break,
            }
            .unwrap_or_else(Step::Aborted);

            if let Step::Aborted(error) = &step {
                warn!(%state, %error, "Script aborted");
                run.log
                    .record(FrameRole::Error, &error.final_status().to_bytes());
            }

            let next = transition(state, &step, cursor);
            debug!(
                from = %state,
                to = %next.state,
                position = next.cursor.position,
                "Transition"
            );
            state = next.state;
            cursor = next.cursor;
            terminal = next.terminal;
        }

        let status = terminal.unwrap_or(run.last_status);
        if let Err(e) = self.channel.close() {
            warn!(error = %e, "Failed to close channel");
        }
        run.log.record(FrameRole::Status, &status.to_bytes());

        let outcome = Outcome::from_status(status);
        info!(%status, %outcome, "Script run finished");

        ExecutionReport {
            state,
            status,
            outcome,
            log: run.log,
        }
    }

    fn select(&mut self, run: &mut Run) -> Result<Step, ScriptError> {
        let mut last = status::SCRIPT_ERROR;

        for aid in self.config.candidate_aids(run.aid.as_deref()) {
            let response = self.open(run, &aid)?;
            if !response.is_success() {
                debug!(
                    aid = %hex::encode_upper(&aid),
                    status = %response.status(),
                    "Application not selectable"
                );
                last = response.status();
                continue;
            }

            run.anchors = Some(
                TrustAnchors::from_select_response(response.payload())
                    .ok_or(ScriptError::MissingTrustAnchors)?,
            );
            run.original_aid.get_or_insert_with(|| aid.clone());
            run.aid = Some(aid);

            if !run.gate_passed {
                if let Some(gate) = &self.auth_gate
                    && !gate(&run.identity)
                {
                    return Err(ScriptError::AuthenticationDenied);
                }
                run.gate_passed = true;
            }

            return Ok(Step::Selected);
        }

        Err(ScriptError::Protocol {
            state: State::Select,
            status: last,
        })
    }

    fn store_identity(&mut self, run: &mut Run) -> Result<Step, ScriptError> {
        let digest = self.digest.digest(run.identity.as_str().as_bytes());
        let command = Command::new_with_data(
            cla::PROPRIETARY,
            ins::STORE_IDENTITY,
            0x00,
            0x00,
            digest,
        );

        let response = self.exchange(run, &command.to_bytes()?)?;
        if !response.is_success() {
            return Err(ScriptError::Protocol {
                state: State::StoreIdentity,
                status: response.status(),
            });
        }
        Ok(Step::IdentityStored)
    }

    fn locate_certificate(&self, run: &Run, cursor: Cursor) -> Result<Located, ScriptError> {
        let anchors = run
            .anchors
            .as_ref()
            .ok_or(ScriptError::MissingTrustAnchors)?;

        for (index, frame) in run.frames.iter().enumerate().skip(cursor.position) {
            match frame.tag() {
                tags::COMMENT | tags::INNER_SCRIPT => {}
                tags::CERTIFICATE => {
                    let usable = Certificate::from_node(frame)
                        .is_some_and(|cert| cert.is_complete() && cert.matches(anchors));
                    if usable {
                        return Ok(Located {
                            certificate: index,
                            authentication: index + 1,
                            resume_at: None,
                        });
                    }
                    debug!(index, "Skipping certificate not usable on this card");
                }
                tags::SECURE_COMMAND => {
                    // Resumed segment without its own certificate
                    let (certificate, authentication) = run
                        .selected
                        .ok_or(ScriptError::Malformed("secure command before certificate"))?;
                    return Ok(Located {
                        certificate,
                        authentication,
                        resume_at: Some(index),
                    });
                }
                _ => return Err(ScriptError::Malformed("unexpected frame before certificate")),
            }
        }

        Err(ScriptError::Malformed("no matching certificate"))
    }

    fn check_certificate(&mut self, run: &mut Run, cursor: Cursor) -> Result<Step, ScriptError> {
        let located = self.locate_certificate(run, cursor)?;
        let certificate = Certificate::from_node(&run.frames[located.certificate])
            .ok_or(ScriptError::Malformed("certificate frame"))?;

        self.delay
            .arm(certificate.delay_hint().and_then(DelayHint::from_node));

        let fragments = certificate.fragments();
        let count = fragments.len();
        debug!(index = located.certificate, count, "Uploading certificate");

        for (index, fragment) in fragments.into_iter().enumerate() {
            let mut command = Command::new_with_data(
                cla::PROPRIETARY,
                ins::PUT_CERTIFICATE,
                0x00,
                0x00,
                fragment,
            );
            if index + 1 < count {
                command = command.chained();
            }

            let response = self.exchange(run, &command.to_bytes()?)?;
            if !response.is_success() {
                return Err(ScriptError::Rejected(response.status()));
            }
        }

        run.selected = Some((located.certificate, located.authentication));
        run.resume_at = located.resume_at;
        Ok(Step::CertificateUploaded {
            authentication: located.authentication,
        })
    }

    fn verify_signature(&mut self, run: &mut Run, cursor: Cursor) -> Result<Step, ScriptError> {
        let command = run
            .frames
            .get(cursor.position)
            .filter(|frame| frame.tag() == tags::AUTHENTICATION)
            .ok_or(ScriptError::Malformed("missing authentication frame"))?
            .children()
            .and_then(<[TlvNode]>::first)
            .map(|apdu| apdu.value().clone())
            .ok_or(ScriptError::Malformed("empty authentication frame"))?;

        self.delay.before_authentication(self.sleeper);
        let response = self.exchange_relayed(run, &command)?;

        match response.status() {
            status::SUCCESS | status::PARTIAL_SUCCESS => Ok(Step::SignatureVerified {
                next: run.resume_at.take().unwrap_or(cursor.position + 1),
            }),
            sw => Err(ScriptError::Protocol {
                state: State::VerifySignature,
                status: sw,
            }),
        }
    }

    fn process_frame(&mut self, run: &mut Run, cursor: Cursor) -> Result<Step, ScriptError> {
        let Some(frame) = run.frames.get(cursor.position) else {
            return Ok(Step::EndOfScript {
                status: run.last_status,
            });
        };

        let tag = frame.tag();
        if cursor.inner_script && tag != tags::COMMENT && tag != tags::INNER_SCRIPT {
            return self.resume(run);
        }

        match tag {
            tags::SECURE_COMMAND => {
                let command = frame.value().clone();
                self.delay.before_command(self.sleeper);
                let response = self.exchange_relayed(run, &command)?;

                match response.status() {
                    status::SUCCESS | status::PARTIAL_SUCCESS => Ok(Step::CommandAccepted),
                    status::SWITCH_REQUIRED => self.switch(run, cursor, response.payload()),
                    sw => Err(ScriptError::Rejected(sw)),
                }
            }
            tags::COMMENT => Ok(Step::CommentSkipped),
            tags::INNER_SCRIPT => Ok(Step::InnerScriptMarker),
            _ => Err(ScriptError::Malformed("unexpected frame among secure commands")),
        }
    }

    fn switch(
        &mut self,
        run: &mut Run,
        cursor: Cursor,
        payload: &Bytes,
    ) -> Result<Step, ScriptError> {
        let nodes = tlv::decode(payload);
        let aid = tlv::find(&nodes, tags::AID)
            .map_or_else(|| payload.clone(), |node| node.value().clone());
        if aid.is_empty() {
            return Err(ScriptError::Malformed("switch without target application"));
        }

        let remaining = cursor.position + 1 < run.frames.len();
        info!(aid = %hex::encode_upper(&aid), remaining, "Card requested application switch");

        if remaining {
            run.aid = Some(aid.to_vec());
            run.selected = None;
            return Ok(Step::SwitchRequested { remaining });
        }

        let original = self.original_aid(run);
        let response = self.open(run, &original)?;
        if !response.is_success() {
            return Err(ScriptError::Protocol {
                state: State::Select,
                status: response.status(),
            });
        }
        Ok(Step::SwitchRequested { remaining })
    }

    fn resume(&mut self, run: &mut Run) -> Result<Step, ScriptError> {
        let original = self.original_aid(run);
        info!(aid = %hex::encode_upper(&original), "Resuming after inner script");

        let response = self.open(run, &original)?;
        if !response.is_success() {
            return Err(ScriptError::Protocol {
                state: State::Select,
                status: response.status(),
            });
        }

        run.anchors = Some(
            TrustAnchors::from_select_response(response.payload())
                .ok_or(ScriptError::MissingTrustAnchors)?,
        );
        run.aid = Some(original);
        Ok(Step::Resumed)
    }

    fn original_aid(&self, run: &Run) -> Vec<u8> {
        run.original_aid
            .clone()
            .unwrap_or_else(|| self.config.primary_aid.clone())
    }

    fn open(&mut self, run: &mut Run, aid: &[u8]) -> Result<Response, ScriptError> {
        run.log
            .record(FrameRole::Command, &channel::select_command(aid)?);
        let raw = self.channel.open(aid)?;
        self.record_response(run, raw)
    }

    fn exchange(&mut self, run: &mut Run, command: &[u8]) -> Result<Response, ScriptError> {
        run.log.record(FrameRole::Command, command);
        let raw = self.channel.transmit(command)?;
        self.record_response(run, raw)
    }

    /// Exchange a command, relaying through the external element for as
    /// long as the card asks for it
    fn exchange_relayed(
        &mut self,
        run: &mut Run,
        command: &[u8],
    ) -> Result<Response, ScriptError> {
        let mut response = self.exchange(run, command)?;

        while response.status() == status::FORWARD_TO_SE {
            let reply = self
                .relay
                .relay(response.payload())
                .ok_or(ScriptError::RelayFailed)?;
            debug!(len = reply.len(), "Relaying external element reply");

            let command = Command::new_with_data(
                cla::PROPRIETARY,
                ins::PROCESS_SE_RESPONSE,
                0x00,
                0x00,
                reply,
            );
            response = self.exchange(run, &command.to_bytes()?)?;
        }

        Ok(response)
    }

    fn record_response(&self, run: &mut Run, raw: Bytes) -> Result<Response, ScriptError> {
        run.log.record(FrameRole::Response, &raw);
        let response = Response::from_bytes(&raw)?;
        run.last_status = response.status();
        Ok(response)
    }
}
