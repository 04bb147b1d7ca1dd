//! Scripted secure element and script builders shared by the integration tests
#![allow(dead_code, unreachable_pub)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use sems::{
    SeChannel, SeRelay,
    constants::{aid, tags},
    delay::Sleeper,
    tlv::TlvNode,
};
use sems_apdu_core::{Error, Result};

pub const ROOT_KEY_ID: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
pub const SECOND_ROOT_KEY_ID: [u8; 8] = [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18];

#[derive(Debug, Default)]
struct CardState {
    opened: Vec<Bytes>,
    commands: Vec<Bytes>,
    select_responses: HashMap<Vec<u8>, Bytes>,
    responses: HashMap<Vec<u8>, VecDeque<Result<Bytes>>>,
    stall: Option<(Vec<u8>, Receiver<()>)>,
    closed: usize,
}

/// Secure element answering from a table of canned responses
///
/// Every SELECT succeeds with the test trust anchors unless overridden,
/// every other command answers `90 00` unless a response was queued for it.
/// Clones share state so a test can inspect the traffic after a run.
#[derive(Debug, Clone, Default)]
pub struct MockCard {
    state: Arc<Mutex<CardState>>,
}

impl MockCard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for an exact command
    pub fn respond(&self, command: &[u8], response: &[u8]) -> &Self {
        self.state
            .lock()
            .responses
            .entry(command.to_vec())
            .or_default()
            .push_back(Ok(Bytes::copy_from_slice(response)));
        self
    }

    /// Make an exact command fail at the transport level
    pub fn fail(&self, command: &[u8]) -> &Self {
        self.state
            .lock()
            .responses
            .entry(command.to_vec())
            .or_default()
            .push_back(Err(Error::Transmission));
        self
    }

    /// Override the SELECT response for `aid`
    pub fn on_select(&self, aid: &[u8], response: &[u8]) -> &Self {
        self.state
            .lock()
            .select_responses
            .insert(aid.to_vec(), Bytes::copy_from_slice(response));
        self
    }

    /// Block when `command` is transmitted until `release` yields
    pub fn stall_on(&self, command: &[u8], release: Receiver<()>) -> &Self {
        self.state.lock().stall = Some((command.to_vec(), release));
        self
    }

    pub fn opened(&self) -> Vec<Bytes> {
        self.state.lock().opened.clone()
    }

    pub fn commands(&self) -> Vec<Bytes> {
        self.state.lock().commands.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    pub fn sent(&self, command: &[u8]) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|sent| sent.as_ref() == command)
            .count()
    }
}

impl SeChannel for MockCard {
    fn open(&mut self, aid: &[u8]) -> Result<Bytes> {
        let mut state = self.state.lock();
        state.opened.push(Bytes::copy_from_slice(aid));
        Ok(state
            .select_responses
            .get(aid)
            .cloned()
            .unwrap_or_else(|| Bytes::from(select_response(&ROOT_KEY_ID, &SECOND_ROOT_KEY_ID))))
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        let stall = {
            let mut state = self.state.lock();
            state.commands.push(Bytes::copy_from_slice(command));
            state
                .stall
                .as_ref()
                .filter(|(stalled, _)| stalled.as_slice() == command)
                .map(|(_, release)| release.clone())
        };
        if let Some(release) = stall {
            let _ = release.recv();
        }

        self.state
            .lock()
            .responses
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Bytes::from_static(&[0x90, 0x00])))
    }

    fn close(&mut self) -> Result<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

/// External element replying from a queue
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    replies: Arc<Mutex<VecDeque<Bytes>>>,
    requests: Arc<Mutex<Vec<Bytes>>>,
}

impl MockRelay {
    pub fn with_replies(replies: &[&[u8]]) -> Self {
        let relay = Self::default();
        relay
            .replies
            .lock()
            .extend(replies.iter().map(|reply| Bytes::copy_from_slice(reply)));
        relay
    }

    pub fn requests(&self) -> Vec<Bytes> {
        self.requests.lock().clone()
    }
}

impl SeRelay for MockRelay {
    fn relay(&mut self, data: &[u8]) -> Option<Bytes> {
        self.requests.lock().push(Bytes::copy_from_slice(data));
        self.replies.lock().pop_front()
    }
}

/// Sleeper recording each pause and the last command sent before it
#[derive(Debug)]
pub struct RecordingSleeper {
    card: MockCard,
    pub pauses: Mutex<Vec<(Duration, Option<Bytes>)>>,
}

impl RecordingSleeper {
    pub fn new(card: &MockCard) -> Self {
        Self {
            card: card.clone(),
            pauses: Mutex::new(Vec::new()),
        }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        let last = self.card.commands().last().cloned();
        self.pauses.lock().push((duration, last));
    }
}

pub fn select_response(root: &[u8], second: &[u8]) -> Vec<u8> {
    let proprietary = TlvNode::constructed(
        tags::FCI_PROPRIETARY,
        vec![
            TlvNode::primitive(tags::ROOT_KEY_ID, root.to_vec()),
            TlvNode::primitive(tags::SECOND_ROOT_KEY_ID, second.to_vec()),
        ],
    );
    let mut response = TlvNode::constructed(tags::FCI, vec![proprietary])
        .encode()
        .to_vec();
    response.extend_from_slice(&[0x90, 0x00]);
    response
}

/// Certificate with the test anchors, an optional delay hint and
/// `padding` bytes of discretionary data
pub fn certificate(hint: Option<TlvNode>, padding: usize) -> TlvNode {
    let mut children = vec![
        TlvNode::primitive(tags::IDENTITY, vec![0x0A, 0x0B, 0x0C, 0x0D]),
        TlvNode::primitive(tags::ROOT_KEY_ID, ROOT_KEY_ID.to_vec()),
        TlvNode::primitive(tags::SUBJECT_KEY_ID, vec![0x21; 8]),
        TlvNode::primitive(tags::KEY_USAGE, vec![0x00, 0x80]),
        TlvNode::primitive(tags::SECOND_ROOT_KEY_ID, SECOND_ROOT_KEY_ID.to_vec()),
    ];
    children.extend(hint);
    children.push(TlvNode::primitive(tags::DISCRETIONARY_DATA, vec![0x53; padding]));
    children.push(TlvNode::primitive(tags::SIGNATURE, vec![0x5A; 64]));
    children.push(TlvNode::constructed(
        tags::PUBLIC_KEY,
        vec![TlvNode::primitive(tags::PUBLIC_KEY_POINT, vec![0x04; 65])],
    ));
    TlvNode::constructed(tags::CERTIFICATE, children)
}

pub fn delay_hint(ordinal: u8, millis: u16) -> TlvNode {
    TlvNode::constructed(
        tags::DELAY_HINT,
        vec![
            TlvNode::primitive(tags::DELAY_HINT_APP_ID, aid::DELAY_HINT.to_vec()),
            TlvNode::primitive(tags::DELAY_HINT_ORDINAL, vec![ordinal]),
            TlvNode::primitive(tags::DELAY_HINT_MILLIS, millis.to_be_bytes().to_vec()),
        ],
    )
}

/// Authentication frame wrapping `apdu`
pub fn authentication(apdu: &[u8]) -> TlvNode {
    TlvNode::constructed(
        tags::AUTHENTICATION,
        vec![TlvNode::primitive(tags::SECURE_COMMAND, apdu.to_vec())],
    )
}

pub fn command(apdu: &[u8]) -> TlvNode {
    TlvNode::primitive(tags::SECURE_COMMAND, apdu.to_vec())
}

pub fn comment(text: &str) -> TlvNode {
    TlvNode::primitive(tags::COMMENT, text.as_bytes().to_vec())
}

pub fn inner_script_marker() -> TlvNode {
    TlvNode::primitive(tags::INNER_SCRIPT, vec![0x01])
}

pub fn script(frames: &[TlvNode]) -> Vec<u8> {
    frames.iter().flat_map(|frame| frame.encode().to_vec()).collect()
}

/// Encoded certificate upload command carrying the whole certificate
pub fn put_certificate(cert: &TlvNode) -> Vec<u8> {
    sems_apdu_core::Command::new_with_data(0x80, 0xA0, 0x00, 0x00, cert.encode())
        .to_bytes()
        .unwrap()
        .to_vec()
}
