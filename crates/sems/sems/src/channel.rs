//! Channels to the secure element and to the external relay element

use std::fmt;

use bytes::Bytes;
use sems_apdu_core::{CardTransport, Command, Result, ResultExt};
use tracing::{debug, warn};

use crate::constants::{cla, ins, select_p1};

/// Logical channel to the on-card script processor
///
/// Every response includes its trailing status word.
pub trait SeChannel: fmt::Debug + Send {
    /// Open the channel by selecting `aid`, returning the SELECT response
    fn open(&mut self, aid: &[u8]) -> Result<Bytes>;

    /// Send a raw command APDU
    fn transmit(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Close the channel
    fn close(&mut self) -> Result<()>;
}

impl<T: SeChannel + ?Sized> SeChannel for Box<T> {
    fn open(&mut self, aid: &[u8]) -> Result<Bytes> {
        (**self).open(aid)
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).transmit(command)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// External secure element the card may ask to forward data to
pub trait SeRelay: fmt::Debug + Send {
    /// Forward `data`, returning the external element's reply
    ///
    /// `None` means the relay could not produce a reply.
    fn relay(&mut self, data: &[u8]) -> Option<Bytes>;
}

impl<T: SeRelay + ?Sized> SeRelay for Box<T> {
    fn relay(&mut self, data: &[u8]) -> Option<Bytes> {
        (**self).relay(data)
    }
}

/// SELECT by name command for `aid`
pub fn select_command(aid: &[u8]) -> Result<Bytes> {
    Command::new_with_data(
        cla::ISO7816,
        ins::SELECT,
        select_p1::BY_NAME,
        0x00,
        Bytes::copy_from_slice(aid),
    )
    .with_le(0x00)
    .to_bytes()
}

/// [`SeChannel`] over any [`CardTransport`]
#[derive(Debug)]
pub struct CardChannel<T: CardTransport> {
    transport: T,
    selected: Option<Bytes>,
}

impl<T: CardTransport> CardChannel<T> {
    /// Wrap a transport
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            selected: None,
        }
    }

    /// The AID selected by the last successful open
    pub fn selected(&self) -> Option<&[u8]> {
        self.selected.as_deref()
    }

    /// Get a reference to the underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Unwrap the transport
    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: CardTransport> SeChannel for CardChannel<T> {
    fn open(&mut self, aid: &[u8]) -> Result<Bytes> {
        debug!(aid = %hex::encode_upper(aid), "Opening channel");
        let response = self
            .transport
            .transmit_raw(&select_command(aid)?)
            .context(format!("SELECT {}", hex::encode_upper(aid)))?;
        self.selected = Some(Bytes::copy_from_slice(aid));
        Ok(response)
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        self.transport.transmit_raw(command)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(aid) = self.selected.take() {
            debug!(aid = %hex::encode_upper(&aid), "Closing channel");
        }
        Ok(())
    }
}

/// [`SeRelay`] forwarding raw bytes to a second card
#[derive(Debug)]
pub struct CardRelay<T: CardTransport> {
    transport: T,
}

impl<T: CardTransport> CardRelay<T> {
    /// Wrap a transport
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: CardTransport> SeRelay for CardRelay<T> {
    fn relay(&mut self, data: &[u8]) -> Option<Bytes> {
        match self.transport.transmit_raw(data) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(error = %e, "Relay transmission failed");
                None
            }
        }
    }
}

/// Relay used when no external element is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelay;

impl SeRelay for NoRelay {
    fn relay(&mut self, _data: &[u8]) -> Option<Bytes> {
        warn!("Card requested a relay but no external element is configured");
        None
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use hex_literal::hex;
    use sems_apdu_core::Error;

    #[derive(Debug, Default)]
    struct ReplayTransport {
        responses: VecDeque<Bytes>,
        commands: Vec<Bytes>,
    }

    impl CardTransport for ReplayTransport {
        fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
            self.commands.push(Bytes::copy_from_slice(command));
            self.responses.pop_front().ok_or(Error::Transmission)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_select_command() {
        assert_eq!(
            select_command(&hex!("A0000003965453")).unwrap().as_ref(),
            &hex!("00A4040007A000000396545300")
        );
    }

    #[test]
    fn test_card_channel_open_and_close() {
        let transport = ReplayTransport {
            responses: [Bytes::from_static(&hex!("9000"))].into(),
            ..Default::default()
        };
        let mut channel = CardChannel::new(transport);

        let response = channel.open(&hex!("A000000396")).unwrap();
        assert_eq!(response.as_ref(), &hex!("9000"));
        assert_eq!(channel.selected(), Some(&hex!("A000000396")[..]));
        assert_eq!(
            channel.transport().commands[0].as_ref(),
            &hex!("00A4040005A00000039600")
        );

        channel.close().unwrap();
        assert!(channel.selected().is_none());
        assert!(channel.transmit(&hex!("80CA004600")).is_err());
    }

    #[test]
    fn test_card_channel_open_failure() {
        let mut channel = CardChannel::new(ReplayTransport::default());
        let err = channel.open(&hex!("A000000396")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "SELECT A000000396: Transmission error: failed to transmit data"
        );
        assert!(channel.selected().is_none());
    }

    #[test]
    fn test_card_relay() {
        let transport = ReplayTransport {
            responses: [Bytes::from_static(&hex!("AABB9000"))].into(),
            ..Default::default()
        };
        let mut relay = CardRelay::new(transport);
        assert_eq!(relay.relay(&hex!("0102")).unwrap().as_ref(), &hex!("AABB9000"));
        assert!(relay.relay(&hex!("0102")).is_none());
        assert!(NoRelay.relay(&hex!("0102")).is_none());
    }
}
