//! Transport layer for card communication
//!
//! A transport moves raw APDU bytes to a card and back. It has no knowledge of
//! command structure, applications or script protocols.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::Result;

/// Trait for card transport connections
pub trait CardTransport: fmt::Debug + Send {
    /// Send raw APDU bytes to the card and return the response bytes
    ///
    /// The response always includes the trailing status word.
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        trace!(command = %hex::encode_upper(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode_upper(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<()>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

#[cfg(test)]
mod mock {
    use std::collections::VecDeque;

    use super::*;
    use crate::Error;

    /// Mock transport replaying queued responses
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub(crate) responses: VecDeque<Bytes>,
        pub(crate) commands: Vec<Bytes>,
    }

    impl MockTransport {
        pub(crate) fn new(responses: impl IntoIterator<Item = Bytes>) -> Self {
            Self {
                responses: responses.into_iter().collect(),
                commands: Vec::new(),
            }
        }
    }

    impl CardTransport for MockTransport {
        fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
            self.commands.push(Bytes::copy_from_slice(command));
            self.responses.pop_front().ok_or(Error::Transmission)
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn reset(&mut self) -> Result<()> {
            self.commands.clear();
            Ok(())
        }
    }

    #[test]
    fn test_mock_replays_in_order() {
        let mut transport = MockTransport::new([
            Bytes::from_static(&[0x90, 0x00]),
            Bytes::from_static(&[0x6A, 0x82]),
        ]);

        assert_eq!(transport.transmit_raw(&[0x00, 0xA4]).unwrap().as_ref(), &[0x90, 0x00]);
        assert_eq!(transport.transmit_raw(&[0x00, 0xB0]).unwrap().as_ref(), &[0x6A, 0x82]);
        assert_eq!(transport.transmit_raw(&[0x00, 0xB0]), Err(Error::Transmission));

        let boxed: &mut dyn CardTransport = &mut transport;
        assert!(boxed.is_connected());
        assert_eq!(transport.commands.len(), 3);
    }
}
