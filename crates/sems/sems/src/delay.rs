//! Delay hints carried by certificates
//!
//! A certificate may ask the executor to pause before dispatching one specific
//! command of the script. The authentication command counts as ordinal 0 and
//! secure commands are numbered from 1.

use std::{fmt, thread, time::Duration};

use tracing::debug;

use crate::{
    constants::{aid, tags},
    tlv::TlvNode,
};

/// Blocks the calling thread for a while
pub trait Sleeper: fmt::Debug + Send + Sync {
    /// Pause for `duration`
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// An active delay hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayHint {
    /// Ordinal of the command to pause before
    pub ordinal: u32,
    /// How long to pause
    pub delay: Duration,
}

impl DelayHint {
    /// Read a hint structure
    ///
    /// Returns `None` when the hint targets another application, has no
    /// delay or misses a field.
    pub fn from_node(node: &TlvNode) -> Option<Self> {
        if node.tag() != tags::DELAY_HINT {
            return None;
        }
        if node.find(tags::DELAY_HINT_APP_ID)?.value().as_ref() != aid::DELAY_HINT {
            return None;
        }

        let ordinal = be_uint(node.find(tags::DELAY_HINT_ORDINAL)?.value())?;
        let millis = be_uint(node.find(tags::DELAY_HINT_MILLIS)?.value())?;
        if millis == 0 {
            return None;
        }

        Some(Self {
            ordinal,
            delay: Duration::from_millis(u64::from(millis)),
        })
    }
}

fn be_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
}

/// Tracks dispatched commands and pauses once when the hinted ordinal comes up
#[derive(Debug, Default)]
pub struct DelayInspector {
    hint: Option<DelayHint>,
    count: u32,
    fired: bool,
}

impl DelayInspector {
    /// Create an inspector without a hint
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any hint and restart counting
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Install the hint of an uploaded certificate
    ///
    /// Only the first hint of a run is kept. Certificates uploaded again
    /// later in the run neither replace it nor restart counting.
    pub fn arm(&mut self, hint: Option<DelayHint>) {
        if self.hint.is_some() {
            return;
        }
        debug!(?hint, count = self.count, "Arming delay inspector");
        self.hint = hint;
    }

    /// The installed hint
    pub const fn hint(&self) -> Option<DelayHint> {
        self.hint
    }

    /// Called right before the authentication command is sent
    pub fn before_authentication(&mut self, sleeper: &dyn Sleeper) -> Option<Duration> {
        self.fire_at(0, sleeper)
    }

    /// Called right before each secure command is sent
    pub fn before_command(&mut self, sleeper: &dyn Sleeper) -> Option<Duration> {
        self.count += 1;
        self.fire_at(self.count, sleeper)
    }

    fn fire_at(&mut self, ordinal: u32, sleeper: &dyn Sleeper) -> Option<Duration> {
        let hint = self.hint.filter(|hint| hint.ordinal == ordinal && !self.fired)?;
        self.fired = true;
        debug!(ordinal, delay_ms = hint.delay.as_millis() as u64, "Honoring delay hint");
        sleeper.sleep(hint.delay);
        Some(hint.delay)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sleeper recording requested pauses instead of sleeping
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) pauses: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.pauses.lock().push(duration);
        }
    }

    pub(crate) fn hint_node(app_id: &[u8], ordinal: &[u8], millis: &[u8]) -> TlvNode {
        TlvNode::constructed(
            tags::DELAY_HINT,
            vec![
                TlvNode::primitive(tags::DELAY_HINT_APP_ID, app_id.to_vec()),
                TlvNode::primitive(tags::DELAY_HINT_ORDINAL, ordinal.to_vec()),
                TlvNode::primitive(tags::DELAY_HINT_MILLIS, millis.to_vec()),
            ],
        )
    }

    #[test]
    fn test_hint_parsing() {
        let hint =
            DelayHint::from_node(&hint_node(&aid::DELAY_HINT, &[0x02], &[0x00, 0x32])).unwrap();
        assert_eq!(hint.ordinal, 2);
        assert_eq!(hint.delay, Duration::from_millis(50));

        // Other application
        assert!(DelayHint::from_node(&hint_node(&[0xA0, 0x00], &[0x02], &[0x32])).is_none());
        // Zero delay
        assert!(DelayHint::from_node(&hint_node(&aid::DELAY_HINT, &[0x02], &[0x00])).is_none());
        // Missing ordinal
        assert!(DelayHint::from_node(&hint_node(&aid::DELAY_HINT, &[], &[0x32])).is_none());
    }

    #[test]
    fn test_pauses_once_before_hinted_command() {
        let sleeper = RecordingSleeper::default();
        let mut inspector = DelayInspector::new();
        inspector.arm(Some(DelayHint {
            ordinal: 2,
            delay: Duration::from_millis(50),
        }));

        assert_eq!(inspector.before_authentication(&sleeper), None);
        assert_eq!(inspector.before_command(&sleeper), None);
        assert_eq!(inspector.before_command(&sleeper), Some(Duration::from_millis(50)));
        assert_eq!(inspector.before_command(&sleeper), None);
        assert_eq!(sleeper.pauses.lock().as_slice(), &[Duration::from_millis(50)]);
    }

    #[test]
    fn test_ordinal_zero_is_authentication() {
        let sleeper = RecordingSleeper::default();
        let mut inspector = DelayInspector::new();
        inspector.arm(Some(DelayHint {
            ordinal: 0,
            delay: Duration::from_millis(10),
        }));

        assert!(inspector.before_authentication(&sleeper).is_some());
        assert!(inspector.before_command(&sleeper).is_none());
    }

    #[test]
    fn test_rearming_keeps_first_hint_and_count() {
        let sleeper = RecordingSleeper::default();
        let mut inspector = DelayInspector::new();
        let hint = DelayHint {
            ordinal: 1,
            delay: Duration::from_millis(50),
        };
        inspector.arm(Some(hint));

        assert!(inspector.before_authentication(&sleeper).is_none());
        assert!(inspector.before_command(&sleeper).is_some());

        inspector.arm(Some(DelayHint {
            ordinal: 2,
            delay: Duration::from_millis(10),
        }));
        assert_eq!(inspector.hint(), Some(hint));

        assert!(inspector.before_authentication(&sleeper).is_none());
        assert!(inspector.before_command(&sleeper).is_none());
        assert!(inspector.before_command(&sleeper).is_none());
        assert_eq!(sleeper.pauses.lock().as_slice(), &[Duration::from_millis(50)]);
    }

    #[test]
    fn test_reset_clears_hint() {
        let sleeper = RecordingSleeper::default();
        let mut inspector = DelayInspector::new();
        inspector.arm(Some(DelayHint {
            ordinal: 1,
            delay: Duration::from_millis(10),
        }));
        assert!(inspector.before_command(&sleeper).is_some());
        inspector.reset();

        assert!(inspector.hint().is_none());

        inspector.arm(Some(DelayHint {
            ordinal: 1,
            delay: Duration::from_millis(20),
        }));
        assert_eq!(inspector.before_command(&sleeper), Some(Duration::from_millis(20)));
        assert_eq!(
            sleeper.pauses.lock().as_slice(),
            &[Duration::from_millis(10), Duration::from_millis(20)]
        );
    }
}
