//! Channel transport data types and status codes

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use super::shared_memory::SharedMemory;

/// Largest payload accepted by a single channel write
pub const MAX_MESSAGE_BYTES: usize = 65536;

/// Largest number of handles attached to a single message
pub const MAX_MESSAGE_HANDLES: usize = 64;

/// Messages queued on one endpoint before writers see `NoMemory`
pub const MAX_PENDING_MESSAGES: usize = 256;

/// Readiness signals asserted on a channel endpoint
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Signals(u32);

impl Signals {
    pub const NONE: Signals = Signals(0);
    /// At least one message is queued for reading
    pub const READABLE: Signals = Signals(1 << 0);
    /// The opposite endpoint has been closed
    pub const PEER_CLOSED: Signals = Signals(1 << 1);

    pub fn contains(self, other: Signals) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Signals) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Signals {
    type Output = Signals;

    fn bitor(self, rhs: Signals) -> Signals {
        Signals(self.0 | rhs.0)
    }
}

impl BitOrAssign for Signals {
    fn bitor_assign(&mut self, rhs: Signals) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Signals {
    type Output = Signals;

    fn bitand(self, rhs: Signals) -> Signals {
        Signals(self.0 & rhs.0)
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Signals::READABLE) {
            names.push("READABLE");
        }
        if self.contains(Signals::PEER_CLOSED) {
            names.push("PEER_CLOSED");
        }
        if names.is_empty() {
            write!(f, "Signals(NONE)")
        } else {
            write!(f, "Signals({})", names.join(" | "))
        }
    }
}

/// One whole message: payload bytes plus out-of-band handles
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub bytes: Vec<u8>,
    pub handles: Vec<SharedMemory>,
}

impl Message {
    pub fn new(bytes: impl Into<Vec<u8>>, handles: Vec<SharedMemory>) -> Self {
        Self {
            bytes: bytes.into(),
            handles,
        }
    }
}

/// Status codes reported by channel and shared memory operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("no message available yet")]
    ShouldWait,
    #[error("message of {size} bytes does not fit in a {capacity} byte buffer")]
    BufferTooSmall { size: usize, capacity: usize },
    #[error("peer endpoint closed")]
    PeerClosed,
    #[error("out of resources")]
    NoMemory,
    #[error("argument out of range: {0}")]
    OutOfRange(String),
}
