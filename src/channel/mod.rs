//! Duplex message channel between the controller and a shell process
//!
//! Channels are created in connected pairs. Every write delivers one whole
//! message to the opposite endpoint; reads never block and report their
//! outcome through [`ChannelError`] status codes.

pub mod shared_memory;
pub mod types;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

pub use shared_memory::SharedMemory;
pub use types::{
    ChannelError, MAX_MESSAGE_BYTES, MAX_MESSAGE_HANDLES, MAX_PENDING_MESSAGES, Message, Signals,
};

static NEXT_PAIR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one channel endpoint, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

/// Per-endpoint inbound queue
#[derive(Default)]
struct EndpointState {
    inbound: VecDeque<Message>,
    closed: bool,
}

struct PairState {
    ends: [EndpointState; 2],
}

struct Pair {
    state: Mutex<PairState>,
    notify: [Notify; 2],
}

impl Pair {
    fn lock(&self) -> MutexGuard<'_, PairState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn signals(&self, side: usize) -> Signals {
        let state = self.lock();
        let mut signals = Signals::NONE;
        if !state.ends[side].inbound.is_empty() {
            signals |= Signals::READABLE;
        }
        if state.ends[1 - side].closed {
            signals |= Signals::PEER_CLOSED;
        }
        signals
    }
}

/// One endpoint of a connected channel pair
pub struct Channel {
    pair: Arc<Pair>,
    side: usize,
    id: EndpointId,
}

impl Channel {
    /// Create a connected pair of endpoints
    pub fn create() -> Result<(Channel, Channel), ChannelError> {
        let pair_id = NEXT_PAIR_ID.fetch_add(1, Ordering::Relaxed);
        let pair = Arc::new(Pair {
            state: Mutex::new(PairState {
                ends: [EndpointState::default(), EndpointState::default()],
            }),
            notify: [Notify::new(), Notify::new()],
        });

        let first = Channel {
            pair: pair.clone(),
            side: 0,
            id: EndpointId(pair_id * 2),
        };
        let second = Channel {
            pair,
            side: 1,
            id: EndpointId(pair_id * 2 + 1),
        };
        Ok((first, second))
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Read the next queued message if it fits in `capacity` bytes.
    ///
    /// A message larger than `capacity` is discarded and reported as
    /// `BufferTooSmall`. Messages queued before the peer closed are still
    /// delivered; `PeerClosed` is only returned once the queue is drained.
    pub fn read(&self, capacity: usize) -> Result<Message, ChannelError> {
        let mut state = self.pair.lock();
        let peer_closed = state.ends[1 - self.side].closed;
        let inbound = &mut state.ends[self.side].inbound;

        let Some(size) = inbound.front().map(|message| message.bytes.len()) else {
            return Err(if peer_closed {
                ChannelError::PeerClosed
            } else {
                ChannelError::ShouldWait
            });
        };

        if size > capacity {
            inbound.pop_front();
            debug!("Discarded {} byte message on {:?}", size, self.id);
            return Err(ChannelError::BufferTooSmall { size, capacity });
        }

        inbound.pop_front().ok_or(ChannelError::ShouldWait)
    }

    /// Queue one message on the peer endpoint
    pub fn write(&self, bytes: &[u8], handles: Vec<SharedMemory>) -> Result<(), ChannelError> {
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(ChannelError::OutOfRange(format!(
                "payload of {} bytes exceeds {}",
                bytes.len(),
                MAX_MESSAGE_BYTES
            )));
        }
        if handles.len() > MAX_MESSAGE_HANDLES {
            return Err(ChannelError::OutOfRange(format!(
                "{} handles exceed {}",
                handles.len(),
                MAX_MESSAGE_HANDLES
            )));
        }

        let peer = 1 - self.side;
        {
            let mut state = self.pair.lock();
            let peer_state = &mut state.ends[peer];
            if peer_state.closed {
                return Err(ChannelError::PeerClosed);
            }
            if peer_state.inbound.len() >= MAX_PENDING_MESSAGES {
                return Err(ChannelError::NoMemory);
            }
            peer_state.inbound.push_back(Message::new(bytes, handles));
        }
        self.pair.notify[peer].notify_one();
        Ok(())
    }

    /// Signals currently asserted on this endpoint
    pub fn signals(&self) -> Signals {
        self.pair.signals(self.side)
    }

    /// Watcher that can await signals without borrowing the endpoint
    pub fn watcher(&self) -> SignalWatcher {
        SignalWatcher {
            pair: self.pair.clone(),
            side: self.side,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let peer = 1 - self.side;
        {
            let mut state = self.pair.lock();
            let own = &mut state.ends[self.side];
            own.closed = true;
            own.inbound.clear();
        }
        self.pair.notify[peer].notify_one();
    }
}

/// Awaits readiness signals on one channel endpoint
#[derive(Clone)]
pub struct SignalWatcher {
    pair: Arc<Pair>,
    side: usize,
}

impl SignalWatcher {
    pub fn signals(&self) -> Signals {
        self.pair.signals(self.side)
    }

    /// Resolve with every asserted signal once any signal in `mask` is asserted
    pub async fn wait_for(&self, mask: Signals) -> Signals {
        loop {
            let notified = self.pair.notify[self.side].notified();
            let observed = self.signals();
            if observed.intersects(mask) {
                return observed;
            }
            notified.await;
        }
    }
}
