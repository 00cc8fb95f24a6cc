//! Shell session controller
//!
//! Owns the controller end of the channel to one shell process and serves the
//! history protocol on it. All work happens in wait callbacks on the reactor
//! thread; the public surface is fire-and-forget.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelError, SharedMemory, Signals};
use crate::history::{HistorySubscription, SharedHistory};
use crate::protocol::{
    self, ADD_REMOTE_ENTRY_COMMAND, COMMAND_BUFFER_SIZE, ShellCommand, serialize_history,
};
use crate::waiter::{AsyncWaiter, Deadline, WaitId, WaitResult};

/// Startup handle slots understood by the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSlot {
    /// Reserved slot carrying the history protocol channel
    User1,
}

/// A handle passed to the shell process at spawn time
#[derive(Debug)]
pub struct StartupHandle {
    pub slot: HandleSlot,
    pub channel: Channel,
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No wait has been armed yet
    Idle,
    /// Serving the shell with one outstanding wait
    Armed,
    /// Terminal; the channel and history registration are released
    Closed,
}

/// Session statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub commands_processed: u64,
    pub unrecognized_commands: u64,
    pub history_responses_sent: u64,
    pub local_entries_added: u64,
    pub remote_entries_forwarded: u64,
    pub remote_entries_dropped: u64,
    pub write_errors: u64,
}

struct ControllerInner {
    state: ControllerState,
    channel: Option<Channel>,
    wait_id: Option<WaitId>,
    subscription: Option<HistorySubscription>,
    waiter: AsyncWaiter,
    stats: SessionStats,
    closed_tx: watch::Sender<bool>,
}

/// Mediates between one shell channel and the shared history store
pub struct ShellController {
    inner: Rc<RefCell<ControllerInner>>,
    shell_path: String,
}

impl ShellController {
    /// Create a controller registered with `history`
    pub fn new(history: &SharedHistory, waiter: AsyncWaiter, shell_path: impl Into<String>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let inner = Rc::new(RefCell::new(ControllerInner {
            state: ControllerState::Idle,
            channel: None,
            wait_id: None,
            subscription: None,
            waiter,
            stats: SessionStats::default(),
            closed_tx,
        }));

        let weak = Rc::downgrade(&inner);
        let subscription = history.register_client(move |entry| {
            if let Some(inner) = weak.upgrade() {
                Self::on_remote_entry(&inner, entry);
            }
        });
        debug!(
            "Shell controller registered as history client {:?}",
            subscription.client_id()
        );
        inner.borrow_mut().subscription = Some(subscription);

        Self {
            inner,
            shell_path: shell_path.into(),
        }
    }

    /// Command line used to launch the shell
    pub fn shell_command(&self) -> Vec<String> {
        vec![self.shell_path.clone()]
    }

    /// Create the shell channel, keeping one end and returning the other.
    ///
    /// Returns an empty list if the channel cannot be created or the
    /// controller already has one.
    pub fn startup_handles(&self) -> Vec<StartupHandle> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ControllerState::Idle || inner.channel.is_some() {
            warn!("Shell channel already created, not creating another");
            return Vec::new();
        }

        match Channel::create() {
            Ok((controller_end, shell_end)) => {
                debug!(
                    "Created shell channel {:?} <-> {:?}",
                    controller_end.id(),
                    shell_end.id()
                );
                inner.channel = Some(controller_end);
                vec![StartupHandle {
                    slot: HandleSlot::User1,
                    channel: shell_end,
                }]
            }
            Err(e) => {
                error!("Failed to create a channel for the shell, status: {}", e);
                Vec::new()
            }
        }
    }

    /// Begin serving the shell
    pub fn start(&self) {
        {
            let inner = self.inner.borrow();
            if inner.state != ControllerState::Idle {
                warn!("Shell controller already started ({:?})", inner.state);
                return;
            }
            if inner.channel.is_none() {
                error!("Cannot start shell controller without a channel");
                return;
            }
        }
        info!("Starting shell controller");
        Self::wait_for_shell(&self.inner);
    }

    /// Stop communicating with the shell. Idempotent.
    pub fn terminate(&self) {
        Self::close(&self.inner);
    }

    pub fn state(&self) -> ControllerState {
        self.inner.borrow().state
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.borrow().stats.clone()
    }

    /// Whether this controller still holds its history registration
    pub fn is_registered(&self) -> bool {
        self.inner
            .borrow()
            .subscription
            .as_ref()
            .is_some_and(HistorySubscription::is_registered)
    }

    /// Whether a wait on the shell channel is outstanding
    pub fn is_waiting(&self) -> bool {
        self.inner.borrow().wait_id.is_some()
    }

    /// Resolve once the controller reaches `Closed`
    pub async fn closed(&self) {
        let mut closed_rx = self.inner.borrow().closed_tx.subscribe();
        // A dropped sender means the controller is gone, which is closed too.
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    fn wait_for_shell(inner: &Rc<RefCell<ControllerInner>>) {
        let mut guard = inner.borrow_mut();
        let this = &mut *guard;
        if this.state == ControllerState::Closed {
            return;
        }
        assert!(
            this.wait_id.is_none(),
            "shell controller armed a second wait on its channel"
        );
        let Some(channel) = &this.channel else {
            warn!("No shell channel to wait on");
            return;
        };

        let weak: Weak<RefCell<ControllerInner>> = Rc::downgrade(inner);
        let armed = this.waiter.arm(
            channel,
            Signals::READABLE | Signals::PEER_CLOSED,
            Deadline::Infinite,
            move |result| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_wait_complete(&inner, result);
                }
            },
        );

        match armed {
            Ok(wait_id) => {
                this.wait_id = Some(wait_id);
                this.state = ControllerState::Armed;
            }
            Err(e) => error!("Failed to wait on the shell channel: {}", e),
        }
    }

    fn on_wait_complete(inner: &Rc<RefCell<ControllerInner>>, result: WaitResult) {
        inner.borrow_mut().wait_id = None;
        match result {
            Ok(pending) => debug!("Shell channel signalled {:?}", pending),
            Err(e) => warn!("Wait on the shell channel ended early: {}", e),
        }
        Self::read_command(inner);
    }

    fn read_command(inner: &Rc<RefCell<ControllerInner>>) {
        let result = {
            let this = inner.borrow();
            if this.state == ControllerState::Closed {
                return;
            }
            match &this.channel {
                Some(channel) => channel.read(COMMAND_BUFFER_SIZE),
                None => return,
            }
        };

        match result {
            Ok(message) => {
                inner.borrow_mut().stats.commands_processed += 1;
                match ShellCommand::parse(&message.bytes) {
                    ShellCommand::GetHistory => Self::request_history(inner),
                    ShellCommand::AddLocalEntry(entry) => Self::add_local_entry(inner, entry),
                    ShellCommand::Unrecognized(raw) => {
                        error!(
                            "Unrecognized shell command: {}",
                            String::from_utf8_lossy(&raw)
                        );
                        inner.borrow_mut().stats.unrecognized_commands += 1;
                    }
                }
                Self::wait_for_shell(inner);
            }
            Err(ChannelError::ShouldWait) => Self::wait_for_shell(inner),
            Err(ChannelError::BufferTooSmall { size, capacity }) => {
                warn!(
                    "The command sent by shell didn't fit in the buffer ({} > {} bytes)",
                    size, capacity
                );
                Self::wait_for_shell(inner);
            }
            Err(ChannelError::PeerClosed) => {
                info!("Shell closed its end of the channel");
                Self::close(inner);
            }
            Err(other) => panic!("Unhandled channel status on read: {:?}", other),
        }
    }

    fn request_history(inner: &Rc<RefCell<ControllerInner>>) {
        let this = inner.borrow();
        let Some(subscription) = &this.subscription else {
            warn!("History requested after unregistering");
            return;
        };

        let weak = Rc::downgrade(inner);
        subscription.read_initial_entries(move |entries| {
            if let Some(inner) = weak.upgrade() {
                Self::send_back_history(&inner, &entries);
            }
        });
    }

    fn send_back_history(inner: &Rc<RefCell<ControllerInner>>, entries: &[Vec<u8>]) -> bool {
        let mut guard = inner.borrow_mut();
        let this = &mut *guard;
        let Some(channel) = &this.channel else {
            debug!("Shell channel closed before history was ready");
            return false;
        };

        let history = serialize_history(entries);
        let region = match SharedMemory::from_bytes(&history) {
            Ok(region) => region,
            Err(e) => {
                error!("Failed to write terminal history to shared memory: {}", e);
                this.stats.write_errors += 1;
                return false;
            }
        };

        // The region is released with the message if the write fails.
        match channel.write(b"", vec![region]) {
            Ok(()) => {
                debug!("Sent {} history entries to the shell", entries.len());
                this.stats.history_responses_sent += 1;
                true
            }
            Err(e) => {
                error!(
                    "Failed to write the terminal history response to channel: {}",
                    e
                );
                this.stats.write_errors += 1;
                false
            }
        }
    }

    fn add_local_entry(inner: &Rc<RefCell<ControllerInner>>, entry: Vec<u8>) {
        {
            let this = inner.borrow();
            match &this.subscription {
                Some(subscription) => subscription.add_entry(entry),
                None => {
                    warn!("Local entry received after unregistering");
                    return;
                }
            }
        }
        inner.borrow_mut().stats.local_entries_added += 1;
    }

    fn on_remote_entry(inner: &Rc<RefCell<ControllerInner>>, entry: &[u8]) {
        let mut guard = inner.borrow_mut();
        let this = &mut *guard;
        if this.state == ControllerState::Closed {
            return;
        }
        let Some(channel) = &this.channel else {
            debug!("No shell channel yet, skipping remote entry");
            return;
        };

        // Entries too big for the protocol are dropped, not truncated.
        let Some(message) = protocol::remote_entry_message(entry) else {
            debug!("Dropping remote entry of {} bytes", entry.len());
            this.stats.remote_entries_dropped += 1;
            return;
        };

        match channel.write(&message, Vec::new()) {
            Ok(()) => this.stats.remote_entries_forwarded += 1,
            Err(ChannelError::NoMemory) => this.stats.remote_entries_dropped += 1,
            Err(e) => {
                error!(
                    "Failed to write a {} command, status: {}",
                    ADD_REMOTE_ENTRY_COMMAND, e
                );
                this.stats.write_errors += 1;
            }
        }
    }

    fn close(inner: &Rc<RefCell<ControllerInner>>) {
        let (channel, subscription) = {
            let mut guard = inner.borrow_mut();
            let this = &mut *guard;
            if let Some(wait_id) = this.wait_id.take() {
                this.waiter.cancel(wait_id);
            }
            if this.state != ControllerState::Closed {
                info!("Shell controller closed");
            }
            this.state = ControllerState::Closed;
            this.closed_tx.send_replace(true);
            (this.channel.take(), this.subscription.take())
        };

        if let Some(subscription) = subscription {
            subscription.unregister();
        }
        drop(channel);
    }
}

impl Drop for ShellController {
    fn drop(&mut self) {
        Self::close(&self.inner);
    }
}
