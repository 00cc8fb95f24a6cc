//! Single-threaded async wait multiplexer
//!
//! Waits are one-shot: each registration fires its callback exactly once on
//! the thread driving the current `LocalSet` and is removed before the
//! callback runs. Callers re-arm explicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::channel::{Channel, EndpointId, Signals};

/// When a pending wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Infinite,
    At(Instant),
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline::At(Instant::now() + timeout)
    }
}

/// Cancellation token for one registered wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("a wait is already pending on endpoint {0:?}")]
    AlreadyPending(EndpointId),
    #[error("wait deadline elapsed")]
    TimedOut,
}

/// Outcome delivered to a wait callback
pub type WaitResult = Result<Signals, WaitError>;

struct PendingWait {
    endpoint: EndpointId,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ReactorState {
    next_id: u64,
    pending: HashMap<WaitId, PendingWait>,
}

/// Handle to the reactor; clones share the same registration table
#[derive(Clone, Default)]
pub struct AsyncWaiter {
    state: Rc<RefCell<ReactorState>>,
}

impl AsyncWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `mask` on `channel`.
    ///
    /// Must be called from within a `LocalSet`. Fails with `AlreadyPending`
    /// if this endpoint already has an outstanding wait; the existing
    /// registration is left in place.
    pub fn arm<F>(
        &self,
        channel: &Channel,
        mask: Signals,
        deadline: Deadline,
        callback: F,
    ) -> Result<WaitId, WaitError>
    where
        F: FnOnce(WaitResult) + 'static,
    {
        let endpoint = channel.id();
        let mut state = self.state.borrow_mut();
        if state.pending.values().any(|wait| wait.endpoint == endpoint) {
            return Err(WaitError::AlreadyPending(endpoint));
        }

        state.next_id += 1;
        let id = WaitId(state.next_id);
        let watcher = channel.watcher();
        let reactor = Rc::downgrade(&self.state);

        let task = tokio::task::spawn_local(async move {
            let result = match deadline {
                Deadline::Infinite => Ok(watcher.wait_for(mask).await),
                Deadline::At(when) => tokio::time::timeout_at(when, watcher.wait_for(mask))
                    .await
                    .map_err(|_| WaitError::TimedOut),
            };

            if let Some(reactor) = reactor.upgrade() {
                reactor.borrow_mut().pending.remove(&id);
            }
            trace!("Wait {:?} fired with {:?}", id, result);
            callback(result);
        });

        state.pending.insert(id, PendingWait { endpoint, task });
        debug!("Armed wait {:?} on {:?} for {:?}", id, endpoint, mask);
        Ok(id)
    }

    /// Cancel a pending wait. Returns false if it already fired or is unknown.
    pub fn cancel(&self, id: WaitId) -> bool {
        let removed = self.state.borrow_mut().pending.remove(&id);
        match removed {
            Some(wait) => {
                wait.task.abort();
                debug!("Cancelled wait {:?} on {:?}", id, wait.endpoint);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: WaitId) -> bool {
        self.state.borrow().pending.contains_key(&id)
    }

    /// Number of outstanding waits
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::task::LocalSet;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_wait_fires_once_and_deregisters() {
        LocalSet::new()
            .run_until(async {
                let waiter = AsyncWaiter::new();
                let (shell, controller) = Channel::create().unwrap();
                let fired = Rc::new(Cell::new(0));

                let counter = fired.clone();
                let id = waiter
                    .arm(
                        &controller,
                        Signals::READABLE | Signals::PEER_CLOSED,
                        Deadline::Infinite,
                        move |result| {
                            assert!(result.unwrap().contains(Signals::READABLE));
                            counter.set(counter.get() + 1);
                        },
                    )
                    .unwrap();
                assert!(waiter.is_pending(id));

                shell.write(b"get_history", Vec::new()).unwrap();
                settle().await;
                assert_eq!(fired.get(), 1);
                assert_eq!(waiter.pending(), 0);

                shell.write(b"get_history", Vec::new()).unwrap();
                settle().await;
                assert_eq!(fired.get(), 1, "waits do not renew themselves");
            })
            .await;
    }

    #[tokio::test]
    async fn test_second_arm_is_rejected() {
        LocalSet::new()
            .run_until(async {
                let waiter = AsyncWaiter::new();
                let (shell, controller) = Channel::create().unwrap();
                let first = Rc::new(Cell::new(false));

                let flag = first.clone();
                let id = waiter
                    .arm(&controller, Signals::READABLE, Deadline::Infinite, move |_| {
                        flag.set(true)
                    })
                    .unwrap();

                let second = waiter.arm(&controller, Signals::READABLE, Deadline::Infinite, |_| {
                    panic!("replacement wait must never fire")
                });
                assert_eq!(second, Err(WaitError::AlreadyPending(controller.id())));
                assert!(waiter.is_pending(id));

                shell.write(b"x", Vec::new()).unwrap();
                settle().await;
                assert!(first.get());
            })
            .await;
    }

    #[tokio::test]
    async fn test_cancel_suppresses_callback() {
        LocalSet::new()
            .run_until(async {
                let waiter = AsyncWaiter::new();
                let (shell, controller) = Channel::create().unwrap();

                let id = waiter
                    .arm(&controller, Signals::READABLE, Deadline::Infinite, |_| {
                        panic!("cancelled wait fired")
                    })
                    .unwrap();
                assert!(waiter.cancel(id));
                assert!(!waiter.cancel(id));

                shell.write(b"x", Vec::new()).unwrap();
                settle().await;
                assert_eq!(waiter.pending(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_noop() {
        LocalSet::new()
            .run_until(async {
                let waiter = AsyncWaiter::new();
                let (shell, controller) = Channel::create().unwrap();
                shell.write(b"x", Vec::new()).unwrap();

                let id = waiter
                    .arm(&controller, Signals::READABLE, Deadline::Infinite, |_| {})
                    .unwrap();
                settle().await;
                assert!(!waiter.cancel(id));
            })
            .await;
    }

    #[tokio::test]
    async fn test_deadline_reports_timeout() {
        LocalSet::new()
            .run_until(async {
                let waiter = AsyncWaiter::new();
                let (_shell, controller) = Channel::create().unwrap();
                let outcome = Rc::new(RefCell::new(None));

                let slot = outcome.clone();
                waiter
                    .arm(
                        &controller,
                        Signals::READABLE,
                        Deadline::after(Duration::from_millis(50)),
                        move |result| *slot.borrow_mut() = Some(result),
                    )
                    .unwrap();

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(*outcome.borrow(), Some(Err(WaitError::TimedOut)));
            })
            .await;
    }
}
