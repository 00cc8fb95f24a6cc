//! Shared command history store
//!
//! One store is shared by every shell session on the reactor thread. Each
//! session registers a client and receives a [`HistorySubscription`]; entries
//! added through one subscription are pushed to every other registered
//! client as remote entries.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

use crate::config::HistoryConfig;

type RemoteEntryHandler = Rc<dyn Fn(&[u8])>;

/// Identifier of one registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

struct HistoryState {
    entries: VecDeque<Vec<u8>>,
    max_entries: usize,
    clients: BTreeMap<ClientId, RemoteEntryHandler>,
    next_client: u64,
    file_path: Option<PathBuf>,
}

/// Cloneable handle to the shared history
#[derive(Clone)]
pub struct SharedHistory {
    state: Rc<RefCell<HistoryState>>,
}

impl SharedHistory {
    /// Create an empty in-memory history
    pub fn new(max_entries: usize) -> Self {
        Self::with_entries(Vec::<Vec<u8>>::new(), max_entries)
    }

    /// Create an in-memory history seeded with `entries`, oldest first
    pub fn with_entries<I, E>(entries: I, max_entries: usize) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Vec<u8>>,
    {
        let max_entries = max_entries.max(1);
        let mut entries: VecDeque<Vec<u8>> = entries.into_iter().map(Into::into).collect();
        while entries.len() > max_entries {
            entries.pop_front();
        }

        Self {
            state: Rc::new(RefCell::new(HistoryState {
                entries,
                max_entries,
                clients: BTreeMap::new(),
                next_client: 0,
                file_path: None,
            })),
        }
    }

    /// Load a newline-delimited history file, appending new entries to it.
    ///
    /// A missing file starts an empty history.
    pub fn load<P: AsRef<Path>>(path: P, max_entries: usize) -> Result<Self> {
        let path = path.as_ref();
        let entries: Vec<Vec<u8>> = if path.exists() {
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read history file: {}", path.display()))?;
            content
                .split(|byte| *byte == b'\n')
                .filter(|line| !line.is_empty())
                .map(<[u8]>::to_vec)
                .collect()
        } else {
            debug!("History file {} does not exist yet", path.display());
            Vec::new()
        };

        let history = Self::with_entries(entries, max_entries);
        history.state.borrow_mut().file_path = Some(path.to_path_buf());
        info!(
            "Loaded {} history entries from {}",
            history.len(),
            path.display()
        );
        Ok(history)
    }

    /// Build the store described by the history configuration
    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        if config.file_path.trim().is_empty() {
            Ok(Self::new(config.max_entries))
        } else {
            Self::load(&config.file_path, config.max_entries)
        }
    }

    /// Register a client notified of entries added by other clients
    pub fn register_client<F>(&self, on_remote_entry: F) -> HistorySubscription
    where
        F: Fn(&[u8]) + 'static,
    {
        let mut state = self.state.borrow_mut();
        state.next_client += 1;
        let client = ClientId(state.next_client);
        state.clients.insert(client, Rc::new(on_remote_entry));
        debug!("Registered history client {:?}", client);

        HistorySubscription {
            client,
            history: Rc::downgrade(&self.state),
        }
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.state.borrow().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.state.borrow().clients.len()
    }

    fn add_entry_from(state: &RefCell<HistoryState>, origin: ClientId, entry: Vec<u8>) {
        let recipients: Vec<RemoteEntryHandler> = {
            let mut state = state.borrow_mut();
            if let Some(path) = &state.file_path {
                if let Err(e) = append_to_file(path, &entry) {
                    warn!("Failed to persist history entry: {:#}", e);
                }
            }

            state.entries.push_back(entry.clone());
            while state.entries.len() > state.max_entries {
                state.entries.pop_front();
            }

            state
                .clients
                .iter()
                .filter(|(client, _)| **client != origin)
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        debug!(
            "Client {:?} added an entry, notifying {} other clients",
            origin,
            recipients.len()
        );
        for handler in recipients {
            handler(&entry[..]);
        }
    }
}

fn append_to_file(path: &Path, entry: &[u8]) -> Result<()> {
    if entry.contains(&b'\n') {
        anyhow::bail!("multi-line entries are kept in memory only");
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open history file: {}", path.display()))?;
    file.write_all(entry)
        .and_then(|()| file.write_all(b"\n"))
        .with_context(|| format!("Failed to append to history file: {}", path.display()))?;
    Ok(())
}

/// A client's registration with the shared history; dropping it unregisters
pub struct HistorySubscription {
    client: ClientId,
    history: Weak<RefCell<HistoryState>>,
}

impl HistorySubscription {
    pub fn client_id(&self) -> ClientId {
        self.client
    }

    /// Deliver the ordered entries as of this call, once, on a later reactor turn.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn read_initial_entries<F>(&self, callback: F)
    where
        F: FnOnce(Vec<Vec<u8>>) + 'static,
    {
        let mut snapshot = Vec::new();
        if let Some(state) = self.history.upgrade() {
            snapshot.extend(state.borrow().entries.iter().cloned());
        }
        tokio::task::spawn_local(async move {
            callback(snapshot);
        });
    }

    /// Record an entry typed in this client's shell
    pub fn add_entry(&self, entry: impl Into<Vec<u8>>) {
        match self.history.upgrade() {
            Some(state) => SharedHistory::add_entry_from(&state, self.client, entry.into()),
            None => debug!("History store is gone, dropping entry"),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.history
            .upgrade()
            .is_some_and(|state| state.borrow().clients.contains_key(&self.client))
    }

    /// Remove this client from the store; safe to call more than once
    pub fn unregister(&self) {
        if let Some(state) = self.history.upgrade() {
            if state.borrow_mut().clients.remove(&self.client).is_some() {
                debug!("Unregistered history client {:?}", self.client);
            }
        }
    }
}

impl Drop for HistorySubscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;
    use tokio::task::LocalSet;

    fn entries_of(lines: &[&str]) -> Vec<Vec<u8>> {
        lines.iter().map(|line| line.as_bytes().to_vec()).collect()
    }

    fn recorder() -> (Rc<RefCell<Vec<Vec<u8>>>>, impl Fn(&[u8]) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |entry: &[u8]| sink.borrow_mut().push(entry.to_vec()))
    }

    #[test]
    fn test_entries_pushed_to_other_clients_only() {
        let history = SharedHistory::new(100);
        let (seen_a, on_a) = recorder();
        let (seen_b, on_b) = recorder();
        let a = history.register_client(on_a);
        let _b = history.register_client(on_b);

        a.add_entry("make build");

        assert_eq!(history.entries(), entries_of(&["make build"]));
        assert!(seen_a.borrow().is_empty());
        assert_eq!(*seen_b.borrow(), entries_of(&["make build"]));
    }

    #[test]
    fn test_entries_are_stored_and_pushed_verbatim() {
        let history = SharedHistory::new(100);
        let (seen, on_entry) = recorder();
        let a = history.register_client(|_| {});
        let _b = history.register_client(on_entry);
        let raw = vec![0xff, b'l', b's', 0x00, 0xc3];

        a.add_entry(raw.clone());

        assert_eq!(history.entries(), vec![raw.clone()]);
        assert_eq!(*seen.borrow(), vec![raw]);
    }

    #[test]
    fn test_drop_unregisters() {
        let history = SharedHistory::new(100);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let subscription = history.register_client(move |_| counter.set(counter.get() + 1));
        let other = history.register_client(|_| {});
        assert_eq!(history.client_count(), 2);

        subscription.unregister();
        subscription.unregister();
        assert!(!subscription.is_registered());
        assert_eq!(history.client_count(), 1);

        other.add_entry("ls");
        assert_eq!(calls.get(), 0);

        drop(subscription);
        drop(other);
        assert_eq!(history.client_count(), 0);
    }

    #[test]
    fn test_max_entries_drops_oldest() {
        let history = SharedHistory::with_entries(["a", "b", "c"], 2);
        assert_eq!(history.entries(), entries_of(&["b", "c"]));

        let client = history.register_client(|_| {});
        client.add_entry("d");
        assert_eq!(history.entries(), entries_of(&["c", "d"]));
    }

    #[test]
    fn test_subscription_outliving_store_is_inert() {
        let history = SharedHistory::new(10);
        let client = history.register_client(|_| {});
        drop(history);

        client.add_entry("ls");
        assert!(!client.is_registered());
    }

    #[tokio::test]
    async fn test_read_initial_entries_snapshots_at_call_time() {
        LocalSet::new()
            .run_until(async {
                let history = SharedHistory::with_entries(["ls"], 10);
                let client = history.register_client(|_| {});
                let delivered = Rc::new(RefCell::new(None));

                let slot = delivered.clone();
                client.read_initial_entries(move |entries| *slot.borrow_mut() = Some(entries));
                client.add_entry("pwd");
                assert!(delivered.borrow().is_none());

                tokio::task::yield_now().await;
                assert_eq!(*delivered.borrow(), Some(entries_of(&["ls"])));
            })
            .await;
    }

    #[test]
    fn test_load_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history");
        std::fs::write(&path, "ls\ncd /tmp\n").unwrap();

        let history = SharedHistory::load(&path, 100).unwrap();
        assert_eq!(history.entries(), entries_of(&["ls", "cd /tmp"]));

        let client = history.register_client(|_| {});
        client.add_entry("git status");
        client.add_entry("echo 'a\nb'");
        client.add_entry(vec![b'x', 0xfe]);
        drop(client);
        drop(history);

        let reloaded = SharedHistory::load(&path, 100).unwrap();
        let mut expected = entries_of(&["ls", "cd /tmp", "git status"]);
        expected.push(vec![b'x', 0xfe]);
        assert_eq!(reloaded.entries(), expected);
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let history = SharedHistory::load(dir.path().join("absent"), 100).unwrap();
        assert!(history.is_empty());
    }
}
