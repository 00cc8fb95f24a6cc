//! Shell history control protocol
//!
//! Every channel message carries exactly one command; there is no delimiter
//! or length prefix beyond the leading command token. Entries are opaque
//! bytes and are never decoded.

use tracing::debug;

/// Longest history entry forwarded to a shell as a remote entry
pub const MAX_HISTORY_ENTRY_SIZE: usize = 1024;

/// Read buffer capacity: the longest command name plus one maximal entry
pub const COMMAND_BUFFER_SIZE: usize = MAX_HISTORY_ENTRY_SIZE + 100;

pub const GET_HISTORY_COMMAND: &str = "get_history";
pub const ADD_LOCAL_ENTRY_COMMAND: &str = "add_local_entry:";
pub const ADD_REMOTE_ENTRY_COMMAND: &str = "add_remote_entry:";

/// Commands sent by the shell to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Request the full shared history
    GetHistory,
    /// Record a command line typed in this shell
    AddLocalEntry(Vec<u8>),
    /// Anything the controller does not understand
    Unrecognized(Vec<u8>),
}

impl ShellCommand {
    /// Decode the bytes of one whole message
    pub fn parse(message: &[u8]) -> Self {
        if message == GET_HISTORY_COMMAND.as_bytes() {
            return ShellCommand::GetHistory;
        }

        if let Some(entry) = message.strip_prefix(ADD_LOCAL_ENTRY_COMMAND.as_bytes()) {
            return ShellCommand::AddLocalEntry(entry.to_vec());
        }

        debug!("Unrecognized command of {} bytes", message.len());
        ShellCommand::Unrecognized(message.to_vec())
    }

    /// Encode the command as the shell would send it
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ShellCommand::GetHistory => GET_HISTORY_COMMAND.as_bytes().to_vec(),
            ShellCommand::AddLocalEntry(entry) => {
                let mut bytes = ADD_LOCAL_ENTRY_COMMAND.as_bytes().to_vec();
                bytes.extend_from_slice(entry);
                bytes
            }
            ShellCommand::Unrecognized(raw) => raw.clone(),
        }
    }
}

/// Join entries with a trailing newline after each one, preserving order
pub fn serialize_history<E: AsRef<[u8]>>(entries: &[E]) -> Vec<u8> {
    let capacity = entries.iter().map(|entry| entry.as_ref().len() + 1).sum();
    let mut output = Vec::with_capacity(capacity);
    for entry in entries {
        output.extend_from_slice(entry.as_ref());
        output.push(b'\n');
    }
    output
}

/// Split a serialized history back into entries
pub fn parse_history(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut entries: Vec<Vec<u8>> = bytes
        .split(|byte| *byte == b'\n')
        .map(<[u8]>::to_vec)
        .collect();
    // The final terminator leaves one empty piece behind.
    if entries.last().is_some_and(Vec::is_empty) {
        entries.pop();
    }
    entries
}

/// Remote entry notification, or `None` when the entry exceeds the size bound
pub fn remote_entry_message(entry: &[u8]) -> Option<Vec<u8>> {
    if entry.len() > MAX_HISTORY_ENTRY_SIZE {
        return None;
    }
    let mut message = Vec::with_capacity(ADD_REMOTE_ENTRY_COMMAND.len() + entry.len());
    message.extend_from_slice(ADD_REMOTE_ENTRY_COMMAND.as_bytes());
    message.extend_from_slice(entry);
    Some(message)
}

/// Entry carried by a remote entry notification, if `message` is one
pub fn parse_remote_entry(message: &[u8]) -> Option<&[u8]> {
    message.strip_prefix(ADD_REMOTE_ENTRY_COMMAND.as_bytes())
}
