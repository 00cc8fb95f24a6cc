//! Loopback driver playing the shell's side of a session
//!
//! Each line read from standard input is sent to the controller as one
//! protocol message, and every message the controller sends back is printed.
//! Lines starting with `!remote ` are added to the history by a second,
//! simulated session so remote entry forwarding can be observed.

use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelError, MAX_MESSAGE_BYTES, Message, Signals};
use crate::config::Config;
use crate::history::SharedHistory;
use crate::protocol::{self, parse_history};
use crate::waiter::AsyncWaiter;

use super::shell_controller::{HandleSlot, ShellController};

const REMOTE_PREFIX: &str = "!remote ";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_GRACE: Duration = Duration::from_millis(50);

/// Run one session whose shell is the terminal. Must be called within a `LocalSet`.
pub async fn run_loopback(config: &Config) -> Result<()> {
    let history = SharedHistory::from_config(&config.history)?;
    let controller = ShellController::new(&history, AsyncWaiter::new(), &config.shell_path);
    info!("Shell command line: {:?}", controller.shell_command());

    let shell = controller
        .startup_handles()
        .into_iter()
        .find(|handle| handle.slot == HandleSlot::User1)
        .map(|handle| handle.channel)
        .context("Failed to create the shell channel")?;
    controller.start();

    // Stands in for another terminal sharing the same history.
    let peer = history.register_client(|entry| {
        debug!("Peer session received {:?}", String::from_utf8_lossy(entry));
    });

    print_banner();

    let watcher = shell.watcher();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    // Let the controller answer what was already sent.
                    tokio::time::sleep(DRAIN_GRACE).await;
                    drain_responses(&shell);
                    break;
                };
                if let Some(entry) = line.strip_prefix(REMOTE_PREFIX) {
                    peer.add_entry(entry);
                } else if let Err(e) = shell.write(line.as_bytes(), Vec::new()) {
                    warn!("Failed to send {:?} to the controller: {}", line, e);
                    break;
                }
            }
            _ = watcher.wait_for(Signals::READABLE | Signals::PEER_CLOSED) => {
                if !drain_responses(&shell) {
                    break;
                }
            }
        }
    }

    drop(shell);
    if tokio::time::timeout(CLOSE_TIMEOUT, controller.closed())
        .await
        .is_err()
    {
        warn!("Controller did not observe the shell closing, terminating");
        controller.terminate();
    }

    let stats = controller.stats();
    println!();
    println!("{}", "Session summary".bold());
    println!("   Commands processed: {}", stats.commands_processed);
    println!("   History responses:  {}", stats.history_responses_sent);
    println!("   Local entries:      {}", stats.local_entries_added);
    println!("   Remote forwarded:   {}", stats.remote_entries_forwarded);
    println!("   Remote dropped:     {}", stats.remote_entries_dropped);
    println!("   History size:       {}", history.len());
    Ok(())
}

/// Print every queued response; false once the controller end is gone
fn drain_responses(shell: &Channel) -> bool {
    loop {
        match shell.read(MAX_MESSAGE_BYTES) {
            Ok(message) => print_response(&message),
            Err(ChannelError::ShouldWait) => return true,
            Err(ChannelError::PeerClosed) => {
                info!("Controller closed the channel");
                return false;
            }
            Err(e) => {
                warn!("Failed to read a controller response: {}", e);
                return true;
            }
        }
    }
}

fn print_response(message: &Message) {
    if message.bytes.is_empty() {
        for region in &message.handles {
            let entries = parse_history(&region.read_all());
            println!("{} ({} entries)", "history".green().bold(), entries.len());
            for (index, entry) in entries.iter().enumerate() {
                println!("   {:>4}  {}", index + 1, String::from_utf8_lossy(entry));
            }
        }
    } else if let Some(entry) = protocol::parse_remote_entry(&message.bytes) {
        println!("{} {}", "remote".cyan().bold(), String::from_utf8_lossy(entry));
    } else {
        println!(
            "{} {}",
            "unknown".yellow().bold(),
            String::from_utf8_lossy(&message.bytes)
        );
    }
}

fn print_banner() {
    println!("{}", "Loopback shell session".bold());
    println!("   get_history              - Request the shared history");
    println!("   add_local_entry:<text>   - Record an entry from this shell");
    println!("   !remote <text>           - Record an entry from another session");
    println!("   Ctrl-D                   - Close the shell side");
    println!();
}
