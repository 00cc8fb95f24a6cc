//! Shell session management module
//!
//! This module provides the shell session controller, which serves the
//! history protocol on a shell's channel, and a loopback driver that plays
//! the shell's side from standard input.

pub mod loopback;
pub mod shell_controller;

pub use loopback::run_loopback;
pub use shell_controller::{
    ControllerState, HandleSlot, SessionStats, ShellController, StartupHandle,
};
