//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for termsession.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "termsession")]
#[command(about = "Shell session controller with shared command history")]
#[command(
    long_about = "Runs a shell session controller that serves the history protocol over a duplex channel"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "termsession.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Default)]
pub enum Commands {
    /// Run a loopback session: stdin lines are sent as shell protocol messages
    #[default]
    Run,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration to the config file
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Resolve the log level: verbose wins, then the flag, then the config file
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["termsession"]).unwrap();
        assert!(matches!(cli.command(), Commands::Run));
        assert_eq!(cli.config_file, "termsession.toml");
    }

    #[test]
    fn test_effective_log_level() {
        let cli = Cli::try_parse_from(["termsession"]).unwrap();
        assert_eq!(cli.effective_log_level("warn"), "warn");

        let cli = Cli::try_parse_from(["termsession", "--log-level", "trace"]).unwrap();
        assert_eq!(cli.effective_log_level("warn"), "trace");

        let cli = Cli::try_parse_from(["termsession", "-v", "--log-level", "trace"]).unwrap();
        assert_eq!(cli.effective_log_level("warn"), "debug");
    }

    #[test]
    fn test_config_subcommand() {
        let cli = Cli::try_parse_from(["termsession", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command(),
            Commands::Config {
                action: Some(ConfigAction::Show)
            }
        ));
    }
}
