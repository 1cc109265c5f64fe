//! Command-line interface for sweetspot
//!
//! Provides argument parsing using clap derive macros.

use crate::sensor::protocol::ProtocolVariant;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Listener-tracking time alignment for a stereo speaker pair
#[derive(Parser, Debug)]
#[command(
    name = "sweetspot",
    version,
    about = "Listener-tracking time alignment for a stereo speaker pair"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Track the listener and run the audio path, streaming telemetry to stdout
    Run(RunArgs),

    /// List audio input and output devices
    Devices,

    /// List serial ports
    Ports,

    /// Decode a captured sensor byte stream, one JSON line per reading
    Decode {
        /// Capture file
        file: PathBuf,

        /// Framing of the capture (array, object); default from config
        #[arg(long, value_name = "VARIANT")]
        protocol: Option<ProtocolVariant>,
    },

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(clap::Args, Debug, Default, PartialEq)]
pub struct RunArgs {
    /// Read sensor bytes from a capture file instead of the serial port
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Serial device (overrides config and discovery)
    #[arg(long, value_name = "DEVICE", conflicts_with = "replay")]
    pub port: Option<String>,

    /// Track only; leave the audio path stopped
    #[arg(long)]
    pub no_audio: bool,
}

/// Configuration management actions
#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// The subcommand, `run` when none was given.
    pub fn into_command(self) -> Commands {
        self.command
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Default `tracing` filter for the given flags; `RUST_LOG` wins over it.
    pub fn log_directive(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "sweetspot=info",
            (false, 1) => "sweetspot=debug",
            (false, _) => "sweetspot=trace",
        }
    }
}
