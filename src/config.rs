//! Command line surface and the settings it resolves to.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::capture::DEFAULT_BUFFER_CAPACITY;
use crate::classifier::IpTarget;
use crate::error::{Error, Result};
use crate::model::ConnectionKey;

/// Smallest reader buffer that still holds a full-size Ethernet frame.
const MIN_BUFFER_CAPACITY: usize = 2048;

/// Knobs of the library entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub ip_target: IpTarget,
    /// Initial capture reader buffer, grown on demand
    pub buffer_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ip_target: IpTarget::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IpArg {
    V4,
    V6,
    Any,
}

impl From<IpArg> for IpTarget {
    fn from(arg: IpArg) -> Self {
        match arg {
            IpArg::V4 => IpTarget::V4,
            IpArg::V6 => IpTarget::V6,
            IpArg::Any => IpTarget::Any,
        }
    }
}

/// Reconstruct the TCP conversations of a pcap or pcapng capture.
#[derive(Debug, Parser)]
#[command(name = "flowshark", version)]
pub struct Cli {
    /// IP version whose TCP traffic is grouped
    #[arg(long, value_enum, default_value_t = IpArg::V4, global = true)]
    pub ip: IpArg,

    /// Initial capture reader buffer in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY, global = true)]
    pub buffer_size: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Write logs here instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every connection with its byte counts
    List { capture: PathBuf },

    /// Print the first flow matching all given filters
    Show {
        capture: PathBuf,
        /// Connection as `A<->B` or `A,B`, either order
        #[arg(long)]
        key: Option<ConnectionKey>,
        /// Forward data must start with this text
        #[arg(long)]
        fwd: Option<String>,
        /// Reverse data must start with this text
        #[arg(long)]
        rev: Option<String>,
        /// Hex dump instead of escaped text
        #[arg(long)]
        hex: bool,
    },

    /// Print the frames that could not be classified
    Issues { capture: PathBuf },

    /// Check that every frame decodes
    Verify { capture: PathBuf },

    /// Browse flows in a terminal UI
    Browse { capture: PathBuf },
}

impl Cli {
    pub fn settings(&self) -> Result<Settings> {
        if self.buffer_size < MIN_BUFFER_CAPACITY {
            return Err(Error::Config(format!(
                "--buffer-size must be at least {MIN_BUFFER_CAPACITY}, got {}",
                self.buffer_size
            )));
        }
        Ok(Settings {
            ip_target: self.ip.into(),
            buffer_capacity: self.buffer_size,
        })
    }
}
