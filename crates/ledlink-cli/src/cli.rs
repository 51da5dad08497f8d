//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Data directory for the remembered device
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby advertisers
    Scan {
        /// Include advertisers without a name
        #[arg(short, long)]
        all: bool,
    },
    /// Connect and control the LED interactively
    Connect {
        /// Peripheral address (defaults to the remembered device)
        address: Option<String>,
    },
    /// Toggle the LED once and exit
    Toggle {
        address: Option<String>,
    },
    /// Read the LED state once and exit
    Read {
        address: Option<String>,
    },
    /// Switch the LED on or off and exit
    Set {
        #[arg(value_enum)]
        state: LedSwitch,
        address: Option<String>,
    },
    /// Forget the remembered device
    Forget,
    /// Interactive session against a simulated peripheral
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedSwitch {
    On,
    Off,
}

impl LedSwitch {
    pub fn is_on(self) -> bool {
        matches!(self, LedSwitch::On)
    }
}
