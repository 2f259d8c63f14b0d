//! CLI argument parsing

use bootrescue_sim::Scenario;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Value out of range (max 0xFF): {}", s))
}

#[derive(Parser)]
#[command(name = "bootrescue")]
#[command(
    author,
    version,
    about = "CH32V003 bootloader rescue firmware, run against an emulated chip",
    long_about = None
)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Layout file (TOML format) overriding the built-in CH32V003 layout
    #[arg(long, global = true)]
    pub layout: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a recovery session on the emulated chip
    Simulate(SimulateArgs),

    /// Memory layout operations
    #[command(subcommand)]
    Layout(LayoutCommands),
}

/// Options for a simulated recovery session
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Replacement bootloader image (a generated demo image if omitted)
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Starting flash contents [fresh, backed-up, stale-backup, current,
    /// current-with-backup]
    #[arg(short, long, default_value = "fresh")]
    pub scenario: Scenario,

    /// Keys to type, each one once the firmware prompts for it (e.g. "bu")
    #[arg(short, long, default_value = "")]
    pub keys: String,

    /// Read keys from stdin after every prompt
    #[arg(long, conflicts_with = "keys")]
    pub interactive: bool,

    /// Send a debug unlock command with this timing coefficient first
    #[arg(long, value_parser = parse_hex_u8)]
    pub unlock: Option<u8>,

    /// Value a debugger parks in both mailbox registers before --unlock
    #[arg(long, value_parser = parse_hex_u32, default_value = "0x5A5A5A5A")]
    pub mailbox: u32,

    /// Send the reboot-to-bootloader command after the keys
    #[arg(long)]
    pub reboot: bool,

    /// HID polls per main loop iteration
    #[arg(long, default_value = "8")]
    pub hid_polls: u32,

    /// Give up after this many main loop iterations
    #[arg(long, default_value = "100000")]
    pub max_iterations: usize,

    /// Directory to dump the final backup and bootloader regions into
    #[arg(long)]
    pub dump: Option<PathBuf>,
}

/// Layout-related subcommands
#[derive(Subcommand)]
pub enum LayoutCommands {
    /// Show the layout in use
    Show,

    /// Write the layout in use to a TOML file
    Export {
        /// Output layout file (TOML format, prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
