//! bootrescue - CH32V003 bootloader rescue
//!
//! The rescue firmware replaces the factory bootloader of a CH32V003 from
//! user flash: it backs up the boot area, writes the bootloader it carries
//! and can restore the backup, all driven from a USB HID terminal.
//!
//! # Architecture
//!
//! - **bootrescue-core** - the `no_std` firmware logic: flash engine, debug
//!   mailbox, HID bridge and the recovery state machine
//! - **bootrescue-sim** - an in-memory emulation of the chip and a scripted
//!   USB host
//!
//! This binary runs the firmware against the emulator, so a recovery can be
//! rehearsed and inspected without hardware.

mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;
use cli::{Cli, Commands, LayoutCommands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let layout = config::load_layout(cli.layout.as_deref())?;

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::run_simulate(layout, &args),
        Commands::Layout(LayoutCommands::Show) => commands::layout::cmd_show(&layout),
        Commands::Layout(LayoutCommands::Export { output }) => {
            commands::layout::cmd_export(&layout, output.as_deref())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
