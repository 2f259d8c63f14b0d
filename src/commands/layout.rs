//! Layout command implementations

use std::fs;
use std::path::Path;

use bootrescue_core::layout::{FlashRegion, Layout};

use crate::config::{format_size, layout_to_toml_string};
use crate::error::CliError;

fn print_region(name: &str, region: &FlashRegion) {
    println!(
        "{:<12} {:#010X} {:#010X} {:>10} {:>6}",
        name,
        region.start,
        region.end() - 1,
        format_size(region.len),
        region.pages()
    );
}

/// Print a layout as a table
pub fn print_layout(layout: &Layout) {
    println!("Layout Information");
    println!("==================");
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>6}",
        "Region", "Start", "End", "Size", "Pages"
    );
    println!("{:-<52}", "");
    print_region("backup", &layout.backup);
    print_region("bootloader", &layout.bootloader);
    println!();
    println!("HID polls per iteration: {}", layout.hid_polls);
    println!("Unlock settle delay:     {} ms", layout.settle_ms);
}

/// Show the layout in use
pub fn cmd_show(layout: &Layout) -> Result<(), CliError> {
    print_layout(layout);
    Ok(())
}

/// Write the layout in use as TOML
pub fn cmd_export(layout: &Layout, output: Option<&Path>) -> Result<(), CliError> {
    let content = layout_to_toml_string(layout);
    match output {
        Some(path) => {
            fs::write(path, content).map_err(|source| CliError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            println!("Saved layout to {:?}", path);
        }
        None => print!("{}", content),
    }
    Ok(())
}
