//! TOML layout files
//!
//! Overrides for the built-in CH32V003 layout. Every key is optional:
//!
//! ```toml
//! [backup]
//! start = 0x08003800
//! len = "2 KiB"
//!
//! [bootloader]
//! start = "0x1FFFF000"
//! len = 1920
//!
//! [tuning]
//! hid_polls = 10000
//! settle_ms = 100
//! ```

use std::fs;
use std::path::Path;

use bootrescue_core::layout::{FlashRegion, Layout};
use serde::Deserialize;

use crate::error::CliError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLayoutFile {
    backup: Option<TomlRegion>,
    bootloader: Option<TomlRegion>,
    tuning: Option<TomlTuning>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlRegion {
    #[serde(default, deserialize_with = "deserialize_hex_u32")]
    start: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_size")]
    len: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlTuning {
    hid_polls: Option<u32>,
    settle_ms: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(Some(n)),
        HexOrInt::Str(s) => parse_number(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Deserialize a size, either a number or a string like "2 KiB"
fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(Some(n)),
        HexOrInt::Str(s) => parse_size(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size string like "2 KiB", "0x800" or "2048"
pub fn parse_size(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Ok(n) = parse_number(s) {
        return Ok(n);
    }

    let s_lower = s.to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s_lower.strip_suffix("kib") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix("kb") {
        (n.trim(), 1024)
    } else if let Some(n) = s_lower.strip_suffix('b') {
        (n.trim(), 1)
    } else {
        return Err(format!("invalid size: {}", s));
    };

    let num: u32 = num_str.parse().map_err(|_| format!("invalid size: {}", s))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

/// Format a size in bytes, using KiB when it divides evenly
pub fn format_size(size: u32) -> String {
    if size >= 1024 && size % 1024 == 0 {
        format!("{} KiB", size / 1024)
    } else {
        format!("{}", size)
    }
}

fn merge_region(base: FlashRegion, overrides: Option<TomlRegion>) -> FlashRegion {
    match overrides {
        Some(region) => FlashRegion::new(
            region.start.unwrap_or(base.start),
            region.len.unwrap_or(base.len),
        ),
        None => base,
    }
}

/// Parse a layout, filling in missing keys from the CH32V003 defaults
pub fn layout_from_toml_str(content: &str) -> Result<Layout, String> {
    let file: TomlLayoutFile = toml::from_str(content).map_err(|e| e.to_string())?;
    let base = Layout::CH32V003;

    let mut layout = Layout {
        backup: merge_region(base.backup, file.backup),
        bootloader: merge_region(base.bootloader, file.bootloader),
        ..base
    };
    if let Some(tuning) = file.tuning {
        layout.hid_polls = tuning.hid_polls.unwrap_or(base.hid_polls);
        layout.settle_ms = tuning.settle_ms.unwrap_or(base.settle_ms);
    }

    layout
        .validate()
        .map_err(|e| format!("{}", e))?;
    Ok(layout)
}

/// Render a layout as a complete TOML file
pub fn layout_to_toml_string(layout: &Layout) -> String {
    let mut output = String::new();
    for (name, region) in [("backup", layout.backup), ("bootloader", layout.bootloader)] {
        output.push_str(&format!("[{}]\n", name));
        output.push_str(&format!("start = 0x{:08X}\n", region.start));
        output.push_str(&format!("len = \"{}\"\n\n", format_size(region.len)));
    }
    output.push_str("[tuning]\n");
    output.push_str(&format!("hid_polls = {}\n", layout.hid_polls));
    output.push_str(&format!("settle_ms = {}\n", layout.settle_ms));
    output
}

/// Load the layout from `path`, or the built-in one when no file is given
pub fn load_layout(path: Option<&Path>) -> Result<Layout, CliError> {
    let Some(path) = path else {
        return Ok(Layout::CH32V003);
    };
    let content = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let layout = layout_from_toml_str(&content).map_err(|reason| CliError::LayoutFile {
        path: path.to_path_buf(),
        reason,
    })?;
    log::info!("Loaded layout from {}", path.display());
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert_eq!(parse_size("0x800").unwrap(), 2048);
        assert_eq!(parse_size("2 KiB").unwrap(), 2048);
        assert_eq!(parse_size("2kb").unwrap(), 2048);
        assert_eq!(parse_size("1920 B").unwrap(), 1920);
        assert!(parse_size("two").is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(layout_from_toml_str("").unwrap(), Layout::CH32V003);
    }

    #[test]
    fn test_partial_override() {
        let layout = layout_from_toml_str(
            r#"
            [bootloader]
            len = "0x400"

            [tuning]
            hid_polls = 16
            "#,
        )
        .unwrap();
        assert_eq!(layout.bootloader.start, 0x1FFF_F000);
        assert_eq!(layout.bootloader.len, 1024);
        assert_eq!(layout.backup, Layout::CH32V003.backup);
        assert_eq!(layout.hid_polls, 16);
        assert_eq!(layout.settle_ms, 100);
    }

    #[test]
    fn test_hex_strings_and_ints() {
        let layout = layout_from_toml_str(
            r#"
            [backup]
            start = "0x08003000"
            len = 4096
            "#,
        )
        .unwrap();
        assert_eq!(layout.backup, FlashRegion::new(0x0800_3000, 4096));
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        // backup smaller than the bootloader
        assert!(layout_from_toml_str("[backup]\nlen = 1024\n").is_err());
        // misaligned
        assert!(layout_from_toml_str("[backup]\nstart = 0x08003810\n").is_err());
        assert!(layout_from_toml_str("[flash]\nstart = 0\n").is_err());
        // backup on top of the boot area
        assert!(layout_from_toml_str("[backup]\nstart = 0x1FFFF000\n").is_err());
        // wraps past the end of the address space
        assert!(layout_from_toml_str("[backup]\nstart = 0xFFFFF800\n").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let layout = Layout {
            hid_polls: 4,
            ..Layout::CH32V003
        };
        let text = layout_to_toml_string(&layout);
        assert!(text.contains("len = \"2 KiB\""));
        assert_eq!(layout_from_toml_str(&text).unwrap(), layout);
    }
}
