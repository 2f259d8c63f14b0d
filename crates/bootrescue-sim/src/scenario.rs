//! Canned starting states for the emulated chip

use std::fmt;
use std::str::FromStr;

use bootrescue_core::layout::Layout;

use crate::device::Device;
use crate::error::Result;

/// Flash contents the emulated chip starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Factory bootloader, no backup
    Fresh,
    /// Factory bootloader, backed up
    BackedUp,
    /// Factory bootloader, backup holding something else
    StaleBackup,
    /// Candidate already installed, no backup
    Current,
    /// Candidate installed, factory bootloader in the backup
    CurrentWithBackup,
}

impl Scenario {
    /// Every scenario
    pub const ALL: [Scenario; 5] = [
        Self::Fresh,
        Self::BackedUp,
        Self::StaleBackup,
        Self::Current,
        Self::CurrentWithBackup,
    ];

    /// Command line name
    pub fn name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::BackedUp => "backed-up",
            Self::StaleBackup => "stale-backup",
            Self::Current => "current",
            Self::CurrentWithBackup => "current-with-backup",
        }
    }

    /// Prepare `device`: `factory` is the original bootloader, `candidate`
    /// the replacement the firmware carries
    pub fn apply(
        self,
        device: &mut Device,
        layout: &Layout,
        factory: &[u8],
        candidate: &[u8],
    ) -> Result<()> {
        let live = layout.bootloader.start;
        let backup = layout.backup.start;

        match self {
            Self::Fresh | Self::BackedUp | Self::StaleBackup => device.load(live, factory)?,
            Self::Current | Self::CurrentWithBackup => device.load(live, candidate)?,
        }
        match self {
            Self::Fresh | Self::Current => {}
            Self::BackedUp | Self::CurrentWithBackup => device.load(backup, factory)?,
            Self::StaleBackup => {
                let stale: Vec<u8> = factory.iter().map(|b| b ^ 0x5A).collect();
                device.load(backup, &stale)?;
            }
        }
        log::debug!("sim: prepared scenario {}", self);
        Ok(())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|s| s.name()).collect();
                format!("unknown scenario '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// A stand-in for the factory bootloader, filling the whole region
pub fn factory_bootloader(layout: &Layout) -> Vec<u8> {
    (0..layout.bootloader.len)
        .map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8)
        .collect()
}

/// A stand-in replacement bootloader
pub fn demo_candidate(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(0x21)).collect()
}
