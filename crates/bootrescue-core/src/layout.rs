//! Memory layout: the two fixed flash regions and the candidate image

use crate::error::{Error, Result};

/// Flash page size (smallest erase unit) in bytes
pub const PAGE_SIZE: usize = 64;
/// Flash write block size in bytes
pub const BLOCK_SIZE: usize = 64;
/// Words per page/block
pub const WORDS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// A contiguous region of flash addressed absolutely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashRegion {
    /// First byte address
    pub start: u32,
    /// Length in bytes
    pub len: u32,
}

impl FlashRegion {
    /// Create a new region
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// One past the last byte address, saturating at the top of the
    /// address space
    pub const fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }

    /// One past the last byte address, `None` if the region wraps
    pub const fn checked_end(&self) -> Option<u32> {
        self.start.checked_add(self.len)
    }

    /// Whether `addr` falls inside the region
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Whether the two regions share at least one byte
    pub const fn overlaps(&self, other: &FlashRegion) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Number of pages the region touches
    pub const fn pages(&self) -> u32 {
        self.len.div_ceil(PAGE_SIZE as u32)
    }

    /// Whether the region starts on a page boundary
    pub const fn is_page_aligned(&self) -> bool {
        self.start % PAGE_SIZE as u32 == 0
    }
}

/// Rescue memory layout and loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Scratch region holding a copy of the original bootloader
    pub backup: FlashRegion,
    /// The live bootloader region being replaced
    pub bootloader: FlashRegion,
    /// HID transport polls per main loop iteration
    pub hid_polls: u32,
    /// Delay before each unlock sequence, in milliseconds
    pub settle_ms: u32,
}

impl Layout {
    /// CH32V003: last 2 KiB of the 16 KiB user flash as backup, 1920 byte
    /// boot area as target.
    pub const CH32V003: Self = Self {
        backup: FlashRegion::new(0x0800_3800, 2048),
        bootloader: FlashRegion::new(0x1FFF_F000, 1920),
        hid_polls: 10_000,
        settle_ms: 100,
    };

    /// Check that both regions are page aligned, fit the address space,
    /// do not overlap, and that the backup can hold the whole bootloader
    /// region.
    pub fn validate(&self) -> Result<()> {
        if !self.backup.is_page_aligned() || !self.bootloader.is_page_aligned() {
            return Err(Error::InvalidLayout);
        }
        if self.backup.len < self.bootloader.len || self.bootloader.len == 0 {
            return Err(Error::InvalidLayout);
        }
        if self.backup.checked_end().is_none() || self.bootloader.checked_end().is_none() {
            return Err(Error::InvalidLayout);
        }
        if self.backup.overlaps(&self.bootloader) {
            return Err(Error::InvalidLayout);
        }
        Ok(())
    }

    /// Check that a candidate image fits both regions
    pub fn check_image(&self, image: &CandidateImage<'_>) -> Result<()> {
        let max = core::cmp::min(self.backup.len, self.bootloader.len) as usize;
        if image.len() > max {
            return Err(Error::ImageTooLarge {
                len: image.len(),
                max,
            });
        }
        if image.is_empty() {
            return Err(Error::EmptyWrite);
        }
        Ok(())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::CH32V003
    }
}

/// The replacement bootloader embedded in the running firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateImage<'a> {
    bytes: &'a [u8],
}

impl<'a> CandidateImage<'a> {
    /// Wrap an image
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Image contents
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Image length in bytes
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
