//! Inspecting the backup and bootloader regions

use crate::flash;
use crate::hal::RegisterBus;
use crate::layout::{CandidateImage, Layout, WORDS_PER_BLOCK};
use crate::regs::ERASED_WORD;

/// What the backup region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    /// First page of the backup region is erased
    Absent,
    /// Backup equals the live bootloader over the candidate length
    Matches,
    /// Backup holds something else (usually the original bootloader after
    /// an update)
    Differs,
}

/// Classify the backup region
///
/// A backup counts as present if any of the first 16 words is programmed.
/// A present backup is compared with the live bootloader over `compare_len`
/// bytes.
pub fn classify_backup<B: RegisterBus + ?Sized>(
    bus: &mut B,
    layout: &Layout,
    compare_len: usize,
) -> BackupState {
    let start = layout.backup.start;
    let present = (0..WORDS_PER_BLOCK as u32).any(|i| bus.read_word(start + i * 4) != ERASED_WORD);
    if !present {
        return BackupState::Absent;
    }

    match flash::first_mismatch_between(bus, start, layout.bootloader.start, compare_len) {
        None => BackupState::Matches,
        Some(offset) => {
            log::debug!("Backup differs from live bootloader at offset {}", offset);
            BackupState::Differs
        }
    }
}

/// Whether the live bootloader already equals the candidate image
pub fn bootloader_matches<B: RegisterBus + ?Sized>(
    bus: &mut B,
    layout: &Layout,
    image: &CandidateImage<'_>,
) -> bool {
    flash::first_mismatch(bus, layout.bootloader.start, image.bytes()).is_none()
}
