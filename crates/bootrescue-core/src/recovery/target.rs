//! The flash operations the recovery state machine can request

use crate::error::RecoveryError;
use crate::flash::{self, Progress};
use crate::hal::{Platform, RegisterBus};
use crate::layout::{CandidateImage, Layout};

use super::state::{bootloader_matches, classify_backup, BackupState};

/// Operations on the backup and bootloader regions
///
/// Implemented by [`FlashTarget`] for the real flash controller. The state
/// machine only sees this trait, so it can be driven against a fake.
pub trait RecoveryTarget {
    /// Classify the backup region
    fn backup_state(&mut self) -> BackupState;

    /// Whether the live bootloader already equals the candidate image
    fn bootloader_current(&mut self) -> bool;

    /// Copy the whole live bootloader region into the backup region
    fn backup(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError>;

    /// Write the candidate image over the live bootloader
    fn update(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError>;

    /// Copy the backup back over the live bootloader
    fn restore(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError>;
}

/// [`RecoveryTarget`] backed by the flash controller
///
/// Each operation waits for the settle delay, unlocks the controller
/// (including the boot area when the bootloader region is written),
/// programs, relocks and then reads the result back.
pub struct FlashTarget<'a, B: ?Sized, P: ?Sized> {
    bus: &'a mut B,
    platform: &'a mut P,
    layout: Layout,
    image: CandidateImage<'a>,
}

impl<'a, B, P> FlashTarget<'a, B, P>
where
    B: RegisterBus + ?Sized,
    P: Platform + ?Sized,
{
    /// Borrow the bus and platform for one state machine step
    pub fn new(
        bus: &'a mut B,
        platform: &'a mut P,
        layout: Layout,
        image: CandidateImage<'a>,
    ) -> Self {
        Self {
            bus,
            platform,
            layout,
            image,
        }
    }

    fn unlocked<F>(&mut self, boot_mode: bool, op: F) -> Result<(), RecoveryError>
    where
        F: FnOnce(&mut B) -> Result<(), RecoveryError>,
    {
        self.platform.delay_ms(self.layout.settle_ms);
        flash::unlock(self.bus, false, boot_mode).map_err(RecoveryError::Unlock)?;
        log::debug!("Flash unlocked (boot area: {})", boot_mode);

        let result = op(self.bus);
        flash::lock(self.bus);
        result
    }
}

impl<B, P> RecoveryTarget for FlashTarget<'_, B, P>
where
    B: RegisterBus + ?Sized,
    P: Platform + ?Sized,
{
    fn backup_state(&mut self) -> BackupState {
        classify_backup(self.bus, &self.layout, self.image.len())
    }

    fn bootloader_current(&mut self) -> bool {
        bootloader_matches(self.bus, &self.layout, &self.image)
    }

    fn backup(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
        let backup = self.layout.backup;
        let live = self.layout.bootloader;
        self.unlocked(false, |bus| {
            flash::copy_region(bus, backup.start, live.start, live.len as usize, true, progress)?;
            match flash::first_mismatch_between(bus, backup.start, live.start, live.len as usize) {
                Some(offset) => Err(RecoveryError::Verify { offset }),
                None => Ok(()),
            }
        })
    }

    fn update(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
        let live = self.layout.bootloader;
        let image = self.image;
        self.unlocked(true, |bus| {
            flash::write_bulk(bus, live.start, image.bytes(), true, progress)?;
            match flash::first_mismatch(bus, live.start, image.bytes()) {
                Some(offset) => Err(RecoveryError::Verify { offset }),
                None => Ok(()),
            }
        })
    }

    fn restore(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
        let backup = self.layout.backup;
        let live = self.layout.bootloader;
        self.unlocked(true, |bus| {
            flash::copy_region(bus, live.start, backup.start, live.len as usize, true, progress)?;
            match flash::first_mismatch_between(bus, live.start, backup.start, live.len as usize) {
                Some(offset) => Err(RecoveryError::Verify { offset }),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::flash::NoProgress;
    use crate::hal::mock::{MockBus, MockPlatform};
    use crate::regs::{Ctlr, Reg};
    use std::vec::Vec;

    const LAYOUT: Layout = Layout::CH32V003;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(3).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_backup_copies_whole_region() {
        let mut bus = MockBus::new();
        let mut platform = MockPlatform::default();
        let original = pattern(1920, 1);
        bus.load(LAYOUT.bootloader.start, &original);
        let candidate = pattern(1000, 9);

        let mut target = FlashTarget::new(&mut bus, &mut platform, LAYOUT, CandidateImage::new(&candidate));
        assert_eq!(target.backup_state(), BackupState::Absent);
        target.backup(&mut NoProgress).unwrap();
        assert_eq!(target.backup_state(), BackupState::Matches);
        assert!(!target.bootloader_current());

        assert_eq!(bus.bytes(LAYOUT.backup.start, 1920), original);
        assert_eq!(bus.bytes(LAYOUT.backup.start + 1920, 128), [0xFF; 128]);
        assert_eq!(platform.delays, [LAYOUT.settle_ms]);
        assert!(bus.writes_to(Reg::FlashBootModekeyr).is_empty());
        assert_eq!(bus.writes_to(Reg::FlashCtlr).last(), Some(&Ctlr::LOCK.bits()));
        assert!(bus.locked);
    }

    #[test]
    fn test_update_writes_candidate_only() {
        let mut bus = MockBus::new();
        let mut platform = MockPlatform::default();
        let original = pattern(1920, 1);
        bus.load(LAYOUT.bootloader.start, &original);
        let candidate = pattern(1000, 9);

        let mut target = FlashTarget::new(&mut bus, &mut platform, LAYOUT, CandidateImage::new(&candidate));
        target.update(&mut NoProgress).unwrap();
        assert!(target.bootloader_current());

        assert_eq!(bus.bytes(LAYOUT.bootloader.start, 1000), candidate);
        // tail of the last partial block is preserved
        assert_eq!(bus.bytes(LAYOUT.bootloader.start + 1000, 24), &original[1000..1024]);
        assert_eq!(bus.programs.len(), 16);
        assert!(!bus.writes_to(Reg::FlashBootModekeyr).is_empty());
        assert!(bus.locked);
    }

    #[test]
    fn test_restore_after_update() {
        let mut bus = MockBus::new();
        let mut platform = MockPlatform::default();
        let original = pattern(1920, 1);
        bus.load(LAYOUT.bootloader.start, &original);
        let candidate = pattern(1920, 9);

        let mut target = FlashTarget::new(&mut bus, &mut platform, LAYOUT, CandidateImage::new(&candidate));
        target.backup(&mut NoProgress).unwrap();
        target.update(&mut NoProgress).unwrap();
        assert_eq!(target.backup_state(), BackupState::Differs);
        target.restore(&mut NoProgress).unwrap();
        assert_eq!(target.backup_state(), BackupState::Matches);

        assert_eq!(bus.bytes(LAYOUT.bootloader.start, 1920), original);
    }

    #[test]
    fn test_unlock_failure_reported() {
        let mut bus = MockBus::new();
        bus.stuck_locked = true;
        let mut platform = MockPlatform::default();
        let candidate = pattern(64, 0);

        let mut target = FlashTarget::new(&mut bus, &mut platform, LAYOUT, CandidateImage::new(&candidate));
        assert_eq!(
            target.update(&mut NoProgress),
            Err(RecoveryError::Unlock(Error::FlashLocked))
        );
        assert!(bus.programs.is_empty());
    }

    #[test]
    fn test_failure_still_relocks() {
        let mut bus = MockBus::new();
        bus.load(LAYOUT.bootloader.start, &[0u8; 64]);
        bus.broken_page = Some(LAYOUT.bootloader.start);
        let mut platform = MockPlatform::default();
        let candidate = pattern(64, 0);

        let mut target = FlashTarget::new(&mut bus, &mut platform, LAYOUT, CandidateImage::new(&candidate));
        let err = target.update(&mut NoProgress).unwrap_err();
        assert!(matches!(err, RecoveryError::Flash(f) if f.offset == 0 && f.error.is_erase()));
        assert!(bus.locked);
    }
}
