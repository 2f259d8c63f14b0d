//! Terminal driven recovery state machine

use core::fmt::{self, Write};

use super::state::BackupState;
use super::target::RecoveryTarget;
use crate::error::RecoveryError;
use crate::flash::Progress;

/// Where the recovery dialogue stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    /// Waiting for the terminal link, then inspects flash and prompts
    Idle,
    /// Prompted for 'b'
    AwaitBackup,
    /// Prompted for 'u'
    AwaitUpdate,
    /// Prompted for 'r' or 'u'
    AwaitRestoreOrUpdate,
    /// Prompted for 'r'
    AwaitRestoreOnly,
    /// Work finished, disconnect message pending
    Done,
    /// Disconnect message printed; nothing left to do
    Finished,
}

/// Prints one '.' per programmed block
pub struct DotProgress<'a, W: ?Sized> {
    out: &'a mut W,
}

impl<'a, W: Write + ?Sized> DotProgress<'a, W> {
    /// Report into `out`
    pub fn new(out: &'a mut W) -> Self {
        Self { out }
    }
}

impl<W: Write + ?Sized> Progress for DotProgress<'_, W> {
    fn block_done(&mut self, _addr: u32, _bytes: usize) {
        let _ = self.out.write_char('.');
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Backup,
    Update,
    Restore,
}

impl Operation {
    fn key(self) -> u8 {
        match self {
            Self::Backup => b'b',
            Self::Update => b'u',
            Self::Restore => b'r',
        }
    }

    fn banner(self) -> &'static str {
        match self {
            Self::Backup => "Backing up",
            Self::Update => "Writing bootloader",
            Self::Restore => "Restoring from backup",
        }
    }

    fn success(self) -> &'static str {
        match self {
            Self::Backup => "Backup is done",
            Self::Update => "Bootloader written",
            Self::Restore => "Backup restored",
        }
    }

    fn failure(self) -> &'static str {
        match self {
            Self::Backup => "Backup failed",
            Self::Update => "Writing bootloader failed",
            Self::Restore => "Restoring backup failed",
        }
    }
}

/// The recovery dialogue
///
/// Owns the current [`UiState`] and the last keystroke received from the
/// terminal. Nothing is persisted: every boot starts at [`UiState::Idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    state: UiState,
    key: Option<u8>,
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Recovery {
    /// Start in [`UiState::Idle`] with no keystroke
    pub const fn new() -> Self {
        Self {
            state: UiState::Idle,
            key: None,
        }
    }

    /// Current state
    pub const fn state(&self) -> UiState {
        self.state
    }

    /// Record a keystroke from the terminal, replacing any unhandled one
    ///
    /// A zero byte clears the pending keystroke.
    pub fn key_pressed(&mut self, key: u8) {
        self.key = if key == 0 { None } else { Some(key) };
    }

    /// Keystroke waiting to be handled
    pub const fn pending_key(&self) -> Option<u8> {
        self.key
    }

    /// Advance the dialogue by one step
    ///
    /// `unlocked` tells whether anyone is reading the terminal; prompts are
    /// only printed once that is the case. Every keystroke seen by a step
    /// is consumed, whether or not it meant anything in the current state.
    pub fn step<T, W>(&mut self, unlocked: bool, target: &mut T, out: &mut W) -> UiState
    where
        T: RecoveryTarget + ?Sized,
        W: Write + ?Sized,
    {
        let key = self.key.take();
        let next = match (self.state, key) {
            (UiState::Idle, _) if !unlocked => UiState::Idle,
            (UiState::Idle, _) => Self::inspect(target, out),

            (UiState::AwaitBackup, Some(b'b')) => self.attempt(Operation::Backup, target, out),
            (UiState::AwaitUpdate, Some(b'u')) | (UiState::AwaitRestoreOrUpdate, Some(b'u')) => {
                self.attempt(Operation::Update, target, out)
            }
            (UiState::AwaitRestoreOrUpdate, Some(b'r')) | (UiState::AwaitRestoreOnly, Some(b'r')) => {
                self.attempt(Operation::Restore, target, out)
            }

            (UiState::Done, _) => {
                let _ = out.write_str("You can now disconnect the device\n\n");
                UiState::Finished
            }
            (state, Some(other)) => {
                log::debug!("Ignoring key 0x{:02X} in {:?}", other, state);
                state
            }
            (state, None) => state,
        };

        if next != self.state {
            log::info!("Recovery: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
        next
    }

    fn inspect<T, W>(target: &mut T, out: &mut W) -> UiState
    where
        T: RecoveryTarget + ?Sized,
        W: Write + ?Sized,
    {
        let _ = out.write_str("\n\n");
        let backup = target.backup_state();
        log::info!("Backup region: {:?}", backup);

        if target.bootloader_current() {
            let _ = out.write_str("Current bootloader is the same as the one we carry.\n");
            return match backup {
                BackupState::Differs => {
                    let _ = out.write_str(
                        "But there is a different backup.\nType 'r' to restore the backup\n",
                    );
                    UiState::AwaitRestoreOnly
                }
                BackupState::Absent | BackupState::Matches => {
                    let _ = out.write_str("Nothing to update\n");
                    UiState::Done
                }
            };
        }

        let prompt = match backup {
            BackupState::Absent => "First we need to make a backup.\nType 'b' to proceed\n",
            BackupState::Matches => {
                "Bootloader already backed up.\nType 'u' to update the bootloader\n"
            }
            BackupState::Differs => {
                "Backup found.\nType 'r' to restore the backup\nOr type 'u' to update the bootloader\n"
            }
        };
        let _ = out.write_str(prompt);
        match backup {
            BackupState::Absent => UiState::AwaitBackup,
            BackupState::Matches => UiState::AwaitUpdate,
            BackupState::Differs => UiState::AwaitRestoreOrUpdate,
        }
    }

    /// Run `op`; on failure stay put and ask for the same key again
    fn attempt<T, W>(&self, op: Operation, target: &mut T, out: &mut W) -> UiState
    where
        T: RecoveryTarget + ?Sized,
        W: Write + ?Sized,
    {
        match Self::run(op, target, out) {
            Ok(()) if op == Operation::Backup => {
                let _ = out.write_str("Type 'u' to update the bootloader\n");
                UiState::AwaitUpdate
            }
            Ok(()) => UiState::Done,
            Err(_) => {
                let _ = writeln!(out, "Type '{}' to retry", char::from(op.key()));
                self.state
            }
        }
    }

    fn run<T, W>(op: Operation, target: &mut T, out: &mut W) -> Result<(), RecoveryError>
    where
        T: RecoveryTarget + ?Sized,
        W: Write + ?Sized,
    {
        let _ = out.write_str(op.banner());
        log::info!("{}", op.banner());

        let result = {
            let mut dots = DotProgress::new(&mut *out);
            match op {
                Operation::Backup => target.backup(&mut dots),
                Operation::Update => target.update(&mut dots),
                Operation::Restore => target.restore(&mut dots),
            }
        };

        let _ = match &result {
            Ok(()) => writeln!(out, "\n{}", op.success()),
            Err(e) => {
                log::error!("{}: {}", op.failure(), e);
                writeln!(out, "\n{}: {}", op.failure(), e)
            }
        };
        result
    }
}

impl fmt::Display for UiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitBackup => "waiting for backup",
            Self::AwaitUpdate => "waiting for update",
            Self::AwaitRestoreOrUpdate => "waiting for restore or update",
            Self::AwaitRestoreOnly => "waiting for restore",
            Self::Done => "done",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BulkFailure, Error};
    use std::string::String;

    struct FakeTarget {
        backup: BackupState,
        current: bool,
        fail_backup: bool,
        fail_update: bool,
        fail_restore: bool,
        blocks: usize,
        calls: std::vec::Vec<&'static str>,
    }

    impl FakeTarget {
        fn new(backup: BackupState, current: bool) -> Self {
            Self {
                backup,
                current,
                fail_backup: false,
                fail_update: false,
                fail_restore: false,
                blocks: 3,
                calls: std::vec::Vec::new(),
            }
        }

        fn blocks(&self, progress: &mut dyn Progress) {
            for i in 0..self.blocks {
                progress.block_done(i as u32 * 64, 64);
            }
        }
    }

    impl RecoveryTarget for FakeTarget {
        fn backup_state(&mut self) -> BackupState {
            self.backup
        }

        fn bootloader_current(&mut self) -> bool {
            self.current
        }

        fn backup(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
            self.calls.push("backup");
            if self.fail_backup {
                return Err(RecoveryError::Flash(BulkFailure {
                    offset: 128,
                    error: Error::FlashLocked,
                }));
            }
            self.blocks(progress);
            self.backup = BackupState::Matches;
            Ok(())
        }

        fn update(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
            self.calls.push("update");
            self.blocks(progress);
            if self.fail_update {
                return Err(RecoveryError::Flash(BulkFailure {
                    offset: 64,
                    error: Error::FlashLocked,
                }));
            }
            self.current = true;
            Ok(())
        }

        fn restore(&mut self, progress: &mut dyn Progress) -> Result<(), RecoveryError> {
            self.calls.push("restore");
            self.blocks(progress);
            if self.fail_restore {
                return Err(RecoveryError::Verify { offset: 5 });
            }
            Ok(())
        }
    }

    fn step(rec: &mut Recovery, target: &mut FakeTarget) -> String {
        let mut out = String::new();
        rec.step(true, target, &mut out);
        out
    }

    #[test]
    fn test_waits_for_link() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Absent, false);
        let mut out = String::new();
        rec.key_pressed(b'b');
        assert_eq!(rec.step(false, &mut target, &mut out), UiState::Idle);
        assert!(out.is_empty());
        assert_eq!(rec.pending_key(), None);
    }

    #[test]
    fn test_fresh_device_asks_for_backup() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Absent, false);

        assert!(step(&mut rec, &mut target).contains("Type 'b'"));
        assert_eq!(rec.state(), UiState::AwaitBackup);

        rec.key_pressed(b'u');
        assert!(step(&mut rec, &mut target).is_empty());
        assert_eq!(rec.state(), UiState::AwaitBackup);
        assert!(target.calls.is_empty());
        assert_eq!(rec.pending_key(), None);

        rec.key_pressed(b'b');
        let out = step(&mut rec, &mut target);
        assert!(out.starts_with("Backing up...\nBackup is done\n"));
        assert!(out.contains("Type 'u'"));
        assert_eq!(rec.state(), UiState::AwaitUpdate);
    }

    #[test]
    fn test_backup_failure_reprompts() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Absent, false);
        target.fail_backup = true;
        step(&mut rec, &mut target);

        rec.key_pressed(b'b');
        let out = step(&mut rec, &mut target);
        assert!(out.contains("Backup failed: error writing block at offset 128"));
        assert!(out.ends_with("Type 'b' to retry\n"));
        assert_eq!(rec.state(), UiState::AwaitBackup);
    }

    #[test]
    fn test_update_failure_allows_retry() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Matches, false);
        target.fail_update = true;
        step(&mut rec, &mut target);

        rec.key_pressed(b'u');
        let out = step(&mut rec, &mut target);
        assert!(out.contains("Writing bootloader failed: error writing block at offset 64"));
        assert!(out.ends_with("Type 'u' to retry\n"));
        assert!(!out.contains("disconnect"));
        assert_eq!(rec.state(), UiState::AwaitUpdate);

        // idle steps do not finish the session
        assert!(step(&mut rec, &mut target).is_empty());
        assert_eq!(rec.state(), UiState::AwaitUpdate);

        target.fail_update = false;
        rec.key_pressed(b'u');
        assert!(step(&mut rec, &mut target).contains("Bootloader written"));
        assert_eq!(rec.state(), UiState::Done);
        assert_eq!(target.calls, ["update", "update"]);
    }

    #[test]
    fn test_restore_failure_allows_retry() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Differs, false);
        target.fail_restore = true;
        step(&mut rec, &mut target);

        rec.key_pressed(b'r');
        let out = step(&mut rec, &mut target);
        assert!(out.contains("Restoring backup failed"));
        assert!(out.ends_with("Type 'r' to retry\n"));
        assert_eq!(rec.state(), UiState::AwaitRestoreOrUpdate);

        // the other option is still offered
        rec.key_pressed(b'u');
        step(&mut rec, &mut target);
        assert_eq!(rec.state(), UiState::Done);
        assert_eq!(target.calls, ["restore", "update"]);

        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Differs, true);
        target.fail_restore = true;
        step(&mut rec, &mut target);
        rec.key_pressed(b'r');
        step(&mut rec, &mut target);
        assert_eq!(rec.state(), UiState::AwaitRestoreOnly);
    }

    #[test]
    fn test_backed_up_device_updates_once() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Matches, false);

        assert!(step(&mut rec, &mut target).contains("Type 'u'"));
        rec.key_pressed(b'u');
        let out = step(&mut rec, &mut target);
        assert_eq!(out, "Writing bootloader...\nBootloader written\n");
        assert_eq!(rec.state(), UiState::Done);
        assert_eq!(target.calls, ["update"]);

        rec.key_pressed(b'u');
        assert_eq!(
            step(&mut rec, &mut target),
            "You can now disconnect the device\n\n"
        );
        assert_eq!(rec.state(), UiState::Finished);

        for key in [b'u', b'r', b'b'] {
            rec.key_pressed(key);
            assert!(step(&mut rec, &mut target).is_empty());
        }
        assert_eq!(target.calls, ["update"]);
    }

    #[test]
    fn test_different_backup_offers_both() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Differs, false);
        let out = step(&mut rec, &mut target);
        assert!(out.contains("Type 'r'") && out.contains("type 'u'"));
        assert_eq!(rec.state(), UiState::AwaitRestoreOrUpdate);

        rec.key_pressed(b'r');
        assert!(step(&mut rec, &mut target).contains("Backup restored"));
        assert_eq!(target.calls, ["restore"]);
        assert_eq!(rec.state(), UiState::Done);
    }

    #[test]
    fn test_current_bootloader() {
        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Matches, true);
        assert!(step(&mut rec, &mut target).contains("Nothing to update"));
        assert_eq!(rec.state(), UiState::Done);

        let mut rec = Recovery::new();
        let mut target = FakeTarget::new(BackupState::Differs, true);
        assert!(step(&mut rec, &mut target).contains("Type 'r' to restore"));
        assert_eq!(rec.state(), UiState::AwaitRestoreOnly);

        rec.key_pressed(b'u');
        step(&mut rec, &mut target);
        assert_eq!(rec.state(), UiState::AwaitRestoreOnly);

        rec.key_pressed(b'r');
        step(&mut rec, &mut target);
        assert_eq!(rec.state(), UiState::Done);
        assert_eq!(target.calls, ["restore"]);
    }

    #[test]
    fn test_zero_key_clears() {
        let mut rec = Recovery::new();
        rec.key_pressed(b'b');
        rec.key_pressed(0);
        assert_eq!(rec.pending_key(), None);
    }
}
