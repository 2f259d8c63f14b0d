//! Bootloader recovery
//!
//! [`Recovery`] is the terminal driven state machine that walks the user
//! through backing up the live bootloader, replacing it with the candidate
//! image, or restoring the backup. It talks to flash only through
//! [`RecoveryTarget`]; [`FlashTarget`] is the implementation on top of the
//! flash engine.

mod machine;
mod state;
mod target;

pub use machine::{DotProgress, Recovery, UiState};
pub use state::{bootloader_matches, classify_backup, BackupState};
pub use target::{FlashTarget, RecoveryTarget};
