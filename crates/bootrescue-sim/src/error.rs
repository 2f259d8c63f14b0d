//! Emulator errors

use thiserror::Error;

/// Errors raised by the emulator and session runner
#[derive(Debug, Error)]
pub enum SimError {
    #[error("address 0x{addr:08X} is not mapped to flash")]
    Unmapped { addr: u32 },

    #[error("range 0x{addr:08X}+{len} runs past the end of its flash area")]
    OutOfRange { addr: u32, len: usize },

    #[error("firmware rejected its configuration: {0}")]
    Firmware(#[from] bootrescue_core::Error),

    #[error("session stalled after {iterations} iterations waiting for {waiting_for}")]
    Stalled {
        iterations: usize,
        waiting_for: String,
    },
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, SimError>;
