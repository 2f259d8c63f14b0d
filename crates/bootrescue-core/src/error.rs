//! Error types for bootrescue-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Details about an erase failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseFailure {
    /// Controller was still locked when the erase was requested
    Locked {
        /// Page address
        addr: u32,
    },
    /// Address is not on a page boundary
    Misaligned {
        /// Requested address
        addr: u32,
    },
    /// Erase verification failed - first word not erased
    VerifyFailed {
        /// Page address
        addr: u32,
        /// The word read back (should be 0xFFFFFFFF)
        found: u32,
    },
}

/// Details about a program failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Controller was still locked when the write was requested
    Locked {
        /// Destination address
        addr: u32,
    },
    /// Readback of the first programmed word did not match
    VerifyFailed {
        /// Block address
        addr: u32,
        /// Word that should have landed
        expected: u32,
        /// Word read back
        found: u32,
    },
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Unlock key sequence did not clear the lock bits
    FlashLocked,
    /// Page erase failed
    EraseFailed(EraseFailure),
    /// Block program failed
    WriteFailed(WriteFailure),
    /// Write requested with no data
    EmptyWrite,
    /// Candidate image does not fit the backup or bootloader region
    ImageTooLarge {
        /// Image length in bytes
        len: usize,
        /// Largest length the layout accepts
        max: usize,
    },
    /// Region layout is unusable (misaligned or backup too small)
    InvalidLayout,
}

impl Error {
    /// Whether this error happened while erasing (as opposed to programming)
    pub fn is_erase(&self) -> bool {
        matches!(self, Self::EraseFailed(_))
    }
}

impl fmt::Display for EraseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked { addr } => write!(f, "flash locked erasing page 0x{:08X}", addr),
            Self::Misaligned { addr } => write!(f, "page address 0x{:08X} not aligned", addr),
            Self::VerifyFailed { addr, found } => write!(
                f,
                "erase verify failed at 0x{:08X}: found 0x{:08X}",
                addr, found
            ),
        }
    }
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked { addr } => write!(f, "flash locked writing 0x{:08X}", addr),
            Self::VerifyFailed {
                addr,
                expected,
                found,
            } => write!(
                f,
                "write verify failed at 0x{:08X}: expected 0x{:08X}, found 0x{:08X}",
                addr, expected, found
            ),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlashLocked => write!(f, "flash still locked after unlock sequence"),
            Self::EraseFailed(failure) => write!(f, "{}", failure),
            Self::WriteFailed(failure) => write!(f, "{}", failure),
            Self::EmptyWrite => write!(f, "empty write"),
            Self::ImageTooLarge { len, max } => {
                write!(f, "image of {} bytes exceeds {} byte region", len, max)
            }
            Self::InvalidLayout => write!(f, "invalid region layout"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

/// A failure while erasing a run of pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFailure {
    /// Index of the failing page, counted from the start of the run
    pub index: u32,
    /// Underlying error
    pub error: Error,
}

impl fmt::Display for PageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}: {}", self.index, self.error)
    }
}

/// A failure part-way through a bulk write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkFailure {
    /// Byte offset of the failing block, relative to the destination start
    pub offset: u32,
    /// Underlying error
    pub error: Error,
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = if self.error.is_erase() {
            "erasing"
        } else {
            "writing"
        };
        write!(
            f,
            "error {} block at offset {}: {}",
            phase, self.offset, self.error
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BulkFailure {}

/// Failure of a whole recovery operation (backup, update, restore)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryError {
    /// Flash could not be unlocked
    Unlock(Error),
    /// Erase or program failed part-way through
    Flash(BulkFailure),
    /// Region contents did not match the source after programming
    Verify {
        /// First mismatching byte offset
        offset: u32,
    },
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlock(e) => write!(f, "unlock failed: {}", e),
            Self::Flash(failure) => write!(f, "{}", failure),
            Self::Verify { offset } => write!(f, "verify mismatch at offset {}", offset),
        }
    }
}

impl From<BulkFailure> for RecoveryError {
    fn from(failure: BulkFailure) -> Self {
        Self::Flash(failure)
    }
}
