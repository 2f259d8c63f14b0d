//! bootrescue-core - Bootloader rescue logic for CH32V003-class MCUs
//!
//! This crate holds everything the rescue firmware does between the USB HID
//! stack and the flash controller: the flash programming engine, the debug
//! mailbox plumbing, the HID feature report bridge and the recovery state
//! machine that ties them together. It is `no_std` and talks to hardware
//! only through the traits in [`hal`], so the same code runs on silicon
//! (via [`hal::Mmio`]) and against the emulator in `bootrescue-sim`.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable heap allocation
//!
//! # Example
//!
//! ```ignore
//! use bootrescue_core::firmware::Firmware;
//! use bootrescue_core::layout::{CandidateImage, Layout};
//!
//! static IMAGE: &[u8] = include_bytes!("bootloader.bin");
//!
//! fn main() -> ! {
//!     let bus = unsafe { bootrescue_core::hal::Mmio::new() };
//!     let mut firmware = Firmware::new(bus, usb, swio, platform, Layout::CH32V003,
//!         CandidateImage::new(IMAGE)).unwrap();
//!     firmware.run()
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod bridge;
pub mod debug;
pub mod error;
pub mod firmware;
pub mod flash;
pub mod hal;
pub mod layout;
pub mod recovery;
pub mod regs;
pub mod system;

pub use error::{Error, Result};
