//! Hardware access traits
//!
//! Everything the rescue logic does to the chip goes through one of these
//! traits:
//!
//! - [`RegisterBus`] - named peripheral registers plus word access to flash
//! - [`DebugWire`] - writes to debug module registers over the single-wire
//!   debug interface (provided by the external SWIO library)
//! - [`Platform`] - delays and interrupt masking
//!
//! [`Mmio`] implements [`RegisterBus`] with volatile accesses for real
//! silicon. Test harnesses substitute an emulated register bank.

mod mmio;
#[cfg(test)]
pub(crate) mod mock;

pub use mmio::Mmio;

use crate::regs::{Reg, Statr};

/// Access to memory-mapped registers and flash memory
pub trait RegisterBus {
    /// Read a 32-bit register
    fn read(&mut self, reg: Reg) -> u32;

    /// Write a 32-bit register
    fn write(&mut self, reg: Reg, value: u32);

    /// Read the flash word at an absolute, word-aligned address
    fn read_word(&mut self, addr: u32) -> u32;

    /// Store a word at an absolute flash address
    ///
    /// Outside of page programming mode flash ignores stores; during page
    /// programming the store lands in the page buffer.
    fn write_word(&mut self, addr: u32, value: u32);

    /// Block until the flash controller is no longer busy
    ///
    /// There is no timeout: a stuck busy bit hangs the caller. Emulators
    /// override this to complete immediately.
    fn wait_idle(&mut self) {
        while self.read(Reg::FlashStatr) & Statr::BSY.bits() != 0 {
            core::hint::spin_loop();
        }
    }

    /// Read a single byte of flash at any address
    fn read_byte(&mut self, addr: u32) -> u8 {
        let word = self.read_word(addr & !3);
        (word >> ((addr & 3) * 8)) as u8
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn read(&mut self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        (**self).read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        (**self).write_word(addr, value)
    }

    fn wait_idle(&mut self) {
        (**self).wait_idle()
    }

    fn read_byte(&mut self, addr: u32) -> u8 {
        (**self).read_byte(addr)
    }
}

/// Single-wire debug interface
///
/// The bit-level signalling lives in an external library; the rescue logic
/// only needs register writes with an explicit timing coefficient.
pub trait DebugWire {
    /// Write a debug module register
    ///
    /// `t1coeff` scales the bit timing and is supplied by the host.
    fn write_reg32(&mut self, reg: crate::regs::DmReg, value: u32, t1coeff: u8);
}

/// Platform services outside the flash controller
pub trait Platform {
    /// Busy-wait for the given number of milliseconds
    fn delay_ms(&mut self, ms: u32);

    /// Mask all interrupts
    fn disable_interrupts(&mut self);

    /// Park the CPU until a requested reset takes effect
    fn wait_for_reset(&mut self) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }
}
