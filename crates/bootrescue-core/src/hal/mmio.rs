//! Direct memory-mapped register access

use super::RegisterBus;
use crate::regs::Reg;

/// Register bus backed by volatile loads and stores
///
/// Only meaningful when running on the target itself.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create the bus
    ///
    /// # Safety
    ///
    /// Must only be used on the CH32V003 itself, and only one instance may
    /// drive the flash controller at a time.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBus for Mmio {
    fn read(&mut self, reg: Reg) -> u32 {
        self.read_word(reg.addr())
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.write_word(reg.addr(), value)
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        // SAFETY: `Mmio::new` requires running on the target, where every
        // address the rescue logic uses is a valid peripheral or flash word.
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        // SAFETY: see `read_word`.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }
}
