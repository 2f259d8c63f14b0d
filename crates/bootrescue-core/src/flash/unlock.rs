//! Key sequences that open the flash controller

use crate::error::{Error, Result};
use crate::hal::RegisterBus;
use crate::regs::{Ctlr, Reg, KEY1, KEY2};

fn write_keys<B: RegisterBus + ?Sized>(bus: &mut B, reg: Reg) {
    bus.write(reg, KEY1);
    bus.write(reg, KEY2);
}

/// Unlock the flash controller for erase and fast page programming
///
/// The main controller and fast programming mode are always unlocked.
/// `option_bytes` additionally unlocks the option byte area, `boot_mode`
/// the boot area and the boot mode flag (needed to touch the bootloader
/// region).
///
/// Returns [`Error::FlashLocked`] if LOCK or FLOCK is still set afterwards.
pub fn unlock<B: RegisterBus + ?Sized>(
    bus: &mut B,
    option_bytes: bool,
    boot_mode: bool,
) -> Result<()> {
    write_keys(bus, Reg::FlashKeyr);
    if option_bytes {
        write_keys(bus, Reg::FlashObkeyr);
    }
    if boot_mode {
        write_keys(bus, Reg::FlashBootModekeyr);
    }
    write_keys(bus, Reg::FlashModekeyr);

    let ctlr = bus.read(Reg::FlashCtlr);
    log::debug!("FLASH_CTLR after unlock: 0x{:08X}", ctlr);
    if is_locked_value(ctlr) {
        log::error!("Flash still locked");
        return Err(Error::FlashLocked);
    }
    Ok(())
}

/// Relock the controller
pub fn lock<B: RegisterBus + ?Sized>(bus: &mut B) {
    bus.write(Reg::FlashCtlr, Ctlr::LOCK.bits());
}

/// Whether erase/program is currently refused
pub fn is_locked<B: RegisterBus + ?Sized>(bus: &mut B) -> bool {
    is_locked_value(bus.read(Reg::FlashCtlr))
}

fn is_locked_value(ctlr: u32) -> bool {
    Ctlr::from_bits_retain(ctlr).intersects(Ctlr::LOCKED)
}
