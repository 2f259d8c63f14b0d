//! Reset into the factory bootloader

use crate::hal::{Platform, RegisterBus};
use crate::regs::{Reg, Statr, KEY1, KEY2, PFIC_CFGR_SYSRESET, RCC_RSTSCKR_RMVF};

/// Arm the boot mode flag and trigger a system reset
///
/// Interrupts are masked first. On silicon the reset takes effect right
/// after the PFIC write; the caller must not touch the chip afterwards.
pub fn request_bootloader_reset<B, P>(bus: &mut B, platform: &mut P)
where
    B: RegisterBus + ?Sized,
    P: Platform + ?Sized,
{
    log::info!("Rebooting into the factory bootloader");
    platform.disable_interrupts();

    bus.write(Reg::FlashBootModekeyr, KEY1);
    bus.write(Reg::FlashBootModekeyr, KEY2);
    bus.write(Reg::FlashStatr, Statr::MODE.bits());

    let rstsckr = bus.read(Reg::RccRstsckr);
    bus.write(Reg::RccRstsckr, rstsckr | RCC_RSTSCKR_RMVF);
    bus.write(Reg::PficCfgr, PFIC_CFGR_SYSRESET);
}

/// [`request_bootloader_reset`], then park until the reset hits
pub fn reboot_to_bootloader<B, P>(bus: &mut B, platform: &mut P) -> !
where
    B: RegisterBus + ?Sized,
    P: Platform + ?Sized,
{
    request_bootloader_reset(bus, platform);
    platform.wait_for_reset()
}
