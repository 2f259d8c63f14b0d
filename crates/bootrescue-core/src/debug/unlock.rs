//! Debug port unlock
//!
//! Works around a CH32V003 erratum: after the SWIO pin has been taken over
//! by firmware, a debugger cannot re-enable output from the debug module on
//! its own. The firmware hands the pin back to the debug block and replays
//! the configuration writes itself, with the bit timing supplied by the
//! host.

use super::mailbox::{self, Link};
use crate::hal::{DebugWire, RegisterBus};
use crate::regs::{
    DmReg, Reg, AFIO_PCFR1_SWJ_CFG, GPIO_CNF_OUT_PP, GPIO_SPEED_50MHZ, SWIO_PIN,
};

/// DMCFGR/DMSHDWCFGR: key 0x5AA5 with output from the debug slave enabled
pub const DM_OUTPUT_ENABLE: u32 = 0x5aa5_0000 | (1 << 10);
/// DMCONTROL: halt request, debug module active
pub const DM_CONTROL_HALT: u32 = 0x8000_0001 | (1 << 10);
/// DMCONTROL: resume request, debug module active
pub const DM_CONTROL_RESUME: u32 = 0x4000_0001 | (1 << 10);

fn swio_push_pull<B: RegisterBus + ?Sized>(bus: &mut B) {
    let shift = 4 * SWIO_PIN;
    let cfglr = bus.read(Reg::GpiodCfglr) & !(0xF << shift);
    bus.write(
        Reg::GpiodCfglr,
        cfglr | ((GPIO_SPEED_50MHZ | GPIO_CNF_OUT_PP) << shift),
    );
}

/// Reopen the debug port
///
/// Only acts when a debugger has parked the same nonzero value in both
/// mailbox registers; otherwise nothing is touched and `false` is
/// returned. Resets the terminal receive counter on success.
pub fn attempt_unlock<B, W>(bus: &mut B, wire: &mut W, link: &mut Link, t1coeff: u8) -> bool
where
    B: RegisterBus + ?Sized,
    W: DebugWire + ?Sized,
{
    if !mailbox::peer_present(bus) {
        log::debug!("Debug unlock requested without a debugger on the mailbox");
        return false;
    }
    log::info!("Unlocking debug port (t1coeff={})", t1coeff);

    let pcfr1 = bus.read(Reg::AfioPcfr1);
    bus.write(Reg::AfioPcfr1, pcfr1 & !AFIO_PCFR1_SWJ_CFG);
    swio_push_pull(bus);

    wire.write_reg32(DmReg::ShadowCfgr, DM_OUTPUT_ENABLE, t1coeff);
    wire.write_reg32(DmReg::Cfgr, DM_OUTPUT_ENABLE, t1coeff);
    wire.write_reg32(DmReg::Cfgr, DM_OUTPUT_ENABLE, t1coeff);
    wire.write_reg32(DmReg::AbstractAuto, 0, t1coeff);
    wire.write_reg32(DmReg::Control, DM_CONTROL_HALT, t1coeff);
    wire.write_reg32(DmReg::Control, DM_CONTROL_RESUME, t1coeff);

    link.reset_rx_count();
    true
}
