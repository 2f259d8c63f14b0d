//! DMDATA0/DMDATA1 access and link state

use crate::hal::RegisterBus;
use crate::regs::Reg;

/// Read both mailbox registers
pub fn read<B: RegisterBus + ?Sized>(bus: &mut B) -> (u32, u32) {
    (bus.read(Reg::DmData0), bus.read(Reg::DmData1))
}

/// Whether a debugger has parked the same nonzero value in both registers
pub fn peer_present<B: RegisterBus + ?Sized>(bus: &mut B) -> bool {
    let (data0, data1) = read(bus);
    data0 == data1 && data0 != 0
}

/// Clear both registers, telling the writer its value was consumed
pub fn clear<B: RegisterBus + ?Sized>(bus: &mut B) {
    bus.write(Reg::DmData0, 0);
    bus.write(Reg::DmData1, 0);
}

/// Mailbox link state for the session
///
/// The link latches to unlocked the first time DMDATA0 holds a nonzero
/// value different from DMDATA1, and never relocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    unlocked: bool,
    rx_count: u32,
}

impl Link {
    /// A link that has not seen any traffic yet
    pub const fn new() -> Self {
        Self {
            unlocked: false,
            rx_count: 0,
        }
    }

    /// Sample the mailbox and latch the link if traffic is present
    ///
    /// Returns the (possibly updated) link state.
    pub fn observe<B: RegisterBus + ?Sized>(&mut self, bus: &mut B) -> bool {
        if !self.unlocked {
            let (data0, data1) = read(bus);
            if data0 != data1 && data0 != 0 {
                log::info!("Mailbox link up (DMDATA0=0x{:08X})", data0);
                self.unlocked = true;
            }
        }
        self.unlocked
    }

    /// Whether the mailbox may be used as a terminal
    pub const fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Count bytes received from the host terminal
    pub fn count_rx(&mut self, bytes: u32) {
        self.rx_count = self.rx_count.wrapping_add(bytes);
    }

    /// Bytes received from the host terminal since the last reset
    pub const fn rx_count(&self) -> u32 {
        self.rx_count
    }

    /// Restart the receive counter
    pub fn reset_rx_count(&mut self) {
        self.rx_count = 0;
    }
}
