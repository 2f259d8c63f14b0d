//! Outbound terminal text
//!
//! Text is queued and sent through the mailbox using the debug printf
//! framing understood by host terminals: byte 0 of DMDATA0 is
//! `0x80 | (n + 4)` for `n` characters, bytes 1-3 of DMDATA0 and bytes 0-3
//! of DMDATA1 carry up to 7 characters. DMDATA1 is written first. A new
//! frame may only be written once the host has cleared bit 7 of DMDATA0.
//!
//! A debugger terminal sends keystrokes the other way with the same layout
//! but bit 7 clear. Such a frame is read and DMDATA0 cleared before the
//! next outbound frame goes in.

use core::fmt;

use heapless::Deque;

use crate::hal::RegisterBus;
use crate::regs::Reg;

/// Bytes of text the console buffers before dropping output
pub const CONSOLE_CAPACITY: usize = 256;
/// Characters carried by one mailbox frame
pub const FRAME_CHARS: usize = 7;

const FRAME_VALID: u32 = 0x80;

/// Characters decoded from one frame
pub type Frame = heapless::Vec<u8, FRAME_CHARS>;

/// Pack up to 7 characters into a (DMDATA0, DMDATA1) pair
pub fn encode_frame(chars: &[u8]) -> (u32, u32) {
    let n = core::cmp::min(chars.len(), FRAME_CHARS);
    let mut bytes = [0u8; 8];
    bytes[0] = (FRAME_VALID | (n as u32 + 4)) as u8;
    bytes[1..1 + n].copy_from_slice(&chars[..n]);
    (
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    )
}

/// Unpack a frame, `None` if DMDATA0 does not hold one
pub fn decode_frame(data0: u32, data1: u32) -> Option<Frame> {
    if data0 & FRAME_VALID == 0 {
        return None;
    }
    let n = ((data0 & 0x0F) as usize).saturating_sub(4).min(FRAME_CHARS);
    let d0 = data0.to_le_bytes();
    let d1 = data1.to_le_bytes();
    Some(
        d0[1..]
            .iter()
            .chain(d1.iter())
            .take(n)
            .copied()
            .collect(),
    )
}

/// Unpack a frame the host terminal wrote, `None` if DMDATA0 holds none
///
/// A value parked in both registers by a debugger is not input.
pub fn decode_input(data0: u32, data1: u32) -> Option<Frame> {
    if data0 & FRAME_VALID != 0 || data0 == data1 {
        return None;
    }
    let n = ((data0 & 0x3F) as usize).checked_sub(4)?;
    if n == 0 || n > FRAME_CHARS {
        return None;
    }
    let d0 = data0.to_le_bytes();
    let d1 = data1.to_le_bytes();
    Some(d0[1..].iter().chain(d1.iter()).take(n).copied().collect())
}

/// Read pending terminal input and clear DMDATA0
pub fn take_input<B: RegisterBus + ?Sized>(bus: &mut B) -> Option<Frame> {
    let input = decode_input(bus.read(Reg::DmData0), bus.read(Reg::DmData1))?;
    bus.write(Reg::DmData0, 0);
    Some(input)
}

/// Queue of text waiting to go out through the mailbox
#[derive(Debug, Default)]
pub struct Console {
    queue: Deque<u8, CONSOLE_CAPACITY>,
    dropped: usize,
}

impl Console {
    /// An empty console
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    /// Queue raw bytes, dropping whatever does not fit
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut lost = 0;
        for &b in bytes {
            if self.queue.push_back(b).is_err() {
                lost += 1;
            }
        }
        if lost > 0 {
            self.dropped += lost;
            log::warn!("Console full, dropped {} bytes", lost);
        }
    }

    /// Bytes waiting to be sent
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes lost to overflow
    pub const fn dropped(&self) -> usize {
        self.dropped
    }

    fn mailbox_free<B: RegisterBus + ?Sized>(bus: &mut B) -> bool {
        bus.read(Reg::DmData0) & FRAME_VALID == 0
    }

    fn send<B: RegisterBus + ?Sized>(bus: &mut B, chars: &[u8]) {
        let (data0, data1) = encode_frame(chars);
        bus.write(Reg::DmData1, data1);
        bus.write(Reg::DmData0, data0);
    }

    /// Send the next frame if the host consumed the previous one
    ///
    /// Returns whether a frame was written.
    pub fn pump<B: RegisterBus + ?Sized>(&mut self, bus: &mut B) -> bool {
        if self.queue.is_empty() || !Self::mailbox_free(bus) {
            return false;
        }
        let mut chars = [0u8; FRAME_CHARS];
        let mut n = 0;
        while n < FRAME_CHARS {
            match self.queue.pop_front() {
                Some(b) => {
                    chars[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Self::send(bus, &chars[..n]);
        true
    }

    /// Send a single character frame when there is nothing else to send
    ///
    /// Keeps traffic flowing so the host terminal sees the firmware alive.
    pub fn acknowledge<B: RegisterBus + ?Sized>(&mut self, bus: &mut B, byte: u8) -> bool {
        if !self.queue.is_empty() || !Self::mailbox_free(bus) {
            return false;
        }
        Self::send(bus, &[byte]);
        true
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}
