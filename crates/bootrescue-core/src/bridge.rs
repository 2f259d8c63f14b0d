//! HID feature report bridge
//!
//! The external USB stack calls the [`FeatureReports`] hooks while it is
//! polled. Feature report [`TERMINAL_FEATURE_ID`] is the terminal: reads
//! return the current mailbox frame, writes carry a single keystroke. Every
//! other feature id is the command channel, assembled from 8 byte chunks
//! into an 80 byte scratch buffer and handed to the main loop once complete.

use crate::debug::Link;
use crate::hal::RegisterBus;
use crate::regs::Reg;

/// Feature report id of the terminal channel
pub const TERMINAL_FEATURE_ID: u8 = 0xAB;
/// Size of the command scratch buffer
pub const SCRATCH_LEN: usize = 80;
/// Bytes per set-report data stage
pub const CHUNK_LEN: usize = 8;
/// Length of a terminal report
pub const TERMINAL_LEN: usize = 8;
/// Terminal contents before the mailbox link is up: a 6 character frame
/// reading "dmlock"
pub const TERMINAL_TAG: [u8; TERMINAL_LEN] = [0x8A, b'd', b'm', b'l', b'o', b'c', b'k', 0];

/// Reset into the factory bootloader
pub const OP_REBOOT_BOOTLOADER: u8 = 0xA1;
/// Reopen the debug port, payload byte is the timing coefficient
pub const OP_DEBUG_UNLOCK: u8 = 0xA5;

/// Hooks the USB stack calls for HID feature reports
pub trait FeatureReports {
    /// Host requested a feature report; returns the bytes to send
    fn get_report_start(&mut self, feature_id: u8, req_len: usize) -> &[u8];

    /// Host is about to send a feature report of `req_len` bytes
    fn set_report_start(&mut self, feature_id: u8, req_len: usize);

    /// One data stage (up to 8 bytes) of the report being sent
    fn set_report_data(&mut self, data: &[u8]);
}

/// The external USB device stack
pub trait HidTransport {
    /// Service the bus once, invoking hooks on `reports` as needed
    fn poll<H: FeatureReports + ?Sized>(&mut self, reports: &mut H);
}

/// Decoded command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reset into the factory bootloader
    RebootToBootloader,
    /// Reopen the debug port
    DebugUnlock {
        /// Bit timing coefficient for the debug wire
        t1coeff: u8,
    },
    /// Anything else; ignored
    Unknown(u8),
}

/// A completed command report
///
/// Byte 0 is the report id, byte 1 the opcode, the rest is payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    bytes: [u8; SCRATCH_LEN],
    len: usize,
}

impl PendingCommand {
    /// Opcode byte
    pub fn opcode(&self) -> u8 {
        self.bytes[1]
    }

    /// Bytes following the opcode, up to the declared length
    pub fn payload(&self) -> &[u8] {
        self.bytes.get(2..self.len).unwrap_or(&[])
    }

    /// Declared report length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the report declared no data at all
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Interpret the opcode
    pub fn decode(&self) -> Command {
        match self.opcode() {
            OP_REBOOT_BOOTLOADER => Command::RebootToBootloader,
            OP_DEBUG_UNLOCK => Command::DebugUnlock {
                t1coeff: self.bytes[2],
            },
            other => Command::Unknown(other),
        }
    }
}

/// Feature report state
#[derive(Debug, Clone)]
pub struct HidBridge {
    terminal: [u8; TERMINAL_LEN],
    scratch: [u8; SCRATCH_LEN],
    feature_id: u8,
    declared: usize,
    chunks: usize,
    pending: Option<PendingCommand>,
}

impl Default for HidBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HidBridge {
    /// Fresh bridge with the "dmlock" terminal tag
    pub const fn new() -> Self {
        Self {
            terminal: TERMINAL_TAG,
            scratch: [0; SCRATCH_LEN],
            feature_id: 0,
            declared: 0,
            chunks: 0,
            pending: None,
        }
    }

    /// Prepare the reply to a get-report request
    ///
    /// For the terminal, once the link is up the mailbox contents are moved
    /// into the terminal buffer and both registers cleared, telling the
    /// firmware side the frame was consumed.
    pub fn get_report_start<B: RegisterBus + ?Sized>(
        &mut self,
        bus: &mut B,
        link: &mut Link,
        feature_id: u8,
        req_len: usize,
    ) -> &[u8] {
        if feature_id == TERMINAL_FEATURE_ID {
            if link.observe(bus) {
                let data0 = bus.read(Reg::DmData0);
                let data1 = bus.read(Reg::DmData1);
                self.terminal[..4].copy_from_slice(&data0.to_le_bytes());
                self.terminal[4..].copy_from_slice(&data1.to_le_bytes());
                bus.write(Reg::DmData0, 0);
                bus.write(Reg::DmData1, 0);
            }
            &self.terminal
        } else {
            &self.scratch[..core::cmp::min(req_len, SCRATCH_LEN)]
        }
    }

    /// Start receiving a set-report transfer
    pub fn set_report_start(&mut self, feature_id: u8, req_len: usize) {
        self.feature_id = feature_id;
        self.declared = if feature_id == TERMINAL_FEATURE_ID {
            TERMINAL_LEN
        } else {
            core::cmp::min(req_len, SCRATCH_LEN)
        };
        self.chunks = 0;
    }

    /// Accept one data stage
    ///
    /// Returns the keystroke for terminal writes. Command writes return
    /// `None`; completion is published through [`Self::take_command`].
    pub fn set_report_data(&mut self, data: &[u8]) -> Option<u8> {
        if self.feature_id == TERMINAL_FEATURE_ID {
            return data.get(1).copied();
        }

        let offset = self.chunks * CHUNK_LEN;
        let room = self.declared.saturating_sub(offset);
        let n = core::cmp::min(room, data.len());
        if n == 0 {
            return None;
        }
        self.scratch[offset..offset + n].copy_from_slice(&data[..n]);
        self.chunks += 1;

        if self.chunks * CHUNK_LEN >= self.declared {
            log::debug!(
                "Command report complete: {} bytes, opcode 0x{:02X}",
                self.declared,
                self.scratch[1]
            );
            self.pending = Some(PendingCommand {
                bytes: self.scratch,
                len: self.declared,
            });
        }
        None
    }

    /// Take the completed command, if any; each command is returned once
    pub fn take_command(&mut self) -> Option<PendingCommand> {
        self.pending.take()
    }

    /// Current terminal buffer
    pub fn terminal(&self) -> &[u8; TERMINAL_LEN] {
        &self.terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockBus;

    fn send(bridge: &mut HidBridge, feature_id: u8, report: &[u8]) -> Option<u8> {
        bridge.set_report_start(feature_id, report.len());
        let mut key = None;
        for chunk in report.chunks(CHUNK_LEN) {
            key = bridge.set_report_data(chunk).or(key);
        }
        key
    }

    #[test]
    fn test_command_assembly() {
        let mut bridge = HidBridge::new();
        let mut report = [0u8; 16];
        report[0] = 0xAA;
        report[1] = OP_DEBUG_UNLOCK;
        report[2] = 17;

        bridge.set_report_start(0xAA, 16);
        assert_eq!(bridge.set_report_data(&report[..8]), None);
        assert!(bridge.take_command().is_none());
        bridge.set_report_data(&report[8..]);

        let cmd = bridge.take_command().unwrap();
        assert_eq!(cmd.len(), 16);
        assert_eq!(cmd.opcode(), OP_DEBUG_UNLOCK);
        assert_eq!(cmd.payload().len(), 14);
        assert_eq!(cmd.decode(), Command::DebugUnlock { t1coeff: 17 });
        assert!(bridge.take_command().is_none());
    }

    #[test]
    fn test_command_length_clamped() {
        let mut bridge = HidBridge::new();
        let mut report = [0x5Au8; 96];
        report[1] = OP_REBOOT_BOOTLOADER;

        bridge.set_report_start(0xAA, report.len());
        for (i, chunk) in report.chunks(CHUNK_LEN).enumerate() {
            bridge.set_report_data(chunk);
            if i == 9 {
                break;
            }
        }
        let cmd = bridge.take_command().unwrap();
        assert_eq!(cmd.len(), SCRATCH_LEN);
        assert_eq!(cmd.decode(), Command::RebootToBootloader);

        // data past the declared length is ignored
        bridge.set_report_data(&[1; 8]);
        assert!(bridge.take_command().is_none());
    }

    #[test]
    fn test_short_report_completes_on_first_chunk() {
        let mut bridge = HidBridge::new();
        send(&mut bridge, 0xAA, &[0xAA, 0x42, 1]);
        let cmd = bridge.take_command().unwrap();
        assert_eq!(cmd.payload(), &[1u8]);
        assert_eq!(cmd.decode(), Command::Unknown(0x42));
    }

    #[test]
    fn test_terminal_keystroke() {
        let mut bridge = HidBridge::new();
        assert_eq!(send(&mut bridge, TERMINAL_FEATURE_ID, &[0xAB, b'b']), Some(b'b'));
        assert!(bridge.take_command().is_none());
    }

    #[test]
    fn test_terminal_read_before_link() {
        let mut bus = MockBus::new();
        let mut link = Link::new();
        let mut bridge = HidBridge::new();

        let reply = bridge.get_report_start(&mut bus, &mut link, TERMINAL_FEATURE_ID, 64);
        assert_eq!(reply, &TERMINAL_TAG);
        assert!(bus.writes_to(Reg::DmData0).is_empty());
    }

    #[test]
    fn test_terminal_read_drains_mailbox() {
        let mut bus = MockBus::new();
        let mut link = Link::new();
        let mut bridge = HidBridge::new();
        bus.regs.insert(Reg::DmData0, 0x6C65_488B);
        bus.regs.insert(Reg::DmData1, 0x7720_6F6C);

        let reply = bridge
            .get_report_start(&mut bus, &mut link, TERMINAL_FEATURE_ID, 8)
            .to_vec();
        assert_eq!(reply, b"\x8BHello w");
        assert!(link.is_unlocked());
        assert_eq!(bus.regs[&Reg::DmData0], 0);
        assert_eq!(bus.regs[&Reg::DmData1], 0);
    }

    #[test]
    fn test_scratch_read_truncated() {
        let mut bus = MockBus::new();
        let mut link = Link::new();
        let mut bridge = HidBridge::new();
        assert_eq!(bridge.get_report_start(&mut bus, &mut link, 1, 200).len(), 80);
        assert_eq!(bridge.get_report_start(&mut bus, &mut link, 1, 10).len(), 10);
    }
}
