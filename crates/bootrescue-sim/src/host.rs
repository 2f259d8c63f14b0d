//! Scripted USB host
//!
//! Plays the role of the PC side terminal: every poll it reads the terminal
//! feature report and appends any text frame to its transcript, then works
//! through a script of keystrokes and command reports. [`HostAction::WaitFor`]
//! holds the script until the transcript contains the given text.

use std::collections::VecDeque;

use bootrescue_core::bridge::{
    FeatureReports, HidTransport, CHUNK_LEN, OP_DEBUG_UNLOCK, OP_REBOOT_BOOTLOADER,
    TERMINAL_FEATURE_ID, TERMINAL_LEN, TERMINAL_TAG,
};
use bootrescue_core::debug::decode_frame;

/// Feature report id the host uses for commands
pub const COMMAND_FEATURE_ID: u8 = 0xAA;

/// One step of a host script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    /// Wait until the terminal has printed this text
    WaitFor(String),
    /// Type one character into the terminal
    Key(u8),
    /// Send a raw command report (byte 0 report id, byte 1 opcode)
    Command(Vec<u8>),
}

impl HostAction {
    /// Reset into the factory bootloader
    pub fn reboot() -> Self {
        Self::Command(vec![COMMAND_FEATURE_ID, OP_REBOOT_BOOTLOADER, 0, 0, 0, 0, 0, 0])
    }

    /// Reopen the debug port with the given timing coefficient
    pub fn debug_unlock(t1coeff: u8) -> Self {
        Self::Command(vec![COMMAND_FEATURE_ID, OP_DEBUG_UNLOCK, t1coeff, 0, 0, 0, 0, 0])
    }

    /// Wait for `text` on the terminal
    pub fn wait_for(text: &str) -> Self {
        Self::WaitFor(text.to_string())
    }
}

/// [`HidTransport`] driven by a script
#[derive(Debug, Default)]
pub struct ScriptedHost {
    script: VecDeque<HostAction>,
    transcript: String,
    cursor: usize,
    wait_from: usize,
    locked_reads: usize,
    polls: usize,
}

impl ScriptedHost {
    /// Host with the given script
    pub fn new(script: impl IntoIterator<Item = HostAction>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Append actions to the script
    pub fn push(&mut self, action: HostAction) {
        self.script.push_back(action);
    }

    /// Text printed on the terminal so far
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Text printed since the last call
    pub fn take_new_output(&mut self) -> &str {
        let start = self.cursor.min(self.transcript.len());
        self.cursor = self.transcript.len();
        &self.transcript[start..]
    }

    /// Whether every scripted action has been carried out
    pub fn is_idle(&self) -> bool {
        self.script.is_empty()
    }

    /// The action the script is currently blocked on
    pub fn next_action(&self) -> Option<&HostAction> {
        self.script.front()
    }

    /// Terminal reads answered with the "dmlock" tag
    pub fn locked_reads(&self) -> usize {
        self.locked_reads
    }

    /// Number of polls so far
    pub fn polls(&self) -> usize {
        self.polls
    }

    fn read_terminal<H: FeatureReports + ?Sized>(&mut self, reports: &mut H) {
        let reply = reports.get_report_start(TERMINAL_FEATURE_ID, TERMINAL_LEN);
        if reply == TERMINAL_TAG {
            self.locked_reads += 1;
            return;
        }
        if reply.len() < 8 {
            return;
        }
        let data0 = u32::from_le_bytes([reply[0], reply[1], reply[2], reply[3]]);
        let data1 = u32::from_le_bytes([reply[4], reply[5], reply[6], reply[7]]);
        if let Some(frame) = decode_frame(data0, data1) {
            // idle acknowledge frames carry NUL
            self.transcript
                .extend(frame.iter().filter(|&&c| c != 0).map(|&c| char::from(c)));
        }
    }

    fn send_report<H: FeatureReports + ?Sized>(reports: &mut H, id: u8, report: &[u8]) {
        reports.set_report_start(id, report.len());
        for chunk in report.chunks(CHUNK_LEN) {
            reports.set_report_data(chunk);
        }
    }

    fn advance<H: FeatureReports + ?Sized>(&mut self, reports: &mut H) {
        let Some(action) = self.script.front() else {
            return;
        };
        match action {
            HostAction::WaitFor(text) => {
                let Some(found) = self.transcript[self.wait_from..].find(text.as_str()) else {
                    return;
                };
                self.wait_from += found + text.len();
            }
            HostAction::Key(key) => {
                log::debug!("host: key {:?}", char::from(*key));
                Self::send_report(reports, TERMINAL_FEATURE_ID, &[TERMINAL_FEATURE_ID, *key]);
            }
            HostAction::Command(report) => {
                log::debug!("host: command report {:02X?}", report);
                let id = report.first().copied().unwrap_or(COMMAND_FEATURE_ID);
                Self::send_report(reports, id, report);
            }
        }
        self.script.pop_front();
    }
}

impl HidTransport for ScriptedHost {
    fn poll<H: FeatureReports + ?Sized>(&mut self, reports: &mut H) {
        self.polls += 1;
        self.read_terminal(reports);
        self.advance(reports);
    }
}
