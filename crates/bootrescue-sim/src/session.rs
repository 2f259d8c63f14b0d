//! Running the firmware loop against the emulator

use bootrescue_core::firmware::{Firmware, Outcome};
use bootrescue_core::layout::{CandidateImage, Layout};
use bootrescue_core::recovery::UiState;

use crate::device::ResetTarget;
use crate::error::{Result, SimError};
use crate::handles::{SimBus, SimPlatform, SimWire, Simulator};
use crate::host::ScriptedHost;

/// Firmware wired to emulator handles and a scripted host
pub type SimFirmware<'img> = Firmware<'img, SimBus, ScriptedHost, SimWire, SimPlatform>;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Script finished and terminal output drained
    ScriptDone,
    /// The firmware requested a reset
    Rebooted(ResetTarget),
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Main loop iterations run
    pub iterations: usize,
    /// Why the session stopped
    pub end: SessionEnd,
    /// Recovery state at the end
    pub state: UiState,
    /// Everything the host saw on the terminal
    pub transcript: String,
}

/// A firmware instance running on the emulator
pub struct Session<'img> {
    sim: Simulator,
    firmware: SimFirmware<'img>,
    iterations: usize,
}

impl<'img> Session<'img> {
    /// Boot the firmware on `sim`
    pub fn new(
        sim: Simulator,
        host: ScriptedHost,
        layout: Layout,
        image: CandidateImage<'img>,
    ) -> Result<Self> {
        let firmware = Firmware::new(
            sim.bus(),
            host,
            sim.wire(),
            sim.platform(),
            layout,
            image,
        )?;
        Ok(Self {
            sim,
            firmware,
            iterations: 0,
        })
    }

    /// Run one main loop iteration
    pub fn step(&mut self) -> Outcome {
        self.iterations += 1;
        self.firmware.poll_once()
    }

    /// Iterations run so far
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The emulated chip
    pub fn sim(&self) -> &Simulator {
        &self.sim
    }

    /// The firmware under test
    pub fn firmware(&self) -> &SimFirmware<'img> {
        &self.firmware
    }

    /// The scripted host
    pub fn host(&self) -> &ScriptedHost {
        self.firmware.hid()
    }

    /// The scripted host, to extend its script
    pub fn host_mut(&mut self) -> &mut ScriptedHost {
        self.firmware.hid_mut()
    }

    fn report(&self, end: SessionEnd) -> SessionReport {
        SessionReport {
            iterations: self.iterations,
            end,
            state: self.firmware.state(),
            transcript: self.host().transcript().to_string(),
        }
    }

    /// Run until the script is done, the terminal link is up and its output
    /// drained, or the firmware reboots
    ///
    /// Gives up with [`SimError::Stalled`] after `max_iterations`.
    pub fn run(&mut self, max_iterations: usize) -> Result<SessionReport> {
        self.run_observed(max_iterations, |_, _| {})
    }

    /// [`Self::run`], calling `observe` with the iteration count and
    /// recovery state after every iteration
    pub fn run_observed<F>(&mut self, max_iterations: usize, mut observe: F) -> Result<SessionReport>
    where
        F: FnMut(usize, UiState),
    {
        let mut drained = false;
        while self.iterations < max_iterations {
            let outcome = self.step();
            observe(self.iterations, self.firmware.state());
            if outcome == Outcome::Rebooting {
                let target = self
                    .sim
                    .device()
                    .reset_request()
                    .unwrap_or(ResetTarget::User);
                return Ok(self.report(SessionEnd::Rebooted(target)));
            }

            if self.host().is_idle() {
                // one more iteration after the console empties so the host
                // reads the final frame
                if drained {
                    return Ok(self.report(SessionEnd::ScriptDone));
                }
                let ctx = self.firmware.context();
                drained = ctx.link.is_unlocked() && ctx.console.is_empty();
            }
        }

        Err(SimError::Stalled {
            iterations: self.iterations,
            waiting_for: self
                .host()
                .next_action()
                .map(|action| format!("{:?}", action))
                .unwrap_or_else(|| "terminal output to drain".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, FlashOp};
    use crate::host::HostAction;
    use crate::scenario::{demo_candidate, factory_bootloader, Scenario};
    use bootrescue_core::flash;

    const MAX: usize = 1000;

    fn layout() -> Layout {
        Layout {
            hid_polls: 4,
            ..Layout::CH32V003
        }
    }

    fn boot(scenario: Scenario, candidate: &[u8], script: Vec<HostAction>) -> Session<'_> {
        let layout = layout();
        let mut device = Device::new();
        scenario
            .apply(&mut device, &layout, &factory_bootloader(&layout), candidate)
            .unwrap();
        Session::new(
            Simulator::with_device(device),
            ScriptedHost::new(script),
            layout,
            CandidateImage::new(candidate),
        )
        .unwrap()
    }

    fn region(session: &Session<'_>, addr: u32) -> Vec<u8> {
        session.sim().device().read_region(addr, 1920).unwrap()
    }

    #[test]
    fn test_fresh_device_backup_then_update() {
        let candidate = demo_candidate(1000);
        let factory = factory_bootloader(&layout());
        let live = layout().bootloader.start;
        let backup = layout().backup.start;
        let mut session = boot(
            Scenario::Fresh,
            &candidate,
            vec![HostAction::wait_for("Type 'b' to proceed"), HostAction::Key(b'u')],
        );

        let report = session.run(MAX).unwrap();
        assert_eq!(report.end, SessionEnd::ScriptDone);
        assert_eq!(report.state, UiState::AwaitBackup);
        assert!(session.sim().device().ops().is_empty());
        assert!(session.host().locked_reads() > 0);

        session.host_mut().push(HostAction::Key(b'b'));
        session.host_mut().push(HostAction::wait_for("Backup is done"));
        let report = session.run(MAX).unwrap();
        assert_eq!(report.state, UiState::AwaitUpdate);
        assert_eq!(region(&session, backup), factory);
        assert_eq!(region(&session, live), factory);
        assert!(session.sim().device().is_locked());

        session.sim().device_mut().clear_ops();
        session.host_mut().push(HostAction::Key(b'u'));
        session.host_mut().push(HostAction::wait_for("disconnect the device"));
        let report = session.run(MAX).unwrap();
        assert_eq!(report.state, UiState::Finished);

        let written = region(&session, live);
        assert_eq!(written[..1000], candidate[..]);
        assert_eq!(written[1000..], factory[1000..]);
        assert_eq!(region(&session, backup), factory);

        let device = session.sim().device();
        let programs = device
            .ops()
            .iter()
            .filter(|op| matches!(op, FlashOp::Program { .. }))
            .count();
        assert_eq!(programs, 16);
        assert!(device.is_locked());
        assert!(device.is_boot_locked());
        assert_eq!(report.transcript.matches("You can now disconnect").count(), 1);
    }

    #[test]
    fn test_backed_up_device_updates() {
        let candidate = demo_candidate(1920);
        let mut session = boot(
            Scenario::BackedUp,
            &candidate,
            vec![
                HostAction::wait_for("Type 'u' to update the bootloader"),
                HostAction::Key(b'u'),
                HostAction::wait_for("Bootloader written"),
            ],
        );

        let report = session.run(MAX).unwrap();
        assert_eq!(report.state, UiState::Finished);
        assert_eq!(region(&session, layout().bootloader.start), candidate);
        assert!(report.transcript.contains("Bootloader already backed up."));
        assert_eq!(report.transcript.matches("You can now disconnect").count(), 1);
    }

    #[test]
    fn test_stale_backup_restores() {
        let candidate = demo_candidate(512);
        let factory = factory_bootloader(&layout());
        let stale: Vec<u8> = factory.iter().map(|b| b ^ 0x5A).collect();
        let mut session = boot(
            Scenario::StaleBackup,
            &candidate,
            vec![
                HostAction::wait_for("Or type 'u' to update the bootloader"),
                HostAction::Key(b'r'),
                HostAction::wait_for("Backup restored"),
            ],
        );

        let report = session.run(MAX).unwrap();
        assert_eq!(report.state, UiState::Finished);
        assert!(report.transcript.contains("Restoring from backup"));
        assert_eq!(region(&session, layout().bootloader.start), stale);
    }

    #[test]
    fn test_current_bootloader_needs_nothing() {
        let candidate = demo_candidate(700);
        let mut session = boot(
            Scenario::Current,
            &candidate,
            vec![HostAction::wait_for("You can now disconnect the device")],
        );

        let report = session.run(MAX).unwrap();
        assert_eq!(report.state, UiState::Finished);
        assert!(report.transcript.contains("Nothing to update"));
        assert!(session.sim().device().ops().is_empty());
    }

    #[test]
    fn test_reboot_command() {
        let candidate = demo_candidate(64);
        let mut session = boot(
            Scenario::Fresh,
            &candidate,
            vec![HostAction::wait_for("Type 'b'"), HostAction::reboot()],
        );

        let report = session.run(MAX).unwrap();
        assert_eq!(report.end, SessionEnd::Rebooted(ResetTarget::Bootloader));
        assert_eq!(report.state, UiState::AwaitBackup);
        assert!(!session.sim().device().interrupts_enabled());
    }

    #[test]
    fn test_debug_unlock_command() {
        let candidate = demo_candidate(64);
        let mut session = boot(Scenario::Fresh, &candidate, vec![HostAction::debug_unlock(5)]);
        session.sim().device_mut().set_mailbox(0x3F, 0x3F);

        session.run(MAX).unwrap();
        let device = session.sim().device();
        assert!(device.debug_port_unlocked());
        assert_eq!(device.debug_writes().len(), 6);
        assert!(device.debug_writes().iter().all(|&(_, _, t1)| t1 == 5));
    }

    #[test]
    fn test_debug_unlock_without_debugger() {
        let candidate = demo_candidate(64);
        let mut session = boot(Scenario::Fresh, &candidate, vec![HostAction::debug_unlock(5)]);

        session.run(MAX).unwrap();
        assert!(session.sim().device().debug_writes().is_empty());
    }

    #[test]
    fn test_empty_script_shows_first_prompt() {
        let candidate = demo_candidate(64);
        let mut session = boot(Scenario::BackedUp, &candidate, Vec::new());

        let mut seen = Vec::new();
        let report = session
            .run_observed(MAX, |_, state| seen.push(state))
            .unwrap();
        assert_eq!(report.state, UiState::AwaitUpdate);
        assert!(report.transcript.ends_with("Type 'u' to update the bootloader\n"));
        assert_eq!(seen.len(), report.iterations);
        assert_eq!(seen.first(), Some(&UiState::Idle));
    }

    #[test]
    fn test_stalls_on_missing_output() {
        let candidate = demo_candidate(64);
        let mut session = boot(
            Scenario::Fresh,
            &candidate,
            vec![HostAction::wait_for("never printed")],
        );

        let err = session.run(20).unwrap_err();
        assert!(matches!(err, SimError::Stalled { iterations: 20, .. }));
    }

    #[test]
    fn test_block_merge_on_device() {
        let sim = Simulator::new();
        let addr = 0x0800_1000;
        let original: Vec<u8> = (0..64u8).collect();
        sim.device_mut().load(addr, &original).unwrap();

        let mut bus = sim.bus();
        flash::unlock(&mut bus, false, false).unwrap();
        let written = flash::write_block(&mut bus, addr + 10, &[0xEE; 100], true).unwrap();
        flash::lock(&mut bus);
        assert_eq!(written, 54);

        let mut expected = original;
        expected[10..].fill(0xEE);
        assert_eq!(sim.device().read_region(addr, 64).unwrap(), expected);
        assert_eq!(
            sim.device().ops(),
            [FlashOp::Erase { page: addr }, FlashOp::Program { block: addr }]
        );
    }
}
