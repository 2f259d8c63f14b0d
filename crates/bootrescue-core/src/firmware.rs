//! The firmware main loop
//!
//! [`Firmware`] owns the hardware handles and the [`Context`] holding every
//! piece of mutable state. Each [`Firmware::poll_once`] services the HID
//! transport, picks up debugger terminal input, executes a completed
//! command, advances the recovery dialogue by one step and pushes pending
//! terminal output into the mailbox.

use crate::bridge::{Command, FeatureReports, HidBridge, HidTransport, TERMINAL_FEATURE_ID};
use crate::debug::{attempt_unlock, take_input, Console, Link};
use crate::error::Result;
use crate::hal::{DebugWire, Platform, RegisterBus};
use crate::layout::{CandidateImage, Layout};
use crate::recovery::{FlashTarget, Recovery, UiState};
use crate::system::request_bootloader_reset;

/// All mutable firmware state
#[derive(Debug, Default)]
pub struct Context {
    /// HID feature report state
    pub bridge: HidBridge,
    /// Mailbox link state
    pub link: Link,
    /// Outbound terminal text
    pub console: Console,
    /// Recovery dialogue
    pub recovery: Recovery,
}

impl Context {
    /// Fresh state, as after reset
    pub const fn new() -> Self {
        Self {
            bridge: HidBridge::new(),
            link: Link::new(),
            console: Console::new(),
            recovery: Recovery::new(),
        }
    }
}

/// Routes HID hooks into the context while the transport is polled
struct Hooks<'a, B: ?Sized> {
    bus: &'a mut B,
    ctx: &'a mut Context,
}

impl<B: RegisterBus + ?Sized> FeatureReports for Hooks<'_, B> {
    fn get_report_start(&mut self, feature_id: u8, req_len: usize) -> &[u8] {
        let Context {
            bridge,
            link,
            console,
            ..
        } = &mut *self.ctx;
        let reply = bridge.get_report_start(&mut *self.bus, link, feature_id, req_len);
        if feature_id == TERMINAL_FEATURE_ID {
            console.pump(&mut *self.bus);
        }
        reply
    }

    fn set_report_start(&mut self, feature_id: u8, req_len: usize) {
        self.ctx.bridge.set_report_start(feature_id, req_len);
    }

    fn set_report_data(&mut self, data: &[u8]) {
        if let Some(key) = self.ctx.bridge.set_report_data(data) {
            self.ctx.recovery.key_pressed(key);
            self.ctx.link.count_rx(1);
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep looping
    Running,
    /// A reset into the factory bootloader was requested
    Rebooting,
}

/// Recovery firmware bound to its hardware
pub struct Firmware<'img, B, H, D, P> {
    bus: B,
    hid: H,
    wire: D,
    platform: P,
    layout: Layout,
    image: CandidateImage<'img>,
    ctx: Context,
}

impl<'img, B, H, D, P> Firmware<'img, B, H, D, P>
where
    B: RegisterBus,
    H: HidTransport,
    D: DebugWire,
    P: Platform,
{
    /// Validate the layout and candidate image and sample the mailbox once
    pub fn new(
        mut bus: B,
        hid: H,
        wire: D,
        platform: P,
        layout: Layout,
        image: CandidateImage<'img>,
    ) -> Result<Self> {
        layout.validate()?;
        layout.check_image(&image)?;

        let mut ctx = Context::new();
        if ctx.link.observe(&mut bus) {
            log::info!("Terminal already attached at boot");
        }
        log::info!(
            "Recovery firmware ready: {} byte candidate, backup at 0x{:08X}, bootloader at 0x{:08X}",
            image.len(),
            layout.backup.start,
            layout.bootloader.start
        );

        Ok(Self {
            bus,
            hid,
            wire,
            platform,
            layout,
            image,
            ctx,
        })
    }

    /// Run one main loop iteration
    pub fn poll_once(&mut self) -> Outcome {
        for _ in 0..self.layout.hid_polls {
            let mut hooks = Hooks {
                bus: &mut self.bus,
                ctx: &mut self.ctx,
            };
            self.hid.poll(&mut hooks);
        }

        if let Some(input) = take_input(&mut self.bus) {
            log::debug!("Debugger terminal sent {} bytes", input.len());
            if let Some(&key) = input.first() {
                self.ctx.recovery.key_pressed(key);
            }
            self.ctx.link.count_rx(input.len() as u32);
        }

        if let Some(command) = self.ctx.bridge.take_command() {
            match command.decode() {
                Command::RebootToBootloader => {
                    request_bootloader_reset(&mut self.bus, &mut self.platform);
                    return Outcome::Rebooting;
                }
                Command::DebugUnlock { t1coeff } => {
                    attempt_unlock(&mut self.bus, &mut self.wire, &mut self.ctx.link, t1coeff);
                }
                Command::Unknown(opcode) => {
                    log::warn!("Ignoring unknown command 0x{:02X}", opcode);
                }
            }
        }

        let key = self.ctx.recovery.pending_key();
        let unlocked = self.ctx.link.is_unlocked();
        let mut target = FlashTarget::new(&mut self.bus, &mut self.platform, self.layout, self.image);
        self.ctx
            .recovery
            .step(unlocked, &mut target, &mut self.ctx.console);

        // echo the keystroke this step consumed
        if !self.ctx.console.pump(&mut self.bus) {
            self.ctx.console.acknowledge(&mut self.bus, key.unwrap_or(0));
        }
        Outcome::Running
    }

    /// Loop forever; parks in [`Platform::wait_for_reset`] after a reboot
    /// request
    pub fn run(&mut self) -> ! {
        loop {
            if self.poll_once() == Outcome::Rebooting {
                self.platform.wait_for_reset();
            }
        }
    }

    /// Current recovery state
    pub fn state(&self) -> UiState {
        self.ctx.recovery.state()
    }

    /// Firmware state
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Register bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Register bus, mutably
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// HID transport
    pub fn hid(&self) -> &H {
        &self.hid
    }

    /// HID transport, mutably
    pub fn hid_mut(&mut self) -> &mut H {
        &mut self.hid
    }

    /// Debug wire
    pub fn wire(&self) -> &D {
        &self.wire
    }

    /// Platform services
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Memory layout in use
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}
