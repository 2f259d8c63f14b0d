//! bootrescue-sim - In-memory CH32V003 emulator for the rescue firmware
//!
//! This crate runs the firmware logic from `bootrescue-core` on the host,
//! against an emulated flash controller and a scripted USB terminal. It's
//! useful for testing and for rehearsing a recovery without hardware.
//!
//! ```ignore
//! let sim = Simulator::new();
//! Scenario::Fresh.apply(&mut sim.device_mut(), &layout, &factory, image)?;
//! let host = ScriptedHost::new([HostAction::wait_for("Type 'b'"), HostAction::Key(b'b')]);
//! let mut session = Session::new(sim, host, layout, CandidateImage::new(image))?;
//! let report = session.run(10_000)?;
//! print!("{}", report.transcript);
//! ```

pub mod device;
pub mod error;
pub mod handles;
pub mod host;
pub mod scenario;
pub mod session;

pub use device::{Device, FlashOp, ResetTarget};
pub use error::{Result, SimError};
pub use handles::{SimBus, SimPlatform, SimWire, Simulator};
pub use host::{HostAction, ScriptedHost, COMMAND_FEATURE_ID};
pub use scenario::{demo_candidate, factory_bootloader, Scenario};
pub use session::{Session, SessionEnd, SessionReport, SimFirmware};
