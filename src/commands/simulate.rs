//! Recovery session on the emulated chip

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use bootrescue_core::layout::{CandidateImage, Layout};
use bootrescue_core::recovery::UiState;
use bootrescue_sim::{
    demo_candidate, factory_bootloader, Device, HostAction, ScriptedHost, Session, SessionEnd,
    SessionReport, Simulator,
};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::SimulateArgs;
use crate::error::CliError;

/// Length of the generated image used when no --image is given
const DEMO_IMAGE_LEN: usize = 1536;

fn read_image(path: Option<&Path>) -> Result<Vec<u8>, CliError> {
    match path {
        Some(path) => {
            let data = fs::read(path).map_err(|source| CliError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            println!("Read {} bytes from {:?}", data.len(), path);
            Ok(data)
        }
        None => {
            println!("Using a generated {} byte demo image", DEMO_IMAGE_LEN);
            Ok(demo_candidate(DEMO_IMAGE_LEN))
        }
    }
}

/// Host script for the command line options
fn build_script(args: &SimulateArgs) -> Vec<HostAction> {
    let mut script = Vec::new();
    if let Some(t1coeff) = args.unlock {
        script.push(HostAction::debug_unlock(t1coeff));
    }
    for key in args.keys.bytes() {
        // every prompt quotes the key it expects
        script.push(HostAction::WaitFor(format!("'{}'", char::from(key))));
        script.push(HostAction::Key(key));
    }
    if args.reboot {
        script.push(HostAction::reboot());
    }
    script
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn run_scripted(
    session: &mut Session<'_>,
    max_iterations: usize,
) -> Result<SessionReport, CliError> {
    let pb = spinner();
    let result = session.run_observed(max_iterations, |iteration, state| {
        if iteration % 64 == 0 {
            pb.set_message(format!("iteration {}: {}", iteration, state));
        }
    });
    pb.finish_and_clear();

    let report = result?;
    print!("{}", report.transcript);
    Ok(report)
}

fn run_interactive(
    session: &mut Session<'_>,
    max_iterations: usize,
) -> Result<SessionReport, CliError> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let report = session.run(max_iterations)?;
        print!("{}", session.host_mut().take_new_output());
        io::stdout().flush().map_err(CliError::Input)?;

        if matches!(report.end, SessionEnd::Rebooted(_)) || report.state == UiState::Finished {
            return Ok(report);
        }

        print!("> ");
        io::stdout().flush().map_err(CliError::Input)?;
        let Some(line) = lines.next() else {
            println!();
            return Ok(report);
        };
        for key in line.map_err(CliError::Input)?.trim().bytes() {
            session.host_mut().push(HostAction::Key(key));
        }
    }
}

fn write_dump(dir: &Path, name: &str, data: &[u8]) -> Result<(), CliError> {
    let path = dir.join(name);
    fs::write(&path, data).map_err(|source| CliError::Write {
        path: path.clone(),
        source,
    })?;
    println!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}

fn dump_regions(sim: &Simulator, layout: &Layout, dir: &Path) -> Result<(), CliError> {
    fs::create_dir_all(dir).map_err(|source| CliError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let device = sim.device();
    let backup = device.read_region(layout.backup.start, layout.backup.len as usize)?;
    let bootloader = device.read_region(layout.bootloader.start, layout.bootloader.len as usize)?;
    write_dump(dir, "backup.bin", &backup)?;
    write_dump(dir, "bootloader.bin", &bootloader)
}

/// Boot the rescue firmware on an emulated chip and drive its terminal
pub fn run_simulate(layout: Layout, args: &SimulateArgs) -> Result<(), CliError> {
    let layout = Layout {
        hid_polls: args.hid_polls,
        ..layout
    };
    let image = read_image(args.image.as_deref())?;

    let mut device = Device::new();
    args.scenario
        .apply(&mut device, &layout, &factory_bootloader(&layout), &image)?;
    if args.unlock.is_some() {
        device.set_mailbox(args.mailbox, args.mailbox);
    }
    println!("Starting from scenario '{}'", args.scenario);

    let host = ScriptedHost::new(build_script(args));
    let mut session = Session::new(
        Simulator::with_device(device),
        host,
        layout,
        CandidateImage::new(&image),
    )?;

    let report = if args.interactive {
        run_interactive(&mut session, args.max_iterations)?
    } else {
        run_scripted(&mut session, args.max_iterations)?
    };

    println!();
    log::info!("Session ended after {} iterations", report.iterations);
    println!("Final state: {}", report.state);
    if let SessionEnd::Rebooted(target) = report.end {
        println!("Device reset, booting {:?}", target);
    }
    let device = session.sim().device();
    if device.debug_port_unlocked() {
        println!("Debug port unlocked");
    }
    println!(
        "Flash operations: {} (virtual time {} ms)",
        device.ops().len(),
        device.elapsed_ms()
    );
    drop(device);

    if let Some(dir) = &args.dump {
        dump_regions(session.sim(), &layout, dir)?;
    }
    Ok(())
}
