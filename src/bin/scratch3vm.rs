//! Headless runner: loads one compiled project image, starts it, and
//! ticks the scheduler until the VM halts or a tick budget is spent.
//!
//! Usage:
//!   scratch3vm --image path/to/project.csb3
//!
//! Nothing in this crate parses `.sb3` project files, so `--image` must
//! already be the compiled container `compiler::compile` produces.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use scratch3_vm::config::{StatusCode, VmOptions};
use scratch3_vm::VmContext;

#[derive(Parser, Debug)]
#[command(name = "scratch3vm", about = "Runs a compiled Scratch 3 project image", version)]
struct Cli {
    /// Path to a compiled bytecode image (`.csb3`).
    #[arg(long, short = 'i', value_name = "PATH")]
    image: PathBuf,

    /// Scheduler ticks per second.
    #[arg(long, default_value_t = 30.0)]
    framerate: f64,

    /// Stage width in pixels.
    #[arg(long, default_value_t = 480)]
    width: u32,

    /// Stage height in pixels.
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Number of scheduler ticks to run before exiting.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let bytes = match fs::read(&cli.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read {}: {e}", cli.image.display());
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = VmContext::create();
    if ctx.load_program(bytes) != StatusCode::Success {
        error!("{} is not a loadable image", cli.image.display());
        return ExitCode::FAILURE;
    }

    let options = VmOptions {
        framerate: cli.framerate,
        width: cli.width,
        height: cli.height,
        ..VmOptions::default()
    };
    if ctx.vm_init(options) != StatusCode::Success {
        error!("vm_init failed");
        return ExitCode::FAILURE;
    }
    ctx.vm_start();

    for tick in 0..cli.ticks {
        if ctx.vm_update() != StatusCode::Success {
            error!("vm_update failed at tick {tick}");
            return ExitCode::FAILURE;
        }
        if let Some(vm) = ctx.vm() {
            if let Some(exc) = &vm.halted {
                info!("VM halted after {tick} ticks: {exc}");
                break;
            }
        }
    }

    ctx.vm_terminate();
    ExitCode::SUCCESS
}
