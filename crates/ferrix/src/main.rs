//! Boot front-end for the teaching kernel.
//!
//! Builds the simulated machine, registers program images (built-ins plus
//! an optional JSON manifest), boots the kernel with the requested initial
//! program, then plays the hardware: clock ticks, transmit completions,
//! and typed terminal lines, printing everything the terminals emitted.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use serde::Deserialize;

use hardware::{
    syscall, BootInfo, Machine, ProgramImage, TrapVector, UserContext, NUM_TERMINALS,
};
use kernel::Kernel;

/// Run the teaching microkernel on its simulated machine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Initial user program (handed to the kernel as the argument vector)
    #[arg(short, long, default_value = "test/init")]
    program: String,

    /// Physical memory size in bytes
    #[arg(short, long, default_value_t = 2 * 1024 * 1024)]
    memory: usize,

    /// Clock ticks to drive after boot
    #[arg(short, long, default_value_t = 32)]
    ticks: usize,

    /// JSON manifest of extra program images
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Lines typed at terminal 0, one per tick
    #[arg(long)]
    input: Vec<String>,

    /// Skip the boot banner init writes to terminal 0
    #[arg(long)]
    no_banner: bool,
}

/// One manifest entry: either synthetic segment sizes or an ELF to flatten.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    text_bytes: usize,
    #[serde(default)]
    data_bytes: usize,
    #[serde(default)]
    elf: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    println!("{}", "ferrix v0.1.0".bold().blue());
    println!(
        "memory {} bytes, {} terminals, init program '{}'",
        args.memory, NUM_TERMINALS, args.program
    );

    let machine = Rc::new(Machine::new(args.memory, NUM_TERMINALS));
    register_builtin_programs(&machine);
    if let Some(path) = &args.manifest {
        load_manifest(&machine, path)
            .with_context(|| format!("loading manifest {:?}", path))?;
    }

    let boot = BootInfo::with_memory(args.memory);
    let mut uctxt = UserContext::default();
    let cmd_args = vec![args.program.clone()];
    let mut k = Kernel::start(Rc::clone(&machine), &cmd_args, boot, &mut uctxt)
        .context("kernel boot failed")?;
    println!(
        "booted: init pid {}, idle pid {}",
        k.init_pid(),
        k.idle_pid()
    );

    if !args.no_banner {
        banner_write(&machine, &mut k, &mut uctxt, &args.program)
            .context("boot banner write failed")?;
    }

    let mut typed = args.input.iter();
    for tick in 0..args.ticks {
        // Finish in-flight transmits first; each completion is a trap.
        for tty in 0..machine.num_terminals() {
            if machine.tty_complete_transmit(tty) {
                uctxt.vector = TrapVector::TtyTransmit;
                uctxt.code = tty as i32;
                k.handle_trap(&mut uctxt);
            }
        }
        // One typed line per tick, if any remain.
        if let Some(line) = typed.next() {
            machine.tty_push_input(0, format!("{}\n", line).as_bytes());
            uctxt.vector = TrapVector::TtyReceive;
            uctxt.code = 0;
            k.handle_trap(&mut uctxt);
        }
        uctxt.vector = TrapVector::Clock;
        k.handle_trap(&mut uctxt);

        if machine.is_halted() {
            println!("machine halted at tick {}", tick);
            break;
        }
    }

    println!("{}", "terminal output".bold());
    for tty in 0..machine.num_terminals() {
        for chunk in machine.tty_transmitted(tty) {
            print!("tty{}: {}", tty, String::from_utf8_lossy(&chunk));
            if !chunk.ends_with(b"\n") {
                println!();
            }
        }
    }
    println!(
        "{} processes; running pid {}; ready {:?} blocked {:?} defunct {:?}",
        k.process_count(),
        k.running(),
        k.ready_pids(),
        k.blocked_pids(),
        k.defunct_pids()
    );
    Ok(())
}

/// Have init write a greeting to terminal 0: the bytes go just below its
/// stack pointer, then the write syscall is trapped on its behalf.
fn banner_write(
    machine: &Machine,
    k: &mut Kernel,
    uctxt: &mut UserContext,
    program: &str,
) -> Result<()> {
    let banner = format!("hello from {}\n", program);
    let addr = (uctxt.sp - banner.len() as u32) & !7;
    machine.write_virtual(addr, banner.as_bytes())?;
    uctxt.vector = TrapVector::Kernel;
    uctxt.code = syscall::TTY_WRITE;
    uctxt.regs = [0, addr as i32, banner.len() as i32, 0, 0, 0, 0, 0];
    k.handle_trap(uctxt);
    Ok(())
}

fn register_builtin_programs(machine: &Machine) {
    machine.register_program("test/init", ProgramImage::new(vec![0x90; 512], vec![0; 128]));
    machine.register_program("test/idle", ProgramImage::new(vec![0x90; 64], Vec::new()));
    machine.register_program("test/echo", ProgramImage::new(vec![0x90; 256], vec![0; 64]));
}

fn load_manifest(machine: &Machine, path: &PathBuf) -> Result<()> {
    let raw = fs::read_to_string(path)?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)?;
    for entry in entries {
        let image = match &entry.elf {
            Some(elf_path) => {
                let bytes =
                    fs::read(elf_path).with_context(|| format!("reading {:?}", elf_path))?;
                ProgramImage::from_elf(&bytes)
                    .with_context(|| format!("flattening {:?}", elf_path))?
            }
            None => ProgramImage::new(
                vec![0x90; entry.text_bytes.max(1)],
                vec![0; entry.data_bytes],
            ),
        };
        log::info!("registered program '{}' from manifest", entry.name);
        machine.register_program(&entry.name, image);
    }
    Ok(())
}
