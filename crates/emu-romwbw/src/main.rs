//! RomWBW emulator for the terminal.
//!
//! Loads a RomWBW ROM image and disk images, then runs the machine with
//! the console attached to the current terminal in raw mode. Press
//! Ctrl-] to quit. `--mcp` serves the JSON-RPC control protocol on
//! stdin/stdout instead of attaching a terminal.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use termion::raw::IntoRawMode;

use emu_romwbw::{EmulatorDelegate, RomWbw, RomWbwConfig};

/// Exit key in raw mode (Ctrl-]).
const QUIT_KEY: u8 = 0x1D;

#[derive(Parser)]
#[command(
    name = "emu-romwbw",
    about = "RomWBW/HBIOS Z80 single-board computer emulator for the terminal",
    version,
)]
struct Cli {
    /// RomWBW ROM image
    #[arg(short = 'r', long, value_name = "FILE")]
    rom: Option<PathBuf>,

    /// Disk image as UNIT:FILE (repeatable), e.g. -d 2:hd1k_cpm22.img
    #[arg(short = 'd', long = "disk", value_name = "UNIT:FILE")]
    disks: Vec<String>,

    /// Slice count as UNIT:N (repeatable), N in 1..=8
    #[arg(short = 's', long = "slices", value_name = "UNIT:N")]
    slices: Vec<String>,

    /// Keystrokes typed into the boot menu automatically
    #[arg(short = 'b', long, value_name = "STRING")]
    boot: Option<String>,

    /// Instructions per batch
    #[arg(long, default_value_t = 50_000)]
    batch: u32,

    /// Serve the JSON-RPC control protocol on stdin/stdout
    #[arg(long)]
    mcp: bool,
}

/// Delegate that writes console bytes straight to the terminal.
struct TerminalDelegate {
    stdout: io::Stdout,
}

impl EmulatorDelegate for TerminalDelegate {
    fn on_character(&mut self, ch: u8) {
        let _ = self.stdout.write_all(&[ch]);
        let _ = self.stdout.flush();
    }

    fn on_status(&mut self, status: &str) {
        log::info!("{status}");
    }
}

fn parse_unit_arg(arg: &str) -> Result<(usize, &str), String> {
    let (unit, rest) = arg
        .split_once(':')
        .ok_or_else(|| format!("expected UNIT:VALUE, got '{arg}'"))?;
    let unit = unit
        .parse::<usize>()
        .map_err(|_| format!("bad unit number in '{arg}'"))?;
    Ok((unit, rest))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.mcp {
        let mut server = emu_romwbw::mcp::McpServer::new();
        if let Err(e) = setup_machine(&cli, server.machine_mut()) {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        if let Err(e) = server.run() {
            eprintln!("mcp server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let delegate = TerminalDelegate {
        stdout: io::stdout(),
    };
    let mut machine = RomWbw::new(&RomWbwConfig::default(), Box::new(delegate));
    if let Err(e) = setup_machine(&cli, &mut machine) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    if cli.rom.is_none() {
        eprintln!("error: --rom is required (or use --mcp and load one over the protocol)");
        std::process::exit(1);
    }

    machine.start();
    println!("emu-romwbw - press Ctrl-] to quit\r");

    // Raw mode for the duration of the session; restored when the guard
    // drops.
    let raw = io::stdout().into_raw_mode();
    let _raw = match raw {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("cannot enter raw mode: {e}");
            std::process::exit(1);
        }
    };
    let mut keys = termion::async_stdin().bytes();

    'outer: while machine.is_running() {
        machine.run_batch(cli.batch);

        while let Some(Ok(byte)) = keys.next() {
            if byte == QUIT_KEY {
                break 'outer;
            }
            // Ctrl-key chords arrive already converted by the terminal;
            // controlify stays off here.
            machine.queue_input(byte);
        }

        if machine.is_waiting_for_input() {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn setup_machine(cli: &Cli, machine: &mut RomWbw) -> Result<(), String> {
    if let Some(rom_path) = &cli.rom {
        let rom = std::fs::read(rom_path)
            .map_err(|e| format!("cannot read {}: {e}", rom_path.display()))?;
        machine.load_rom(&rom)?;
    }

    for arg in &cli.disks {
        let (unit, path) = parse_unit_arg(arg)?;
        let data = std::fs::read(path).map_err(|e| format!("cannot read {path}: {e}"))?;
        machine.load_disk(unit, &data)?;
    }

    for arg in &cli.slices {
        let (unit, count) = parse_unit_arg(arg)?;
        let count = count
            .parse::<u8>()
            .map_err(|_| format!("bad slice count in '{arg}'"))?;
        machine.set_slice_count(unit, count)?;
    }

    if let Some(boot) = &cli.boot {
        machine.set_boot_string(boot);
    }
    Ok(())
}
