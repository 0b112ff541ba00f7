//! Top-level RomWBW machine.
//!
//! Owns the CPU, the bus (memory + disks + HBIOS), and the host delegate.
//! The host drives execution with `run_batch`, which exits early when the
//! firmware suspends for console input or the CPU halts. Console output
//! collected during a batch is drained to the delegate in FIFO order after
//! the batch.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{Observable, Value};
use emu_z80::Z80;

use crate::bus::{Fault, HbiosSignal, RomWbwBus};
use crate::config::RomWbwConfig;
use crate::delegate::EmulatorDelegate;
use crate::disk::{MEDIA_RAM_DRIVE, MEDIA_ROM_DRIVE};
use crate::hbios::HbiosState;
use crate::memory::ROM_SIZE;

/// Disk unit of the RAM-backed memory disk (MD0).
pub const MD0_UNIT: usize = 0;

/// Disk unit of the ROM-backed memory disk (MD1).
pub const MD1_UNIT: usize = 1;

/// ROM offset where the ROM-disk content begins; the first 128 KiB hold
/// the system banks.
const ROM_DISK_OFFSET: usize = 0x2_0000;

/// Size of the RAM-backed memory disk.
const RAM_DISK_SIZE: usize = 0x4_0000;

/// Input transformation applied to queued characters.
///
/// In the non-off modes, letters and the `@`..`_` range map to their
/// Ctrl-equivalents (`A` becomes 0x01, and so on). `OneShot` clears back
/// to `Off` after converting a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlifyMode {
    #[default]
    Off,
    OneShot,
    Sticky,
}

/// The RomWBW single-board computer.
pub struct RomWbw {
    cpu: Z80,
    bus: RomWbwBus,
    delegate: Box<dyn EmulatorDelegate>,
    running: bool,
    waiting_for_input: bool,
    instruction_count: u64,
    boot_string: Option<String>,
    controlify: ControlifyMode,
}

impl RomWbw {
    /// Create a machine with the given configuration and delegate.
    #[must_use]
    pub fn new(config: &RomWbwConfig, delegate: Box<dyn EmulatorDelegate>) -> Self {
        let mut bus = RomWbwBus::new();
        bus.hbios.set_blocking_allowed(config.blocking_input);
        Self {
            cpu: Z80::new(),
            bus,
            delegate,
            running: false,
            waiting_for_input: false,
            instruction_count: 0,
            boot_string: None,
            controlify: ControlifyMode::Off,
        }
    }

    /// Load a ROM image and install the memory disks backed by it.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or oversized image.
    pub fn load_rom(&mut self, data: &[u8]) -> Result<(), String> {
        self.bus.memory.load_rom(data)?;

        // MD0: zero-filled RAM drive. MD1: the ROM-disk region of the
        // loaded image. Both sit at fixed units and may be replaced by
        // the host attaching its own media there.
        self.bus
            .disks
            .attach_memory_disk(MD0_UNIT, vec![0u8; RAM_DISK_SIZE], MEDIA_RAM_DRIVE)
            .map_err(|e| format!("MD0 install failed: {e:?}"))?;
        let rom_disk = self
            .bus
            .memory
            .rom_slice(ROM_DISK_OFFSET, ROM_SIZE - ROM_DISK_OFFSET)
            .to_vec();
        self.bus
            .disks
            .attach_memory_disk(MD1_UNIT, rom_disk, MEDIA_ROM_DRIVE)
            .map_err(|e| format!("MD1 install failed: {e:?}"))?;
        Ok(())
    }

    /// Attach a disk image to a unit.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty image or a bad unit.
    pub fn load_disk(&mut self, unit: usize, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("disk image is empty".to_string());
        }
        self.bus
            .disks
            .attach(unit, data.to_vec(), 1)
            .map_err(|e| format!("disk attach failed: {e:?}"))
    }

    /// Copy of a unit's media for host persistence. `None` when absent.
    ///
    /// Safe between batches only.
    #[must_use]
    pub fn save_disk(&self, unit: usize) -> Option<Vec<u8>> {
        self.bus.disks.data(unit).map(<[u8]>::to_vec)
    }

    /// Set the number of visible slices of a unit (1..=8).
    ///
    /// # Errors
    ///
    /// Returns an error for a bad unit or slice count.
    pub fn set_slice_count(&mut self, unit: usize, count: u8) -> Result<(), String> {
        self.bus
            .disks
            .set_slice_count(unit, count)
            .map_err(|e| format!("slice count rejected: {e:?}"))
    }

    /// Detach every disk unit.
    pub fn close_all_disks(&mut self) {
        self.bus.disks.close_all();
    }

    /// Begin execution from ROM bank 0 at address 0.
    ///
    /// Any boot string is preloaded (with a CR terminator) so the boot
    /// menu sees the keystrokes without host involvement.
    pub fn start(&mut self) {
        self.bus.hbios.reset();
        self.cpu.reset();
        self.bus.memory.select_bank(0x00);
        self.running = true;
        self.waiting_for_input = false;
        self.instruction_count = 0;

        if let Some(boot) = &self.boot_string {
            for byte in boot.bytes() {
                self.bus.hbios.push_input(byte);
            }
            self.bus.hbios.push_input(b'\r');
        }
    }

    /// Stop execution at the next instruction boundary.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Reset to the stopped, pre-start state. Memory and disks keep their
    /// contents; the console rings are cleared.
    pub fn reset(&mut self) {
        self.running = false;
        self.waiting_for_input = false;
        self.instruction_count = 0;
        self.controlify = ControlifyMode::Off;
        self.bus.hbios.reset();
        self.cpu.reset();
        self.bus.memory.select_bank(0x00);
    }

    /// Queue one console input character.
    ///
    /// LF is normalized to CR, then the controlify transform applies.
    /// Queuing clears a pending input wait; the suspended firmware call
    /// is re-dispatched by the next batch.
    pub fn queue_input(&mut self, ch: u8) {
        let ch = if ch == b'\n' { b'\r' } else { ch };
        let ch = self.controlify_apply(ch);
        self.bus.hbios.push_input(ch);
        self.waiting_for_input = false;
    }

    /// Set the controlify input mode.
    pub fn set_controlify(&mut self, mode: ControlifyMode) {
        self.controlify = mode;
    }

    /// Current controlify input mode.
    #[must_use]
    pub const fn controlify(&self) -> ControlifyMode {
        self.controlify
    }

    /// Set the keystrokes typed into the boot menu on the next `start()`.
    pub fn set_boot_string(&mut self, s: &str) {
        self.boot_string = Some(s.to_string());
    }

    fn controlify_apply(&mut self, ch: u8) -> u8 {
        if self.controlify == ControlifyMode::Off {
            return ch;
        }
        let upper = if ch.is_ascii_lowercase() { ch - 0x20 } else { ch };
        let converted = if (b'@'..=b'_').contains(&upper) {
            upper - b'@'
        } else {
            ch
        };
        if self.controlify == ControlifyMode::OneShot {
            self.controlify = ControlifyMode::Off;
        }
        converted
    }

    /// Execute up to `limit` instructions.
    ///
    /// The batch ends early when the firmware suspends for input, the CPU
    /// halts, or `stop()` was called. Output produced during the batch is
    /// forwarded to the delegate afterwards, in the order it was written.
    pub fn run_batch(&mut self, limit: u32) {
        if !self.running {
            return;
        }

        // A suspended console read resumes here: the register file still
        // holds the original call, so a re-dispatch completes it.
        if self.bus.hbios.state() == HbiosState::NeedsInput {
            if self.bus.hbios.has_input() {
                self.bus.hbios.set_idle();
                self.bus
                    .service(HbiosSignal::Dispatch, &mut self.cpu.regs, self.delegate.as_mut());
            } else {
                self.waiting_for_input = true;
                return;
            }
        }
        self.waiting_for_input = false;

        let mut executed = 0u64;
        for _ in 0..limit {
            if !self.running {
                break;
            }

            self.cpu.step(&mut self.bus);
            executed += 1;

            if let Some(signal) = self.bus.take_signal() {
                self.bus
                    .service(signal, &mut self.cpu.regs, self.delegate.as_mut());
            }

            if let Some(fault) = self.bus.take_fault() {
                match fault {
                    Fault::Halt => self.delegate.on_status("HALT executed - stopping"),
                    Fault::Unimplemented { opcode, pc } => self.delegate.on_status(&format!(
                        "Unimplemented opcode 0x{opcode:02X} at PC=0x{pc:04X}"
                    )),
                }
                self.bus.hbios.set_halted();
                self.running = false;
                break;
            }

            match self.bus.hbios.state() {
                HbiosState::NeedsInput => {
                    self.waiting_for_input = true;
                    if !self.bus.hbios.blocking_allowed() {
                        self.delegate.on_input_requested();
                    }
                    break;
                }
                HbiosState::Halted => {
                    self.running = false;
                    break;
                }
                HbiosState::Idle => {}
            }
        }

        self.instruction_count += executed;
        self.bus.hbios.advance_timer(executed);

        while let Some(ch) = self.bus.hbios.pop_output() {
            self.delegate.on_character(ch);
        }
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.cpu.pc()
    }

    /// Current stack pointer.
    #[must_use]
    pub fn sp(&self) -> u16 {
        self.cpu.sp()
    }

    /// Instructions executed since `start()`.
    #[must_use]
    pub const fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Whether the machine is running (not stopped or halted).
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the machine is suspended waiting for console input.
    #[must_use]
    pub const fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input
    }

    /// Reference to the CPU.
    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    /// Mutable reference to the CPU.
    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    /// Reference to the bus.
    #[must_use]
    pub fn bus(&self) -> &RomWbwBus {
        &self.bus
    }

    /// Mutable reference to the bus.
    pub fn bus_mut(&mut self) -> &mut RomWbwBus {
        &mut self.bus
    }
}

impl Observable for RomWbw {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return self.cpu.query(rest);
        }
        match path {
            "pc" => Some(self.cpu.pc().into()),
            "sp" => Some(self.cpu.sp().into()),
            "instruction_count" => Some(self.instruction_count.into()),
            "running" => Some(self.running.into()),
            "waiting_for_input" => Some(self.waiting_for_input.into()),
            "bank" => Some(self.bus.memory.bank().into()),
            "boot_in_progress" => Some(self.bus.hbios.boot_in_progress().into()),
            _ => self.cpu.query(path),
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "pc",
            "sp",
            "instruction_count",
            "running",
            "waiting_for_input",
            "bank",
            "boot_in_progress",
            "cpu.<register>",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::CaptureDelegate;

    fn make_machine() -> (RomWbw, CaptureDelegate) {
        let delegate = CaptureDelegate::new();
        let mut machine = RomWbw::new(&RomWbwConfig::default(), Box::new(delegate.clone()));
        machine.load_rom(&[0x00u8; 0x0400]).expect("rom");
        (machine, delegate)
    }

    #[test]
    fn memory_disks_installed_on_rom_load() {
        let (machine, _) = make_machine();
        assert!(machine.bus().disks.is_present(MD0_UNIT));
        assert!(machine.bus().disks.is_present(MD1_UNIT));
        assert_eq!(
            machine.bus().disks.media(MD1_UNIT).unwrap(),
            MEDIA_ROM_DRIVE
        );
    }

    #[test]
    fn controlify_sticky_maps_both_cases() {
        let (mut machine, _) = make_machine();
        machine.set_controlify(ControlifyMode::Sticky);
        machine.queue_input(b'A');
        machine.queue_input(b'a');
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(0x01));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(0x01));
        assert_eq!(machine.controlify(), ControlifyMode::Sticky);
    }

    #[test]
    fn controlify_one_shot_clears_after_one_char() {
        let (mut machine, _) = make_machine();
        machine.set_controlify(ControlifyMode::OneShot);
        machine.queue_input(b'C');
        machine.queue_input(b'C');
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(0x03));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(0x43));
        assert_eq!(machine.controlify(), ControlifyMode::Off);
    }

    #[test]
    fn controlify_off_passes_through() {
        let (mut machine, _) = make_machine();
        machine.queue_input(b'C');
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(0x43));
    }

    #[test]
    fn lf_normalizes_to_cr() {
        let (mut machine, _) = make_machine();
        machine.queue_input(b'\n');
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'\r'));
    }

    #[test]
    fn input_preserves_fifo_order() {
        let (mut machine, _) = make_machine();
        machine.queue_input(b'1');
        machine.queue_input(b'2');
        machine.queue_input(b'3');
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'1'));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'2'));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'3'));
    }

    #[test]
    fn boot_string_preloaded_with_cr_on_start() {
        let (mut machine, _) = make_machine();
        machine.set_boot_string("C2");
        machine.start();
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'C'));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'2'));
        assert_eq!(machine.bus_mut().hbios.pop_input(), Some(b'\r'));
    }

    #[test]
    fn reset_is_idempotent() {
        let (mut machine, _) = make_machine();
        machine.set_controlify(ControlifyMode::Sticky);
        machine.queue_input(b'x');
        machine.start();

        machine.reset();
        let pc1 = machine.pc();
        let bank1 = machine.bus().memory.bank();
        let running1 = machine.is_running();

        machine.reset();
        assert_eq!(machine.pc(), pc1);
        assert_eq!(machine.bus().memory.bank(), bank1);
        assert_eq!(machine.is_running(), running1);
        assert_eq!(machine.controlify(), ControlifyMode::Off);
        assert!(!machine.bus().hbios.has_input());
    }

    #[test]
    fn run_batch_noop_when_stopped() {
        let (mut machine, _) = make_machine();
        machine.run_batch(100);
        assert_eq!(machine.instruction_count(), 0);
    }

    #[test]
    fn observable_paths() {
        let (machine, _) = make_machine();
        assert_eq!(machine.query("pc"), Some(Value::U16(0)));
        assert_eq!(machine.query("bank"), Some(Value::U8(0)));
        assert_eq!(machine.query("running"), Some(Value::Bool(false)));
        assert_eq!(machine.query("cpu.a"), Some(Value::U8(0)));
    }
}
