//! Z80 CPU core with per-instruction execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.
#![allow(clippy::cast_possible_wrap)] // Intentional i8 casts for displacements.

use emu_core::{Bus, Observable, Value};

use crate::flags::CF;
use crate::registers::Registers;

/// Z80 CPU.
///
/// The CPU does not own the bus. Instead, the bus is passed to `step()` for
/// each instruction, so memory, ports, and host notifications can live in
/// the machine that drives the CPU.
///
/// Decoding is strict: the documented instruction set executes; anything
/// undocumented reports through `Bus::on_unimplemented` and halts. The R
/// register increments on every instruction-stream byte fetch (opcodes,
/// prefixes, displacements, immediates).
pub struct Z80 {
    /// Register file. Public so machines can service firmware calls that
    /// read and write CPU state directly.
    pub regs: Registers,
}

impl Z80 {
    /// Create a new Z80 with all registers zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
        }
    }

    /// Reset the CPU to its initial state.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
    }

    /// Current program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.regs.pc
    }

    /// Current stack pointer.
    #[must_use]
    pub const fn sp(&self) -> u16 {
        self.regs.sp
    }

    /// True once the CPU has executed HALT or hit an undocumented opcode.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.regs.halted
    }

    /// Execute one instruction.
    ///
    /// A halted CPU stays put; callers observe the state via `is_halted()`
    /// and resume only through `reset()` (or by clearing the flag when
    /// restoring a snapshot).
    pub fn step<B: Bus>(&mut self, bus: &mut B) {
        if self.regs.halted {
            return;
        }

        let start_pc = self.regs.pc;
        let opcode = self.fetch(bus);
        match opcode {
            0xCB => self.execute_cb(bus, start_pc),
            0xED => self.execute_ed(bus, start_pc),
            0xDD => self.execute_indexed(bus, start_pc, Index::Ix),
            0xFD => self.execute_indexed(bus, start_pc, Index::Iy),
            _ => self.execute_main(bus, start_pc, opcode),
        }
    }

    /// Report an undocumented opcode and halt.
    pub(crate) fn unimplemented<B: Bus>(&mut self, bus: &mut B, opcode: u8, pc: u16) {
        self.regs.halted = true;
        bus.on_unimplemented(opcode, pc);
    }

    /// Fetch the next instruction-stream byte, advancing PC and R.
    pub(crate) fn fetch<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.inc_r();
        value
    }

    /// Fetch a little-endian word from the instruction stream.
    pub(crate) fn fetch16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch(bus);
        let hi = self.fetch(bus);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Read a little-endian word from memory.
    pub(crate) fn read16<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read(addr.wrapping_add(1));
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Write a little-endian word to memory.
    pub(crate) fn write16<B: Bus>(&mut self, bus: &mut B, addr: u16, value: u16) {
        bus.write(addr, value as u8);
        bus.write(addr.wrapping_add(1), (value >> 8) as u8);
    }

    /// Push a word onto the stack (high byte first).
    pub(crate) fn push<B: Bus>(&mut self, bus: &mut B, value: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, (value >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(self.regs.sp, value as u8);
    }

    /// Pop a word from the stack.
    pub(crate) fn pop<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = bus.read(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from(lo) | (u16::from(hi) << 8)
    }

    /// Increment R (lower 7 bits only).
    fn inc_r(&mut self) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
    }

    /// Read a register by 3-bit encoding; code 6 reads `(HL)`.
    pub(crate) fn load_r<B: Bus>(&mut self, bus: &mut B, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => bus.read(self.regs.hl()),
            _ => self.regs.a,
        }
    }

    /// Write a register by 3-bit encoding; code 6 writes `(HL)`.
    pub(crate) fn store_r<B: Bus>(&mut self, bus: &mut B, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => bus.write(self.regs.hl(), value),
            _ => self.regs.a = value,
        }
    }

    /// Evaluate condition code.
    pub(crate) fn condition(&self, cc: u8) -> bool {
        use crate::flags::{PF, SF, ZF};
        match cc & 7 {
            0 => self.regs.f & ZF == 0, // NZ
            1 => self.regs.f & ZF != 0, // Z
            2 => self.regs.f & CF == 0, // NC
            3 => self.regs.f & CF != 0, // C
            4 => self.regs.f & PF == 0, // PO
            5 => self.regs.f & PF != 0, // PE
            6 => self.regs.f & SF == 0, // P
            _ => self.regs.f & SF != 0, // M
        }
    }

    /// Current carry flag.
    pub(crate) const fn carry(&self) -> bool {
        self.regs.f & CF != 0
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

// Instruction execution split into a separate file for readability.
mod execute;
pub(crate) use execute::Index;

/// All query paths supported by the Z80.
const Z80_QUERY_PATHS: &[&str] = &[
    // Main registers
    "a", "f", "b", "c", "d", "e", "h", "l",
    // Register pairs
    "af", "bc", "de", "hl",
    // Index registers
    "ix", "iy",
    // Other registers
    "sp", "pc", "i", "r",
    // Interrupt state
    "iff1", "iff2", "im",
    // CPU state
    "halted",
];

impl Observable for Z80 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "a" => Some(self.regs.a.into()),
            "f" => Some(self.regs.f.into()),
            "b" => Some(self.regs.b.into()),
            "c" => Some(self.regs.c.into()),
            "d" => Some(self.regs.d.into()),
            "e" => Some(self.regs.e.into()),
            "h" => Some(self.regs.h.into()),
            "l" => Some(self.regs.l.into()),

            "af" => Some(self.regs.af().into()),
            "bc" => Some(self.regs.bc().into()),
            "de" => Some(self.regs.de().into()),
            "hl" => Some(self.regs.hl().into()),

            "ix" => Some(self.regs.ix.into()),
            "iy" => Some(self.regs.iy.into()),

            "sp" => Some(self.regs.sp.into()),
            "pc" => Some(self.regs.pc.into()),
            "i" => Some(self.regs.i.into()),
            "r" => Some(self.regs.r.into()),

            "iff1" => Some(self.regs.iff1.into()),
            "iff2" => Some(self.regs.iff2.into()),
            "im" => Some(self.regs.im.into()),

            "halted" => Some(self.regs.halted.into()),

            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        Z80_QUERY_PATHS
    }
}
