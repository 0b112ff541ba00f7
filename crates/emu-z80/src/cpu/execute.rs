//! Instruction execution for the Z80.
//!
//! One function per prefix table. Flag behavior follows the documented
//! Z80; the undocumented X/Y result-bit copies are not produced (see
//! `flags.rs`).

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::Bus;

use crate::alu::{self, AluResult};
use crate::flags::{CF, HF, NF, PF, SF, ZF, sz, szp};
use crate::registers::Registers;

use super::Z80;

/// Which index register a DD/FD prefix selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Ix,
    Iy,
}

impl Index {
    fn get(self, regs: &Registers) -> u16 {
        match self {
            Self::Ix => regs.ix,
            Self::Iy => regs.iy,
        }
    }

    fn set(self, regs: &mut Registers, value: u16) {
        match self {
            Self::Ix => regs.ix = value,
            Self::Iy => regs.iy = value,
        }
    }
}

/// Flags for BIT b,r: Z and P/V track the tested bit, H set, N clear,
/// S only for a set bit 7. Carry is preserved by the caller.
fn bit_flags(bit: u8, value: u8) -> u8 {
    let tested = value & (1 << bit);
    let mut f = HF;
    if tested == 0 {
        f |= ZF | PF;
    } else if bit == 7 {
        f |= SF;
    }
    f
}

impl Z80 {
    /// Apply an ALU result to the accumulator and flags.
    fn apply(&mut self, result: AluResult) {
        self.regs.a = result.value;
        self.regs.f = result.flags;
    }

    /// Accumulator operation by 3-bit group code (ADD/ADC/SUB/SBC/AND/XOR/OR/CP).
    fn alu_acc(&mut self, group: u8, operand: u8) {
        let a = self.regs.a;
        let result = match group & 7 {
            0 => alu::add8(a, operand, false),
            1 => alu::add8(a, operand, self.carry()),
            2 => alu::sub8(a, operand, false),
            3 => alu::sub8(a, operand, self.carry()),
            4 => alu::and8(a, operand),
            5 => alu::xor8(a, operand),
            6 => alu::or8(a, operand),
            _ => alu::cp8(a, operand),
        };
        self.apply(result);
    }

    /// Rotate/shift by 3-bit kind code. Kind 6 (SLL) is undocumented and
    /// filtered by the callers.
    fn rotate(&self, kind: u8, value: u8) -> AluResult {
        match kind & 7 {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, self.carry()),
            3 => alu::rr8(value, self.carry()),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            _ => alu::srl8(value),
        }
    }

    /// Fetch the displacement byte and form an IX+d / IY+d address.
    fn index_addr<B: Bus>(&mut self, bus: &mut B, index: Index) -> u16 {
        let d = self.fetch(bus) as i8;
        index.get(&self.regs).wrapping_add(d as u16)
    }

    /// Execute an unprefixed instruction.
    pub(super) fn execute_main<B: Bus>(&mut self, bus: &mut B, _start_pc: u16, op: u8) {
        match op {
            // NOP
            0x00 => {}

            // LD BC, nn
            0x01 => {
                let value = self.fetch16(bus);
                self.regs.set_bc(value);
            }

            // LD (BC), A
            0x02 => bus.write(self.regs.bc(), self.regs.a),

            // INC BC
            0x03 => self.regs.set_bc(self.regs.bc().wrapping_add(1)),

            // INC r / DEC r (carry preserved)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let code = (op >> 3) & 7;
                let result = alu::inc8(self.load_r(bus, code));
                self.store_r(bus, code, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let code = (op >> 3) & 7;
                let result = alu::dec8(self.load_r(bus, code));
                self.store_r(bus, code, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let value = self.fetch(bus);
                self.store_r(bus, (op >> 3) & 7, value);
            }

            // RLCA / RRCA / RLA / RRA: only H, N, C change
            0x07 => {
                let result = alu::rlc8(self.regs.a);
                self.regs.a = result.value;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (result.flags & CF);
            }
            0x0F => {
                let result = alu::rrc8(self.regs.a);
                self.regs.a = result.value;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (result.flags & CF);
            }
            0x17 => {
                let result = alu::rl8(self.regs.a, self.carry());
                self.regs.a = result.value;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (result.flags & CF);
            }
            0x1F => {
                let result = alu::rr8(self.regs.a, self.carry());
                self.regs.a = result.value;
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (result.flags & CF);
            }

            // EX AF, AF'
            0x08 => {
                std::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                std::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rhs = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.sp,
                };
                let (result, flags) = alu::add16(self.regs.hl(), rhs);
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD A, (BC)
            0x0A => self.regs.a = bus.read(self.regs.bc()),

            // DEC BC
            0x0B => self.regs.set_bc(self.regs.bc().wrapping_sub(1)),

            // DJNZ d
            0x10 => {
                let d = self.fetch(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                }
            }

            // LD DE, nn
            0x11 => {
                let value = self.fetch16(bus);
                self.regs.set_de(value);
            }

            // LD (DE), A
            0x12 => bus.write(self.regs.de(), self.regs.a),

            // INC DE / DEC DE
            0x13 => self.regs.set_de(self.regs.de().wrapping_add(1)),
            0x1B => self.regs.set_de(self.regs.de().wrapping_sub(1)),

            // JR d
            0x18 => {
                let d = self.fetch(bus) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(d as u16);
            }

            // LD A, (DE)
            0x1A => self.regs.a = bus.read(self.regs.de()),

            // JR cc, d (NZ / Z / NC / C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch(bus) as i8;
                if self.condition((op >> 3) & 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                }
            }

            // LD HL, nn
            0x21 => {
                let value = self.fetch16(bus);
                self.regs.set_hl(value);
            }

            // LD (nn), HL
            0x22 => {
                let addr = self.fetch16(bus);
                let value = self.regs.hl();
                self.write16(bus, addr, value);
            }

            // INC HL / DEC HL
            0x23 => self.regs.set_hl(self.regs.hl().wrapping_add(1)),
            0x2B => self.regs.set_hl(self.regs.hl().wrapping_sub(1)),

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.regs.f);
                self.apply(result);
            }

            // LD HL, (nn)
            0x2A => {
                let addr = self.fetch16(bus);
                let value = self.read16(bus, addr);
                self.regs.set_hl(value);
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF)) | HF | NF;
            }

            // LD SP, nn
            0x31 => self.regs.sp = self.fetch16(bus),

            // LD (nn), A
            0x32 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
            }

            // INC SP / DEC SP
            0x33 => self.regs.sp = self.regs.sp.wrapping_add(1),
            0x3B => self.regs.sp = self.regs.sp.wrapping_sub(1),

            // SCF
            0x37 => self.regs.f = (self.regs.f & (SF | ZF | PF)) | CF,

            // LD A, (nn)
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr);
            }

            // CCF (H takes the old carry)
            0x3F => {
                let old_carry = self.regs.f & CF;
                let mut f = self.regs.f & (SF | ZF | PF);
                if old_carry != 0 {
                    f |= HF;
                } else {
                    f |= CF;
                }
                self.regs.f = f;
            }

            // HALT
            0x76 => {
                self.regs.halted = true;
                bus.on_halt();
            }

            // LD r, r'
            0x40..=0x7F => {
                let value = self.load_r(bus, op & 7);
                self.store_r(bus, (op >> 3) & 7, value);
            }

            // ALU A, r
            0x80..=0xBF => {
                let operand = self.load_r(bus, op & 7);
                self.alu_acc((op >> 3) & 7, operand);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop(bus);
                }
            }

            // POP rr (F1 = AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop(bus);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.set_af(value),
                }
            }

            // JP cc, nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.fetch16(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
            }

            // JP nn
            0xC3 => self.regs.pc = self.fetch16(bus),

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.fetch16(bus);
                if self.condition((op >> 3) & 7) {
                    let ret = self.regs.pc;
                    self.push(bus, ret);
                    self.regs.pc = addr;
                }
            }

            // PUSH rr (F5 = AF)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.af(),
                };
                self.push(bus, value);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let operand = self.fetch(bus);
                self.alu_acc((op >> 3) & 7, operand);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let ret = self.regs.pc;
                self.push(bus, ret);
                self.regs.pc = u16::from(op & 0x38);
            }

            // RET
            0xC9 => self.regs.pc = self.pop(bus),

            // CALL nn
            0xCD => {
                let addr = self.fetch16(bus);
                let ret = self.regs.pc;
                self.push(bus, ret);
                self.regs.pc = addr;
            }

            // OUT (n), A — A on the upper address byte
            0xD3 => {
                let port = self.fetch(bus);
                bus.io_write(u16::from(self.regs.a) << 8 | u16::from(port), self.regs.a);
            }

            // IN A, (n) — no flags
            0xDB => {
                let port = self.fetch(bus);
                self.regs.a = bus.io_read(u16::from(self.regs.a) << 8 | u16::from(port));
            }

            // EXX
            0xD9 => {
                std::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                std::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                std::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                std::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                std::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                std::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
            }

            // EX (SP), HL
            0xE3 => {
                let sp = self.regs.sp;
                let from_stack = self.read16(bus, sp);
                let hl = self.regs.hl();
                self.write16(bus, sp, hl);
                self.regs.set_hl(from_stack);
            }

            // JP (HL)
            0xE9 => self.regs.pc = self.regs.hl(),

            // EX DE, HL
            0xEB => {
                std::mem::swap(&mut self.regs.d, &mut self.regs.h);
                std::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }

            // DI / EI (interrupts are not generated; the flip-flops are
            // tracked so firmware state reads back correctly)
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
            }

            // LD SP, HL
            0xF9 => self.regs.sp = self.regs.hl(),

            // Prefixes are routed before this table.
            0xCB | 0xDD | 0xED | 0xFD => unreachable!("prefix handled by step()"),
        }
    }

    /// Execute a CB-prefixed instruction (rotates, shifts, bit ops).
    pub(super) fn execute_cb<B: Bus>(&mut self, bus: &mut B, start_pc: u16) {
        let op = self.fetch(bus);
        let code = op & 7;
        let selector = (op >> 3) & 7;

        match op >> 6 {
            // Rotate/shift group; selector 6 is the undocumented SLL.
            0 => {
                if selector == 6 {
                    self.unimplemented(bus, op, start_pc);
                    return;
                }
                let value = self.load_r(bus, code);
                let result = self.rotate(selector, value);
                self.store_r(bus, code, result.value);
                self.regs.f = result.flags;
            }
            // BIT b, r
            1 => {
                let value = self.load_r(bus, code);
                self.regs.f = bit_flags(selector, value) | (self.regs.f & CF);
            }
            // RES b, r
            2 => {
                let value = self.load_r(bus, code) & !(1 << selector);
                self.store_r(bus, code, value);
            }
            // SET b, r
            _ => {
                let value = self.load_r(bus, code) | (1 << selector);
                self.store_r(bus, code, value);
            }
        }
    }

    /// Execute an ED-prefixed instruction.
    pub(super) fn execute_ed<B: Bus>(&mut self, bus: &mut B, start_pc: u16) {
        let op = self.fetch(bus);
        match op {
            // IN r, (C) — port from BC, flags from the value
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
                let value = bus.io_read(self.regs.bc());
                self.store_r(bus, (op >> 3) & 7, value);
                self.regs.f = szp(value) | (self.regs.f & CF);
            }

            // OUT (C), r
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
                let value = self.load_r(bus, (op >> 3) & 7);
                bus.io_write(self.regs.bc(), value);
            }

            // SBC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let rhs = self.reg16_by_code(op);
                let (result, flags) = alu::sbc16(self.regs.hl(), rhs, self.carry());
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // ADC HL, rr
            0x4A | 0x5A | 0x6A | 0x7A => {
                let rhs = self.reg16_by_code(op);
                let (result, flags) = alu::adc16(self.regs.hl(), rhs, self.carry());
                self.regs.set_hl(result);
                self.regs.f = flags;
            }

            // LD (nn), rr
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                let value = self.reg16_by_code(op);
                self.write16(bus, addr, value);
            }

            // LD rr, (nn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                let value = self.read16(bus, addr);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.sp = value,
                }
            }

            // NEG
            0x44 => {
                let result = alu::sub8(0, self.regs.a, false);
                self.apply(result);
            }

            // RETN / RETI
            0x45 => {
                self.regs.pc = self.pop(bus);
                self.regs.iff1 = self.regs.iff2;
            }
            0x4D => self.regs.pc = self.pop(bus),

            // IM 0 / IM 1 / IM 2
            0x46 => self.regs.im = 0,
            0x56 => self.regs.im = 1,
            0x5E => self.regs.im = 2,

            // LD I, A / LD R, A
            0x47 => self.regs.i = self.regs.a,
            0x4F => self.regs.r = self.regs.a,

            // LD A, I / LD A, R — P/V reflects IFF2
            0x57 => {
                self.regs.a = self.regs.i;
                self.regs.f = sz(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 }
                    | (self.regs.f & CF);
            }
            0x5F => {
                self.regs.a = self.regs.r;
                self.regs.f = sz(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 }
                    | (self.regs.f & CF);
            }

            // RRD: low nibble of (HL) into A, nibbles rotate right
            0x67 => {
                let m = bus.read(self.regs.hl());
                let a = self.regs.a;
                bus.write(self.regs.hl(), (m >> 4) | (a << 4));
                self.regs.a = (a & 0xF0) | (m & 0x0F);
                self.regs.f = szp(self.regs.a) | (self.regs.f & CF);
            }

            // RLD: nibbles rotate left through A
            0x6F => {
                let m = bus.read(self.regs.hl());
                let a = self.regs.a;
                bus.write(self.regs.hl(), (m << 4) | (a & 0x0F));
                self.regs.a = (a & 0xF0) | (m >> 4);
                self.regs.f = szp(self.regs.a) | (self.regs.f & CF);
            }

            // Block transfer / search / I/O
            0xA0 => self.block_ld(bus, 1),
            0xA8 => self.block_ld(bus, 0xFFFF),
            0xB0 => {
                self.block_ld(bus, 1);
                if self.regs.bc() != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }
            0xB8 => {
                self.block_ld(bus, 0xFFFF);
                if self.regs.bc() != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }

            0xA1 => self.block_cp(bus, 1),
            0xA9 => self.block_cp(bus, 0xFFFF),
            0xB1 => {
                self.block_cp(bus, 1);
                if self.regs.bc() != 0 && self.regs.f & ZF == 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }
            0xB9 => {
                self.block_cp(bus, 0xFFFF);
                if self.regs.bc() != 0 && self.regs.f & ZF == 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }

            0xA2 => self.block_in(bus, 1),
            0xAA => self.block_in(bus, 0xFFFF),
            0xB2 => {
                self.block_in(bus, 1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }
            0xBA => {
                self.block_in(bus, 0xFFFF);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }

            0xA3 => self.block_out(bus, 1),
            0xAB => self.block_out(bus, 0xFFFF),
            0xB3 => {
                self.block_out(bus, 1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }
            0xBB => {
                self.block_out(bus, 0xFFFF);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                }
            }

            _ => self.unimplemented(bus, op, start_pc),
        }
    }

    /// rr operand encoded in bits 5-4 of an ED opcode.
    fn reg16_by_code(&self, op: u8) -> u16 {
        match (op >> 4) & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    /// LDI/LDD body. Flags: H and N clear, P/V = BC != 0, S/Z/C preserved.
    fn block_ld<B: Bus>(&mut self, bus: &mut B, delta: u16) {
        let value = bus.read(self.regs.hl());
        bus.write(self.regs.de(), value);
        self.regs.set_hl(self.regs.hl().wrapping_add(delta));
        self.regs.set_de(self.regs.de().wrapping_add(delta));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let mut f = self.regs.f & (SF | ZF | CF);
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;
    }

    /// CPI/CPD body. Compare flags from A - (HL); P/V = BC != 0; C preserved.
    fn block_cp<B: Bus>(&mut self, bus: &mut B, delta: u16) {
        let value = bus.read(self.regs.hl());
        let compare = alu::sub8(self.regs.a, value, false);
        self.regs.set_hl(self.regs.hl().wrapping_add(delta));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let mut f = (compare.flags & (SF | ZF | HF | NF)) | (self.regs.f & CF);
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;
    }

    /// INI/IND body. Port read uses B before the decrement.
    fn block_in<B: Bus>(&mut self, bus: &mut B, delta: u16) {
        let value = bus.io_read(self.regs.bc());
        bus.write(self.regs.hl(), value);
        self.regs.set_hl(self.regs.hl().wrapping_add(delta));
        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.f = sz(self.regs.b) | NF | (self.regs.f & CF);
    }

    /// OUTI/OUTD body. B decrements before it appears on the port address.
    fn block_out<B: Bus>(&mut self, bus: &mut B, delta: u16) {
        let value = bus.read(self.regs.hl());
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.io_write(self.regs.bc(), value);
        self.regs.set_hl(self.regs.hl().wrapping_add(delta));
        self.regs.f = sz(self.regs.b) | NF | (self.regs.f & CF);
    }

    /// Execute a DD/FD-prefixed instruction.
    ///
    /// Only the documented IX/IY forms decode; the undocumented half-index
    /// registers (IXH/IXL/IYH/IYL) and prefix chains report as
    /// unimplemented.
    pub(super) fn execute_indexed<B: Bus>(&mut self, bus: &mut B, start_pc: u16, index: Index) {
        let op = self.fetch(bus);
        match op {
            // ADD ix, rr (rr = BC, DE, ix, SP)
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rhs = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => index.get(&self.regs),
                    _ => self.regs.sp,
                };
                let (result, flags) = alu::add16(index.get(&self.regs), rhs);
                index.set(&mut self.regs, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD ix, nn
            0x21 => {
                let value = self.fetch16(bus);
                index.set(&mut self.regs, value);
            }

            // LD (nn), ix
            0x22 => {
                let addr = self.fetch16(bus);
                let value = index.get(&self.regs);
                self.write16(bus, addr, value);
            }

            // INC ix / DEC ix
            0x23 => {
                let value = index.get(&self.regs).wrapping_add(1);
                index.set(&mut self.regs, value);
            }
            0x2B => {
                let value = index.get(&self.regs).wrapping_sub(1);
                index.set(&mut self.regs, value);
            }

            // LD ix, (nn)
            0x2A => {
                let addr = self.fetch16(bus);
                let value = self.read16(bus, addr);
                index.set(&mut self.regs, value);
            }

            // INC (ix+d) / DEC (ix+d)
            0x34 => {
                let addr = self.index_addr(bus, index);
                let result = alu::inc8(bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x35 => {
                let addr = self.index_addr(bus, index);
                let result = alu::dec8(bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD (ix+d), n — displacement precedes the immediate
            0x36 => {
                let addr = self.index_addr(bus, index);
                let value = self.fetch(bus);
                bus.write(addr, value);
            }

            // LD r, (ix+d)
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                let addr = self.index_addr(bus, index);
                let value = bus.read(addr);
                self.store_r(bus, (op >> 3) & 7, value);
            }

            // LD (ix+d), r
            0x70..=0x75 | 0x77 => {
                let addr = self.index_addr(bus, index);
                let value = self.load_r(bus, op & 7);
                bus.write(addr, value);
            }

            // ALU A, (ix+d)
            0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                let addr = self.index_addr(bus, index);
                let operand = bus.read(addr);
                self.alu_acc((op >> 3) & 7, operand);
            }

            // DDCB/FDCB: displacement then sub-opcode
            0xCB => self.execute_indexed_cb(bus, start_pc, index),

            // POP ix / PUSH ix
            0xE1 => {
                let value = self.pop(bus);
                index.set(&mut self.regs, value);
            }
            0xE5 => {
                let value = index.get(&self.regs);
                self.push(bus, value);
            }

            // EX (SP), ix
            0xE3 => {
                let sp = self.regs.sp;
                let from_stack = self.read16(bus, sp);
                let value = index.get(&self.regs);
                self.write16(bus, sp, value);
                index.set(&mut self.regs, from_stack);
            }

            // JP (ix)
            0xE9 => self.regs.pc = index.get(&self.regs),

            // LD SP, ix
            0xF9 => self.regs.sp = index.get(&self.regs),

            _ => self.unimplemented(bus, op, start_pc),
        }
    }

    /// Execute a DDCB/FDCB instruction. Only the `(ix+d)` operand forms
    /// (sub-opcode low bits = 6) are documented.
    fn execute_indexed_cb<B: Bus>(&mut self, bus: &mut B, start_pc: u16, index: Index) {
        let addr = self.index_addr(bus, index);
        let op = self.fetch(bus);

        if op & 7 != 6 {
            self.unimplemented(bus, op, start_pc);
            return;
        }

        let selector = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                if selector == 6 {
                    self.unimplemented(bus, op, start_pc);
                    return;
                }
                let result = self.rotate(selector, bus.read(addr));
                bus.write(addr, result.value);
                self.regs.f = result.flags;
            }
            1 => {
                let value = bus.read(addr);
                self.regs.f = bit_flags(selector, value) | (self.regs.f & CF);
            }
            2 => {
                let value = bus.read(addr) & !(1 << selector);
                bus.write(addr, value);
            }
            _ => {
                let value = bus.read(addr) | (1 << selector);
                bus.write(addr, value);
            }
        }
    }
}
