//! HBIOS function dispatch.
//!
//! The firmware calls into HBIOS with a function code in B and a unit or
//! sub-selector in C; results come back in the registers with a status
//! byte in A. The dispatcher owns the console input and output rings and
//! acts on the memory and disk store handed to it for each call.
//!
//! Dispatch is triggered by an OUT to the HBIOS port and serviced at the
//! instruction boundary right after the OUT completes, with the register
//! file exactly as the firmware left it.

#![allow(clippy::cast_possible_truncation)]

use std::collections::VecDeque;

use emu_z80::Registers;

use crate::delegate::EmulatorDelegate;
use crate::disk::{DiskStore, SECTOR_SIZE};
use crate::memory::BankedMemory;

/// Reported firmware version.
pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 1;

// Status bytes in A: 0 = success, small integers encode the error kind.
const ST_OK: u8 = 0x00;
const ST_RANGE: u8 = 0x01;
const ST_NOT_READY: u8 = 0x02;
const ST_MEDIA: u8 = 0x03;
const ST_INVALID: u8 = 0x04;

/// Common-area cells holding the bank-copy bank bytes. The loaded ROM
/// writes these; the bank-copy helper only reads them.
const SRC_BANK_CELL: u16 = 0xFFE4;
const DST_BANK_CELL: u16 = 0xFFE7;

/// Bump-allocator bounds for SYSALLOC, below the bank-copy cells.
const HEAP_TOP: u16 = 0xFFE0;
const HEAP_BOTTOM: u16 = 0xF000;

/// Boot-image signature bytes at the start of the header sector.
const BOOT_SIG: [u8; 2] = [0x5A, 0xA5];

/// Instructions per 50 Hz timer tick (nominal 8 MHz Z80, 4 cycles per
/// instruction).
const INSTRUCTIONS_PER_TICK: u64 = 40_000;

/// Dispatcher state observed by the batch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbiosState {
    /// Ready to execute.
    Idle,
    /// A console read found the input ring empty; the batch must suspend
    /// until a character is queued, then re-dispatch.
    NeedsInput,
    /// The CPU halted (HALT or undocumented opcode).
    Halted,
}

/// The HBIOS function server.
pub struct HbiosDispatch {
    state: HbiosState,
    /// When true the host feeds input synchronously and the suspension is
    /// not surfaced as an input prompt.
    blocking_allowed: bool,
    boot_in_progress: bool,

    input: VecDeque<u8>,
    output: VecDeque<u8>,

    // SYSSETCPY parameters for the next SYSBNKCPY.
    copy_src_bank: u8,
    copy_dst_bank: u8,
    copy_count: u16,

    heap_ptr: u16,

    // 50 Hz tick counter derived from executed instructions.
    timer_ticks: u32,
    instr_accum: u64,

    /// Wall clock as six BCD bytes: YY MM DD HH MM SS.
    rtc: [u8; 6],

    boot_unit: u8,
    boot_slice: u8,
}

impl HbiosDispatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HbiosState::Idle,
            blocking_allowed: false,
            boot_in_progress: false,
            input: VecDeque::new(),
            output: VecDeque::new(),
            copy_src_bank: 0,
            copy_dst_bank: 0,
            copy_count: 0,
            heap_ptr: HEAP_TOP,
            timer_ticks: 0,
            instr_accum: 0,
            rtc: [0x20, 0x01, 0x01, 0x00, 0x00, 0x00],
            boot_unit: 0,
            boot_slice: 0,
        }
    }

    /// Reset to power-on state, clearing both rings.
    pub fn reset(&mut self) {
        *self = Self {
            blocking_allowed: self.blocking_allowed,
            ..Self::new()
        };
    }

    #[must_use]
    pub const fn state(&self) -> HbiosState {
        self.state
    }

    pub fn set_idle(&mut self) {
        self.state = HbiosState::Idle;
    }

    pub fn set_halted(&mut self) {
        self.state = HbiosState::Halted;
    }

    pub fn set_blocking_allowed(&mut self, allowed: bool) {
        self.blocking_allowed = allowed;
    }

    #[must_use]
    pub const fn blocking_allowed(&self) -> bool {
        self.blocking_allowed
    }

    #[must_use]
    pub const fn boot_in_progress(&self) -> bool {
        self.boot_in_progress
    }

    /// Queue a console input byte.
    pub fn push_input(&mut self, ch: u8) {
        self.input.push_back(ch);
    }

    #[must_use]
    pub fn has_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Pop a console input byte (the UART data port reads here too).
    pub fn pop_input(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    /// Push a byte to the console output ring (UART data port writes).
    pub fn push_output(&mut self, ch: u8) {
        self.output.push_back(ch);
    }

    /// Drain one byte of console output.
    pub fn pop_output(&mut self) -> Option<u8> {
        self.output.pop_front()
    }

    /// Advance the 50 Hz timer by a number of executed instructions.
    pub fn advance_timer(&mut self, executed: u64) {
        self.instr_accum += executed;
        let ticks = self.instr_accum / INSTRUCTIONS_PER_TICK;
        self.instr_accum %= INSTRUCTIONS_PER_TICK;
        self.timer_ticks = self.timer_ticks.wrapping_add(ticks as u32);
    }

    /// Set the BCD wall clock (YY MM DD HH MM SS).
    pub fn set_rtc(&mut self, bcd: [u8; 6]) {
        self.rtc = bcd;
    }

    /// Service one HBIOS call. B holds the function code.
    pub fn dispatch(
        &mut self,
        regs: &mut Registers,
        mem: &mut BankedMemory,
        disks: &mut DiskStore,
        delegate: &mut dyn EmulatorDelegate,
    ) {
        let func = regs.b;
        log::trace!("hbios: fn=0x{func:02X} c=0x{:02X} de=0x{:04X} hl=0x{:04X}",
            regs.c, regs.de(), regs.hl());

        match func {
            // --- Character I/O -------------------------------------------
            // CIOIN: one byte from the input ring into E. An empty ring
            // suspends the batch; the driver re-dispatches with the same
            // registers once input arrives.
            0x00 => match self.input.pop_front() {
                Some(ch) => {
                    regs.e = ch;
                    regs.a = ST_OK;
                }
                None => self.state = HbiosState::NeedsInput,
            },
            // CIOOUT: E to the output ring.
            0x01 => {
                self.output.push_back(regs.e);
                regs.a = ST_OK;
            }
            // CIOIST: input-ready test.
            0x02 => regs.a = if self.input.is_empty() { 0x00 } else { 0xFF },
            // CIOOST: output always ready.
            0x03 => regs.a = 0xFF,
            // CIOINIT: accept and ignore line configuration.
            0x04 => regs.a = ST_OK,
            // CIOQUERY: canned line configuration.
            0x05 => {
                regs.set_de(0);
                regs.a = ST_OK;
            }
            // CIODEVICE: single UART console.
            0x06 => {
                regs.d = 0x00; // device type: UART
                regs.e = regs.c;
                regs.a = ST_OK;
            }

            // --- Disk I/O ------------------------------------------------
            0x10..=0x1B => self.dio(func, regs, mem, disks),

            // --- Real-time clock ----------------------------------------
            // RTCGETTIM: six BCD bytes to the buffer at HL.
            0x20 => {
                let addr = regs.hl();
                for (i, &byte) in self.rtc.iter().enumerate() {
                    mem.store(addr.wrapping_add(i as u16), byte);
                }
                regs.a = ST_OK;
            }
            // RTCSETTIM: six BCD bytes from the buffer at HL.
            0x21 => {
                let addr = regs.hl();
                for i in 0..6 {
                    self.rtc[i] = mem.fetch(addr.wrapping_add(i as u16));
                }
                regs.a = ST_OK;
            }

            // --- Video display adapter ----------------------------------
            0x40..=0x4E => self.vda(func, regs, delegate),

            // --- Slice extension ----------------------------------------
            // EXTSLICE: E = 0xFF queries the active slice, anything else
            // selects it.
            0xE0 => {
                let unit = regs.c as usize;
                if regs.e == 0xFF {
                    match disks.slice(unit) {
                        Ok(slice) => {
                            regs.e = slice;
                            regs.a = ST_OK;
                        }
                        Err(e) => regs.a = e.status(),
                    }
                } else {
                    regs.a = match disks.set_slice(unit, regs.e) {
                        Ok(()) => ST_OK,
                        Err(e) => e.status(),
                    };
                }
            }

            // --- System --------------------------------------------------
            // SYSRESET: back to ROM bank 0 at address 0. RAM is left as it
            // is for both warm and cold resets; the ROM reinitializes what
            // it needs.
            0xF0 => {
                let warm = regs.e == 0x01;
                mem.select_bank(0x00);
                regs.pc = 0x0000;
                regs.sp = 0x0000;
                self.boot_in_progress = false;
                delegate.on_status(if warm {
                    "Warm boot - restarting"
                } else {
                    "Cold boot - restarting"
                });
                regs.a = ST_OK;
            }
            // SYSVER: major/minor in L/H.
            0xF1 => {
                regs.l = VERSION_MAJOR;
                regs.h = VERSION_MINOR;
                regs.a = ST_OK;
            }
            // SYSSETBNK: select bank C, previous bank back in C.
            0xF2 => {
                let previous = mem.bank();
                mem.select_bank(regs.c);
                regs.c = previous;
                regs.a = ST_OK;
            }
            // SYSGETBNK
            0xF3 => {
                regs.c = mem.bank();
                regs.a = ST_OK;
            }
            // SYSSETCPY: banks and count for the next SYSBNKCPY.
            0xF4 => {
                self.copy_src_bank = regs.e;
                self.copy_dst_bank = regs.d;
                self.copy_count = regs.hl();
                regs.a = ST_OK;
            }
            // SYSBNKCPY: HL source address, DE destination address.
            0xF5 => {
                let mut src = regs.hl();
                let mut dst = regs.de();
                for _ in 0..self.copy_count {
                    let byte = mem.read_bank(self.copy_src_bank, src);
                    mem.write_bank(self.copy_dst_bank, dst, byte);
                    src = src.wrapping_add(1);
                    dst = dst.wrapping_add(1);
                }
                regs.a = ST_OK;
            }
            // SYSALLOC: bump-allocate from the common-area heap.
            0xF6 => {
                let size = regs.hl();
                let next = self.heap_ptr.wrapping_sub(size);
                if size > self.heap_ptr - HEAP_BOTTOM {
                    regs.a = ST_INVALID;
                } else {
                    self.heap_ptr = next;
                    regs.set_hl(next);
                    regs.a = ST_OK;
                }
            }
            // SYSGET: query system-state items by sub-code in C.
            0xF8 => self.sysget(regs, disks),
            // SYSSET: modify system-state items by sub-code in C.
            0xF9 => self.sysset(regs),
            // SYSPEEK: byte from bank D at HL into E.
            0xFA => {
                regs.e = mem.read_bank(regs.d, regs.hl());
                regs.a = ST_OK;
            }
            // SYSPOKE: E into bank D at HL.
            0xFB => {
                mem.write_bank(regs.d, regs.hl(), regs.e);
                regs.a = ST_OK;
            }
            // SYSBOOT: load a boot image from unit C and jump to it.
            0xFE => self.sysboot(regs, mem, disks, delegate),

            _ => {
                log::debug!("hbios: unknown function 0x{func:02X}");
                regs.a = ST_INVALID;
            }
        }
    }

    /// Disk I/O group. C holds the unit.
    fn dio(&mut self, func: u8, regs: &mut Registers, mem: &mut BankedMemory, disks: &mut DiskStore) {
        let unit = regs.c as usize;
        match func {
            // DIOSTATUS
            0x10 => {
                regs.a = if disks.is_present(unit) {
                    ST_OK
                } else {
                    ST_NOT_READY
                };
            }
            // DIORESET
            0x11 => {
                regs.a = match disks.reset_unit(unit) {
                    Ok(()) => ST_OK,
                    Err(e) => e.status(),
                };
            }
            // DIOSEEK: 32-bit LBA in DE:HL; bit 31 flags LBA addressing.
            0x12 => {
                let lba = (u32::from(regs.de()) << 16 | u32::from(regs.hl())) & 0x7FFF_FFFF;
                regs.a = match disks.seek(unit, lba) {
                    Ok(()) => ST_OK,
                    Err(e) => e.status(),
                };
            }
            // DIOREAD: E sectors to bank D at HL.
            0x13 => {
                let count = regs.e;
                let bank = regs.d;
                let mut addr = regs.hl();
                let mut done = 0u8;
                let mut status = ST_OK;
                let mut sector = [0u8; SECTOR_SIZE];
                for _ in 0..count {
                    match disks.read_sector(unit, &mut sector) {
                        Ok(()) => {
                            for &byte in &sector {
                                mem.write_bank(bank, addr, byte);
                                addr = addr.wrapping_add(1);
                            }
                            done += 1;
                        }
                        Err(e) => {
                            status = e.status();
                            break;
                        }
                    }
                }
                regs.e = done;
                regs.a = status;
            }
            // DIOWRITE: E sectors from bank D at HL.
            0x14 => {
                let count = regs.e;
                let bank = regs.d;
                let mut addr = regs.hl();
                let mut done = 0u8;
                let mut status = ST_OK;
                let mut sector = [0u8; SECTOR_SIZE];
                for _ in 0..count {
                    for byte in &mut sector {
                        *byte = mem.read_bank(bank, addr);
                        addr = addr.wrapping_add(1);
                    }
                    match disks.write_sector(unit, &sector) {
                        Ok(()) => done += 1,
                        Err(e) => {
                            status = e.status();
                            break;
                        }
                    }
                }
                regs.e = done;
                regs.a = status;
            }
            // DIOVERIFY / DIOFORMAT / DIODEFMED: accepted as successful.
            0x15 | 0x16 | 0x19 => regs.a = ST_OK,
            // DIODEVICE
            0x17 => match disks.media(unit) {
                Ok(media) => {
                    // Memory disks report type 1, everything else as a
                    // hard disk.
                    regs.d = if media == crate::disk::MEDIA_HARD_DISK { 3 } else { 1 };
                    regs.e = unit as u8;
                    regs.a = ST_OK;
                }
                Err(e) => regs.a = e.status(),
            },
            // DIOMEDIA
            0x18 => match disks.media(unit) {
                Ok(media) => {
                    regs.e = media;
                    regs.a = ST_OK;
                }
                Err(e) => regs.a = e.status(),
            },
            // DIOCAP: capacity in sectors in DE:HL, block size in BC.
            0x1A => match disks.capacity(unit) {
                Ok((sectors, _)) => {
                    regs.set_de((sectors >> 16) as u16);
                    regs.set_hl(sectors as u16);
                    regs.set_bc(SECTOR_SIZE as u16);
                    regs.a = ST_OK;
                }
                Err(e) => regs.a = e.status(),
            },
            // DIOGEOM: LBA-style geometry derived from capacity.
            0x1B => match disks.capacity(unit) {
                Ok((sectors, _)) => {
                    regs.set_hl((sectors / (16 * 16)) as u16); // cylinders
                    regs.d = 16; // heads
                    regs.e = 16; // sectors per track
                    regs.a = ST_OK;
                }
                Err(e) => regs.a = e.status(),
            },
            _ => regs.a = ST_INVALID,
        }
    }

    /// Video display adapter group, emitted through the delegate.
    fn vda(&mut self, func: u8, regs: &mut Registers, delegate: &mut dyn EmulatorDelegate) {
        match func {
            // VDAINI / VDARES: reset the display.
            0x40 | 0x42 => {
                delegate.vda_clear();
                regs.a = ST_OK;
            }
            // VDAQRY: 80x24 text display.
            0x41 => {
                regs.c = 0; // video mode
                regs.d = 24;
                regs.e = 80;
                regs.a = ST_OK;
            }
            // VDADEV
            0x43 => {
                regs.d = 0x40;
                regs.e = 0;
                regs.a = ST_OK;
            }
            // VDASCS (cursor style) / VDASCO (color): accepted, ignored.
            0x44 | 0x47 => regs.a = ST_OK,
            // VDASCP: cursor position, row in D, column in E.
            0x45 => {
                delegate.vda_set_cursor(regs.d, regs.e);
                regs.a = ST_OK;
            }
            // VDASAT: character attribute.
            0x46 => {
                delegate.vda_set_attr(regs.e);
                regs.a = ST_OK;
            }
            // VDAWRC: one character at the cursor.
            0x48 => {
                delegate.vda_write_char(regs.e);
                regs.a = ST_OK;
            }
            // VDAFIL: character E repeated HL times.
            0x49 => {
                for _ in 0..regs.hl() {
                    delegate.vda_write_char(regs.e);
                }
                regs.a = ST_OK;
            }
            // VDACPY is not supported by the emulated display.
            0x4A => regs.a = ST_INVALID,
            // VDASCR: scroll up E lines; negative counts are ignored.
            0x4B => {
                let lines = regs.e as i8;
                if lines > 0 {
                    delegate.vda_scroll_up(lines as u8);
                }
                regs.a = ST_OK;
            }
            // VDAKST: buffered key count.
            0x4C => regs.a = self.input.len().min(0xFF) as u8,
            // VDAKFL: flush the keyboard buffer.
            0x4D => {
                self.input.clear();
                regs.a = ST_OK;
            }
            // VDAKRD: keyboard read, same suspension rules as CIOIN.
            0x4E => match self.input.pop_front() {
                Some(ch) => {
                    regs.e = ch;
                    regs.d = ch; // scancode mirrors the character
                    regs.a = ST_OK;
                }
                None => self.state = HbiosState::NeedsInput,
            },
            _ => regs.a = ST_INVALID,
        }
    }

    /// SYSGET sub-functions (sub-code in C).
    fn sysget(&mut self, regs: &mut Registers, disks: &DiskStore) {
        match regs.c {
            // CIOCNT: one console device.
            0x00 => {
                regs.e = 1;
                regs.a = ST_OK;
            }
            // DIOCNT: attached disk units.
            0x10 => {
                regs.e = disks.present_count();
                regs.a = ST_OK;
            }
            // VDACNT: one display.
            0x40 => {
                regs.e = 1;
                regs.a = ST_OK;
            }
            // TIMER: 50 Hz tick count in DE:HL.
            0xD0 => {
                regs.set_de((self.timer_ticks >> 16) as u16);
                regs.set_hl(self.timer_ticks as u16);
                regs.a = ST_OK;
            }
            // SECS: seconds since start in DE:HL.
            0xD1 => {
                let secs = self.timer_ticks / 50;
                regs.set_de((secs >> 16) as u16);
                regs.set_hl(secs as u16);
                regs.a = ST_OK;
            }
            // BOOTINFO: boot unit and slice.
            0xE0 => {
                regs.d = self.boot_unit;
                regs.e = self.boot_slice;
                regs.a = ST_OK;
            }
            // CPUINFO: Z80 at a nominal 8 MHz.
            0xF0 => {
                regs.d = 1;
                regs.e = 8;
                regs.a = ST_OK;
            }
            // MEMINFO: 16 ROM banks, 16 RAM banks.
            0xF1 => {
                regs.d = 16;
                regs.e = 16;
                regs.a = ST_OK;
            }
            // BNKINFO: user and BIOS bank bytes.
            0xF2 => {
                regs.d = 0x8E;
                regs.e = 0x8F;
                regs.a = ST_OK;
            }
            _ => regs.a = ST_INVALID,
        }
    }

    /// SYSSET sub-functions (sub-code in C).
    fn sysset(&mut self, regs: &mut Registers) {
        match regs.c {
            // TIMER
            0xD0 => {
                self.timer_ticks = u32::from(regs.de()) << 16 | u32::from(regs.hl());
                regs.a = ST_OK;
            }
            // BOOTINFO
            0xE0 => {
                self.boot_unit = regs.d;
                self.boot_slice = regs.e;
                regs.a = ST_OK;
            }
            _ => regs.a = ST_INVALID,
        }
    }

    /// SYSBOOT: read the boot image header at the unit's current position,
    /// copy the payload through the 64 KiB window, and jump to the entry
    /// point.
    fn sysboot(
        &mut self,
        regs: &mut Registers,
        mem: &mut BankedMemory,
        disks: &mut DiskStore,
        delegate: &mut dyn EmulatorDelegate,
    ) {
        let unit = regs.c as usize;
        let mut header = [0u8; SECTOR_SIZE];
        if let Err(e) = disks.read_sector(unit, &mut header) {
            regs.a = e.status();
            return;
        }
        if header[0..2] != BOOT_SIG {
            regs.a = ST_MEDIA;
            return;
        }

        let load = u16::from(header[2]) | u16::from(header[3]) << 8;
        let entry = u16::from(header[4]) | u16::from(header[5]) << 8;
        let sectors = u16::from(header[6]) | u16::from(header[7]) << 8;

        let mut addr = load;
        let mut sector = [0u8; SECTOR_SIZE];
        for _ in 0..sectors {
            if let Err(e) = disks.read_sector(unit, &mut sector) {
                regs.a = e.status();
                return;
            }
            for &byte in &sector {
                mem.store(addr, byte);
                addr = addr.wrapping_add(1);
            }
        }

        delegate.on_status(&format!("Booting from disk unit {unit}"));
        self.boot_in_progress = true;
        regs.pc = entry;
        regs.a = ST_OK;
    }

    /// Bank-copy helper behind its own I/O port: HL source, DE
    /// destination, BC length from the registers; the source and
    /// destination bank bytes from the common-area parameter cells.
    pub fn bank_copy(&mut self, regs: &Registers, mem: &mut BankedMemory) {
        let src_bank = mem.fetch(SRC_BANK_CELL);
        let dst_bank = mem.fetch(DST_BANK_CELL);
        let mut src = regs.hl();
        let mut dst = regs.de();
        log::trace!(
            "bank copy: 0x{src_bank:02X}:{src:04X} -> 0x{dst_bank:02X}:{dst:04X} len 0x{:04X}",
            regs.bc()
        );
        for _ in 0..regs.bc() {
            // Addresses in the upper half hit the common window no matter
            // which bank byte the cells name.
            let byte = mem.read_bank(src_bank, src);
            mem.write_bank(dst_bank, dst, byte);
            src = src.wrapping_add(1);
            dst = dst.wrapping_add(1);
        }
    }
}

impl Default for HbiosDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::CaptureDelegate;
    use crate::disk::SLICE_SECTORS;

    struct Fixture {
        hbios: HbiosDispatch,
        regs: Registers,
        mem: BankedMemory,
        disks: DiskStore,
        delegate: CaptureDelegate,
    }

    fn make_fixture() -> Fixture {
        let mut mem = BankedMemory::new();
        mem.load_rom(&[0xF3u8; 0x0200]).expect("rom");
        Fixture {
            hbios: HbiosDispatch::new(),
            regs: Registers::default(),
            mem,
            disks: DiskStore::new(),
            delegate: CaptureDelegate::new(),
        }
    }

    impl Fixture {
        fn call(&mut self, func: u8) {
            self.regs.b = func;
            let mut delegate = self.delegate.clone();
            self.hbios
                .dispatch(&mut self.regs, &mut self.mem, &mut self.disks, &mut delegate);
        }
    }

    #[test]
    fn cioin_pops_in_fifo_order() {
        let mut fx = make_fixture();
        fx.hbios.push_input(b'A');
        fx.hbios.push_input(b'B');

        fx.call(0x00);
        assert_eq!(fx.regs.e, b'A');
        assert_eq!(fx.regs.a, 0);
        fx.call(0x00);
        assert_eq!(fx.regs.e, b'B');
    }

    #[test]
    fn cioin_empty_suspends_and_redispatches() {
        let mut fx = make_fixture();
        fx.regs.e = 0x55;
        fx.call(0x00);
        assert_eq!(fx.hbios.state(), HbiosState::NeedsInput);
        assert_eq!(fx.regs.e, 0x55, "registers untouched while suspended");

        // Input arrives; the driver re-dispatches with the same registers.
        fx.hbios.push_input(b'x');
        fx.hbios.set_idle();
        fx.call(0x00);
        assert_eq!(fx.regs.e, b'x');
        assert_eq!(fx.hbios.state(), HbiosState::Idle);
    }

    #[test]
    fn cioout_and_status_tests() {
        let mut fx = make_fixture();
        fx.regs.e = b'!';
        fx.call(0x01);
        assert_eq!(fx.hbios.pop_output(), Some(b'!'));

        fx.call(0x02);
        assert_eq!(fx.regs.a, 0x00, "no input pending");
        fx.hbios.push_input(b'z');
        fx.call(0x02);
        assert_eq!(fx.regs.a, 0xFF);

        fx.call(0x03);
        assert_eq!(fx.regs.a, 0xFF, "output always ready");
    }

    #[test]
    fn dio_read_write_roundtrip_through_memory() {
        let mut fx = make_fixture();
        fx.disks.attach(3, vec![0u8; 8 * SECTOR_SIZE], 1).unwrap();

        // Fill a common-area buffer and write it to sector 5.
        for i in 0..SECTOR_SIZE as u16 {
            fx.mem.store(0x9000 + i, (i & 0xFF) as u8);
        }
        fx.regs.c = 3;
        fx.regs.set_de(0);
        fx.regs.set_hl(5);
        fx.call(0x12); // DIOSEEK
        assert_eq!(fx.regs.a, 0);

        fx.regs.d = COMMON_BANK_BYTE;
        fx.regs.e = 1;
        fx.regs.set_hl(0x9000);
        fx.call(0x14); // DIOWRITE
        assert_eq!(fx.regs.a, 0);
        assert_eq!(fx.regs.e, 1);

        // Read it back to a different buffer.
        fx.regs.set_de(0);
        fx.regs.set_hl(5);
        fx.call(0x12);
        fx.regs.d = COMMON_BANK_BYTE;
        fx.regs.e = 1;
        fx.regs.set_hl(0xA000);
        fx.call(0x13); // DIOREAD
        assert_eq!(fx.regs.a, 0);
        assert_eq!(fx.mem.fetch(0xA007), 0x07);
        assert!(fx.disks.is_dirty(3));
    }

    const COMMON_BANK_BYTE: u8 = 0x8F;

    #[test]
    fn dio_errors_surface_as_status_bytes() {
        let mut fx = make_fixture();

        fx.regs.c = 9; // absent unit
        fx.call(0x10);
        assert_eq!(fx.regs.a, 0x02, "not ready");

        fx.disks.attach(9, vec![0u8; 2 * SECTOR_SIZE], 1).unwrap();
        fx.call(0x10);
        assert_eq!(fx.regs.a, 0x00);

        // Seek past the blob then read: sector out of range.
        fx.regs.set_de(0);
        fx.regs.set_hl(2);
        fx.call(0x12);
        fx.regs.d = COMMON_BANK_BYTE;
        fx.regs.e = 1;
        fx.regs.set_hl(0x9000);
        fx.call(0x13);
        assert_eq!(fx.regs.a, 0x03);
        assert_eq!(fx.regs.e, 0, "no sectors transferred");
    }

    #[test]
    fn diocap_reports_slice_capacity() {
        let mut fx = make_fixture();
        // 8 MiB plus 1024 bytes, two slices.
        let len = SLICE_SECTORS as usize * SECTOR_SIZE + 1024;
        fx.disks.attach(0, vec![0u8; len], 2).unwrap();

        fx.regs.c = 0;
        fx.call(0x1A);
        assert_eq!(fx.regs.a, 0);
        let sectors = u32::from(fx.regs.de()) << 16 | u32::from(fx.regs.hl());
        assert_eq!(sectors, 2 * SLICE_SECTORS);
        assert_eq!(fx.regs.bc(), 512);
    }

    #[test]
    fn sysver_and_banks() {
        let mut fx = make_fixture();
        fx.call(0xF1);
        assert_eq!(fx.regs.l, VERSION_MAJOR);
        assert_eq!(fx.regs.h, VERSION_MINOR);

        fx.regs.c = 0x85;
        fx.call(0xF2); // SYSSETBNK
        assert_eq!(fx.regs.c, 0x00, "previous bank returned");
        assert_eq!(fx.mem.bank(), 0x85);

        fx.call(0xF3); // SYSGETBNK
        assert_eq!(fx.regs.c, 0x85);
    }

    #[test]
    fn syssetbnk_initializes_ram_bank() {
        let mut fx = make_fixture();
        fx.regs.c = 0x83;
        fx.call(0xF2);
        // Page zero was copied from ROM bank 0 on first select.
        assert_eq!(fx.mem.fetch(0x0000), 0xF3);
    }

    #[test]
    fn bnkcpy_pair_copies_across_banks() {
        let mut fx = make_fixture();
        // Source bytes in RAM bank 2.
        fx.mem.write_bank(0x82, 0x4000, 0xDE);
        fx.mem.write_bank(0x82, 0x4001, 0xAD);

        fx.regs.d = 0x84; // destination bank
        fx.regs.e = 0x82; // source bank
        fx.regs.set_hl(2); // count
        fx.call(0xF4);

        fx.regs.set_hl(0x4000);
        fx.regs.set_de(0x6000);
        fx.call(0xF5);
        assert_eq!(fx.regs.a, 0);
        assert_eq!(fx.mem.read_bank(0x84, 0x6000), 0xDE);
        assert_eq!(fx.mem.read_bank(0x84, 0x6001), 0xAD);
    }

    #[test]
    fn syspeek_syspoke() {
        let mut fx = make_fixture();
        fx.regs.d = 0x86;
        fx.regs.set_hl(0x1234);
        fx.regs.e = 0x77;
        fx.call(0xFB); // SYSPOKE
        assert_eq!(fx.mem.read_bank(0x86, 0x1234), 0x77);

        fx.regs.e = 0;
        fx.call(0xFA); // SYSPEEK
        assert_eq!(fx.regs.e, 0x77);
    }

    #[test]
    fn sysget_counts_and_bootinfo() {
        let mut fx = make_fixture();
        fx.disks.attach(0, vec![0u8; SECTOR_SIZE], 1).unwrap();
        fx.disks.attach(4, vec![0u8; SECTOR_SIZE], 1).unwrap();

        fx.regs.c = 0x10; // DIOCNT
        fx.call(0xF8);
        assert_eq!(fx.regs.e, 2);

        fx.regs.c = 0xE0; // SYSSET BOOTINFO
        fx.regs.d = 2;
        fx.regs.e = 1;
        fx.call(0xF9);

        fx.regs.c = 0xE0;
        fx.regs.d = 0;
        fx.regs.e = 0;
        fx.call(0xF8);
        assert_eq!((fx.regs.d, fx.regs.e), (2, 1));

        fx.regs.c = 0x77; // unknown sub-code
        fx.call(0xF8);
        assert_eq!(fx.regs.a, 0x04);
    }

    #[test]
    fn sysalloc_bumps_downward() {
        let mut fx = make_fixture();
        fx.regs.set_hl(0x0100);
        fx.call(0xF6);
        assert_eq!(fx.regs.a, 0);
        let first = fx.regs.hl();
        assert_eq!(first, HEAP_TOP - 0x0100);

        fx.regs.set_hl(0x0100);
        fx.call(0xF6);
        assert_eq!(fx.regs.hl(), first - 0x0100);
    }

    #[test]
    fn sysreset_reports_warm_and_cold() {
        let mut fx = make_fixture();
        fx.mem.select_bank(0x8E);
        fx.regs.pc = 0xBEEF;
        fx.regs.e = 0x01;
        fx.call(0xF0);
        assert_eq!(fx.regs.pc, 0);
        assert_eq!(fx.mem.bank(), 0x00);
        assert!(fx.delegate.statuses().iter().any(|s| s.contains("Warm")));

        fx.regs.e = 0x00;
        fx.call(0xF0);
        assert!(fx.delegate.statuses().iter().any(|s| s.contains("Cold")));
    }

    #[test]
    fn rtc_set_then_get() {
        let mut fx = make_fixture();
        // Write BCD 2026-08-02 12:34:56 into a buffer, set, clear, get.
        let stamp = [0x26, 0x08, 0x02, 0x12, 0x34, 0x56];
        for (i, &b) in stamp.iter().enumerate() {
            fx.mem.store(0x9000 + i as u16, b);
        }
        fx.regs.set_hl(0x9000);
        fx.call(0x21); // RTCSETTIM

        fx.regs.set_hl(0xA000);
        fx.call(0x20); // RTCGETTIM
        for (i, &b) in stamp.iter().enumerate() {
            assert_eq!(fx.mem.fetch(0xA000 + i as u16), b);
        }
    }

    #[test]
    fn vda_calls_reach_the_delegate() {
        let mut fx = make_fixture();
        fx.call(0x40); // VDAINI
        assert_eq!(fx.delegate.vda_clears(), 1);

        fx.regs.d = 5;
        fx.regs.e = 10;
        fx.call(0x45); // VDASCP
        assert_eq!(fx.delegate.cursor(), Some((5, 10)));

        fx.regs.e = b'H';
        fx.call(0x48); // VDAWRC
        assert_eq!(fx.delegate.take_output(), vec![b'H']);

        fx.call(0x41); // VDAQRY
        assert_eq!((fx.regs.d, fx.regs.e), (24, 80));
    }

    #[test]
    fn vdakrd_suspends_like_cioin() {
        let mut fx = make_fixture();
        fx.call(0x4E);
        assert_eq!(fx.hbios.state(), HbiosState::NeedsInput);

        fx.hbios.set_idle();
        fx.hbios.push_input(0x1B);
        fx.call(0x4E);
        assert_eq!(fx.regs.e, 0x1B);
    }

    #[test]
    fn extslice_query_and_set() {
        let mut fx = make_fixture();
        let len = SLICE_SECTORS as usize * SECTOR_SIZE * 2;
        fx.disks.attach(1, vec![0u8; len], 2).unwrap();

        fx.regs.c = 1;
        fx.regs.e = 0xFF;
        fx.call(0xE0);
        assert_eq!(fx.regs.e, 0, "query returns the active slice");

        fx.regs.e = 1;
        fx.call(0xE0);
        assert_eq!(fx.regs.a, 0);
        assert_eq!(fx.disks.slice(1).unwrap(), 1);

        fx.regs.e = 5; // beyond slice_count
        fx.call(0xE0);
        assert_eq!(fx.regs.a, 0x01);
    }

    #[test]
    fn sysboot_loads_image_and_jumps() {
        let mut fx = make_fixture();

        // Boot image: header + 1 payload sector of 0xC9 at 0x8000,
        // entry 0x8000.
        let mut image = vec![0u8; 2 * SECTOR_SIZE];
        image[0] = 0x5A;
        image[1] = 0xA5;
        image[2] = 0x00; // load 0x8000
        image[3] = 0x80;
        image[4] = 0x00; // entry 0x8000
        image[5] = 0x80;
        image[6] = 0x01; // one payload sector
        image[7] = 0x00;
        image[SECTOR_SIZE] = 0xC9;
        fx.disks.attach(2, image, 1).unwrap();

        fx.regs.c = 2;
        fx.call(0xFE);
        assert_eq!(fx.regs.a, 0);
        assert_eq!(fx.regs.pc, 0x8000);
        assert_eq!(fx.mem.fetch(0x8000), 0xC9);
        assert!(fx.hbios.boot_in_progress());
        assert!(fx.delegate.statuses().iter().any(|s| s.contains("Booting")));
    }

    #[test]
    fn sysboot_rejects_bad_signature() {
        let mut fx = make_fixture();
        fx.disks.attach(2, vec![0u8; SECTOR_SIZE], 1).unwrap();
        fx.regs.c = 2;
        fx.call(0xFE);
        assert_eq!(fx.regs.a, 0x03, "media error");
        assert!(!fx.hbios.boot_in_progress());
    }

    #[test]
    fn bank_copy_reads_banks_from_common_cells() {
        let mut fx = make_fixture();
        fx.mem.store(SRC_BANK_CELL, 0x00); // ROM bank 0
        fx.mem.store(DST_BANK_CELL, 0x8F); // common bank

        let mut regs = Registers::default();
        regs.set_hl(0x0000);
        regs.set_de(0x4000);
        regs.set_bc(0x0004);
        fx.hbios.bank_copy(&regs, &mut fx.mem);
        assert_eq!(fx.mem.read_bank(0x8F, 0x4000), 0xF3);
    }

    #[test]
    fn unknown_function_is_invalid() {
        let mut fx = make_fixture();
        fx.call(0x99);
        assert_eq!(fx.regs.a, 0x04);
    }

    #[test]
    fn timer_advances_with_instructions() {
        let mut fx = make_fixture();
        fx.hbios.advance_timer(INSTRUCTIONS_PER_TICK * 3 + 10);
        fx.regs.c = 0xD0;
        fx.call(0xF8);
        assert_eq!(fx.regs.hl(), 3);

        fx.hbios.advance_timer(INSTRUCTIONS_PER_TICK - 10);
        fx.regs.c = 0xD0;
        fx.call(0xF8);
        assert_eq!(fx.regs.hl(), 4, "fractional ticks accumulate");
    }
}
