//! Machine bus: memory and I/O routing.
//!
//! The bus connects the Z80 to the banked memory, the disk store, and the
//! HBIOS dispatcher. Memory accesses go straight through; I/O ports decode
//! the low byte of the port address:
//!
//! | Port | Dir | Meaning |
//! |------|-----|---------|
//! | 0x68 | I/O | UART data: writes feed the output ring, reads pop input |
//! | 0x6D | In  | UART line status (RX ready, TX empty, TEMT) |
//! | 0x78 | I/O | Memory bank register |
//! | 0x7C | I/O | Alias of 0x78 |
//! | 0xEC | Out | Bank-copy helper |
//! | 0xED | Out | Bank call (dispatched as an HBIOS function) |
//! | 0xEE | Out | Generic HBIOS signal |
//! | 0xEF | Out | HBIOS dispatch |
//! | 0xFE | In  | Front-panel sense switches (always 0) |
//!
//! Unknown input ports read 0xFF. Function-call ports cannot run the
//! dispatcher mid-instruction (the CPU holds the register file), so the
//! bus records a signal and the driver services it at the instruction
//! boundary immediately after the OUT.

use emu_core::Bus;
use emu_z80::Registers;

use crate::delegate::EmulatorDelegate;
use crate::disk::DiskStore;
use crate::hbios::HbiosDispatch;
use crate::memory::BankedMemory;

/// UART data port.
const PORT_UART_DATA: u8 = 0x68;
/// UART line status port.
const PORT_UART_STATUS: u8 = 0x6D;
/// Bank register ports (Z180-style pair).
const PORT_BANK: u8 = 0x78;
const PORT_BANK_ALT: u8 = 0x7C;
/// Bank-copy helper port.
const PORT_BANK_COPY: u8 = 0xEC;
/// Bank-call port; the recognized subset dispatches like a normal call.
const PORT_BANK_CALL: u8 = 0xED;
/// Generic HBIOS signal port.
const PORT_HBIOS_SIGNAL: u8 = 0xEE;
/// HBIOS dispatch port.
const PORT_HBIOS: u8 = 0xEF;
/// Front-panel sense switches.
const PORT_SENSE: u8 = 0xFE;

/// A firmware request recorded by the port decoder, serviced by the
/// driver after the instruction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HbiosSignal {
    /// OUT to 0xED/0xEE/0xEF: run the HBIOS function in B.
    Dispatch,
    /// OUT to 0xEC: run the bank-copy helper.
    BankCopy,
}

/// A CPU fault recorded by the host callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Clean HALT.
    Halt,
    /// Undocumented opcode.
    Unimplemented { opcode: u8, pc: u16 },
}

/// The machine bus, implementing `emu_core::Bus`.
pub struct RomWbwBus {
    pub memory: BankedMemory,
    pub disks: DiskStore,
    pub hbios: HbiosDispatch,
    signal: Option<HbiosSignal>,
    fault: Option<Fault>,
}

impl RomWbwBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: BankedMemory::new(),
            disks: DiskStore::new(),
            hbios: HbiosDispatch::new(),
            signal: None,
            fault: None,
        }
    }

    /// Take the pending firmware request, if any.
    pub fn take_signal(&mut self) -> Option<HbiosSignal> {
        self.signal.take()
    }

    /// Take the pending CPU fault, if any.
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }

    /// Service a firmware request against the CPU register file.
    pub fn service(
        &mut self,
        signal: HbiosSignal,
        regs: &mut Registers,
        delegate: &mut dyn EmulatorDelegate,
    ) {
        match signal {
            HbiosSignal::Dispatch => {
                self.hbios
                    .dispatch(regs, &mut self.memory, &mut self.disks, delegate);
            }
            HbiosSignal::BankCopy => self.hbios.bank_copy(regs, &mut self.memory),
        }
    }
}

impl Default for RomWbwBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for RomWbwBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory.fetch(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory.store(addr, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        match port as u8 {
            PORT_UART_DATA => self.hbios.pop_input().unwrap_or(0),
            PORT_UART_STATUS => {
                // Bit 0: RX ready. Bit 5: TX holding empty. Bit 6: TEMT.
                let rx = u8::from(self.hbios.has_input());
                0x60 | rx
            }
            PORT_BANK | PORT_BANK_ALT => self.memory.bank(),
            PORT_SENSE => 0x00,
            _ => 0xFF,
        }
    }

    fn io_write(&mut self, port: u16, value: u8) {
        match port as u8 {
            PORT_UART_DATA => self.hbios.push_output(value),
            PORT_BANK | PORT_BANK_ALT => self.memory.select_bank(value),
            PORT_BANK_COPY => self.signal = Some(HbiosSignal::BankCopy),
            PORT_BANK_CALL | PORT_HBIOS_SIGNAL | PORT_HBIOS => {
                self.signal = Some(HbiosSignal::Dispatch);
            }
            _ => log::trace!("io: write 0x{value:02X} to unhandled port 0x{port:04X}"),
        }
    }

    fn on_halt(&mut self) {
        self.fault = Some(Fault::Halt);
    }

    fn on_unimplemented(&mut self, opcode: u8, pc: u16) {
        self.fault = Some(Fault::Unimplemented { opcode, pc });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bus() -> RomWbwBus {
        let mut bus = RomWbwBus::new();
        bus.memory.load_rom(&[0x00u8; 0x0200]).expect("rom");
        bus
    }

    #[test]
    fn memory_read_write_through_bus() {
        let mut bus = make_bus();
        bus.write(0x9000, 0xAB);
        assert_eq!(bus.read(0x9000), 0xAB);
    }

    #[test]
    fn rom_write_ignored_through_bus() {
        let mut bus = make_bus();
        bus.write(0x0000, 0xFF);
        assert_eq!(bus.read(0x0000), 0x00);
    }

    #[test]
    fn uart_data_port_round_trip() {
        let mut bus = make_bus();
        bus.io_write(0x0068, b'Q');
        assert_eq!(bus.hbios.pop_output(), Some(b'Q'));

        bus.hbios.push_input(b'k');
        assert_eq!(bus.io_read(0x0068), b'k');
        assert_eq!(bus.io_read(0x0068), 0, "empty ring reads 0");
    }

    #[test]
    fn uart_status_bits() {
        let mut bus = make_bus();
        assert_eq!(bus.io_read(0x006D), 0x60, "TX empty and TEMT always set");
        bus.hbios.push_input(b'a');
        assert_eq!(bus.io_read(0x006D), 0x61, "RX ready when input pending");
    }

    #[test]
    fn bank_register_ports() {
        let mut bus = make_bus();
        bus.io_write(0x0078, 0x85);
        assert_eq!(bus.memory.bank(), 0x85);
        assert_eq!(bus.io_read(0x007C), 0x85, "0x7C aliases 0x78");
    }

    #[test]
    fn hbios_ports_record_signals() {
        let mut bus = make_bus();
        assert_eq!(bus.take_signal(), None);

        bus.io_write(0x00EF, 0x00);
        assert_eq!(bus.take_signal(), Some(HbiosSignal::Dispatch));
        assert_eq!(bus.take_signal(), None, "signal is consumed");

        bus.io_write(0x00EC, 0x00);
        assert_eq!(bus.take_signal(), Some(HbiosSignal::BankCopy));

        bus.io_write(0x00ED, 0x00);
        assert_eq!(bus.take_signal(), Some(HbiosSignal::Dispatch));
    }

    #[test]
    fn sense_switches_and_unknown_ports() {
        let mut bus = make_bus();
        assert_eq!(bus.io_read(0x00FE), 0x00);
        assert_eq!(bus.io_read(0x0012), 0xFF);
    }

    #[test]
    fn faults_are_latched_and_consumed() {
        let mut bus = make_bus();
        bus.on_unimplemented(0x30, 0x1234);
        assert_eq!(
            bus.take_fault(),
            Some(Fault::Unimplemented { opcode: 0x30, pc: 0x1234 })
        );
        assert_eq!(bus.take_fault(), None);
    }
}
