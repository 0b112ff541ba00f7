//! RomWBW/HBIOS Z80 single-board computer emulator.
//!
//! Boots CP/M-family operating systems from a RomWBW ROM image: a Z80
//! interpreter (from `emu-z80`) wired to 512 KiB + 512 KiB banked memory,
//! an HBIOS function dispatcher behind an I/O port, and a slice-addressed
//! virtual disk store. A host drives the machine one instruction batch at
//! a time and receives console and video output through a delegate.

mod bus;
mod config;
pub mod cpm_bios;
mod delegate;
mod disk;
mod hbios;
mod machine;
pub mod mcp;
mod memory;

pub use bus::{Fault, HbiosSignal, RomWbwBus};
pub use config::RomWbwConfig;
pub use delegate::{CaptureDelegate, EmulatorDelegate, NullDelegate};
pub use disk::{DiskError, DiskStore, MAX_SLICES, SECTOR_SIZE, SLICE_SECTORS, UNIT_COUNT};
pub use hbios::{HbiosDispatch, HbiosState};
pub use machine::{ControlifyMode, MD0_UNIT, MD1_UNIT, RomWbw};
pub use memory::{BANK_SIZE, BankedMemory, COMMON_BANK, ROM_SIZE};
