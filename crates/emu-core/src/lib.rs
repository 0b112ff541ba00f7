//! Core traits and types for instruction-level emulation.
//!
//! CPUs never own memory or devices. Every access goes through the [`Bus`]
//! trait passed into each step, so a machine crate can route addresses and
//! ports however its hardware demands.

mod bus;
mod observable;

pub use bus::{Bus, SimpleBus};
pub use observable::{Observable, Value};
