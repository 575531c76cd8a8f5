//! CPU emulation for the TISC-64.
//!
//! - 64 general-purpose 64-bit registers (r0 hardwired to zero), plus PC,
//!   SP, FP, RA and a 4-bit status word
//! - fetch-decode-validate-execute cycle over 19-byte instructions
//! - interrupts observed once per cycle from the bus latch

pub mod execute;
pub mod registers;

pub use execute::{Cpu, CpuError, CpuState};
pub use registers::{Flags, Registers, NUM_REGISTERS};
