//! # TISC-64 Emulator
//!
//! An emulator for the TISC-64, a tiny 64-bit register machine: fixed-width
//! 19-byte instructions, 64 general-purpose registers (r0 hardwired to
//! zero), and a segmented bus routing loads and stores to RAM, ROM and
//! memory-mapped devices.
//!
//! The crate is organized leaf-first:
//! - [`isa`]: instruction encoding, the opcode table, decode and validation
//! - [`bus`]: the address decoder, backing regions and the interrupt latch
//! - [`cpu`]: the register file and the fetch-decode-validate-execute engine
//! - [`asm`]: assembler, disassembler and raw program images

pub mod asm;
pub mod bus;
pub mod cpu;
pub mod isa;

// Re-export commonly used types
pub use asm::{assemble, disassemble, load_image, save_image, AssemblerError, ImageError};
pub use bus::{Bus, BusError, Device, MemoryLayout, Region, WriterDevice};
pub use cpu::{Cpu, CpuError, CpuState, Flags, Registers};
pub use isa::{AddrMode, Instruction, Opcode, INSTRUCTION_WIDTH};
