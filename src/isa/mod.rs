//! Instruction set definition for the TISC-64.
//!
//! An instruction is a fixed 19-byte record:
//!
//! ```text
//! [0]      opcode (u8)
//! [1]      source addressing mode (u8)
//! [2]      destination addressing mode (u8)
//! [3..11)  source operand (u64, little-endian)
//! [11..19) destination operand (u64, little-endian)
//! ```
//!
//! Decoding is total: any 19 bytes produce a structurally valid
//! [`Instruction`]. Semantic legality (known opcode, permitted addressing
//! modes, required operands present) is checked separately by [`validate`]
//! against the opcode table, which is the single source of truth and is
//! consulted before every execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded instruction width in bytes.
pub const INSTRUCTION_WIDTH: usize = 19;

/// Addressing mode bitmask.
///
/// Opcode table entries combine bits to describe the set of modes legal for
/// an operand slot; a decoded instruction's mode field carries at most one
/// bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMode(u8);

impl AddrMode {
    /// Operand slot unused.
    pub const NONE: AddrMode = AddrMode(0);
    /// Operand is a literal value.
    pub const IMMEDIATE: AddrMode = AddrMode(1);
    /// Operand is a register index.
    pub const REGISTER: AddrMode = AddrMode(2);
    /// Operand is a memory address, routed through the bus.
    pub const DIRECT: AddrMode = AddrMode(4);
    /// Operand is a register holding a memory address.
    ///
    /// Declared by the grammar but admitted by no opcode table row, so
    /// validation rejects it everywhere.
    pub const INDIRECT: AddrMode = AddrMode(8);

    /// Reconstruct a mode from a raw instruction byte.
    pub const fn from_bits(bits: u8) -> AddrMode {
        AddrMode(bits)
    }

    /// The raw bitmask.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Union of two mode sets, for building table entries.
    pub const fn union(self, other: AddrMode) -> AddrMode {
        AddrMode(self.0 | other.0)
    }

    /// True when every bit of `self` is present in `allowed`.
    pub const fn subset_of(self, allowed: AddrMode) -> bool {
        self.0 & allowed.0 == self.0
    }

    /// True for the empty mode set.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// The TISC-64 opcode set.
///
/// A closed enum matched exhaustively by the execute step, so a newly added
/// opcode cannot compile without a handler. The discriminants are the wire
/// values; opcode 0 is reserved-illegal and has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x01,
    Mov = 0x02,
    Push = 0x03,
    Pop = 0x04,
    Add = 0x05,
    Sub = 0x06,
    Mul = 0x07,
    Div = 0x08,
    Jmp = 0x0F,
    Cmp = 0x10,
    Jeq = 0x11,
    Call = 200,
    Ret = 201,
    Ldr = 210,
    Str = 211,
    Rst = 254,
    Hlt = 255,
}

impl Opcode {
    /// Map a wire byte to an opcode, if the byte names one.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        match byte {
            0x01 => Some(Opcode::Nop),
            0x02 => Some(Opcode::Mov),
            0x03 => Some(Opcode::Push),
            0x04 => Some(Opcode::Pop),
            0x05 => Some(Opcode::Add),
            0x06 => Some(Opcode::Sub),
            0x07 => Some(Opcode::Mul),
            0x08 => Some(Opcode::Div),
            0x0F => Some(Opcode::Jmp),
            0x10 => Some(Opcode::Cmp),
            0x11 => Some(Opcode::Jeq),
            200 => Some(Opcode::Call),
            201 => Some(Opcode::Ret),
            210 => Some(Opcode::Ldr),
            211 => Some(Opcode::Str),
            254 => Some(Opcode::Rst),
            255 => Some(Opcode::Hlt),
            _ => None,
        }
    }

    /// The wire value.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Mov => "MOV",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Jmp => "JMP",
            Opcode::Cmp => "CMP",
            Opcode::Jeq => "JEQ",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Ldr => "LDR",
            Opcode::Str => "STR",
            Opcode::Rst => "RST",
            Opcode::Hlt => "HLT",
        }
    }

    /// Reverse of [`Opcode::mnemonic`], case-sensitive on upper case.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        OPCODE_TABLE
            .iter()
            .map(|spec| spec.opcode)
            .find(|op| op.mnemonic() == mnemonic)
    }

    /// Legality row for this opcode.
    pub fn spec(self) -> &'static OpcodeSpec {
        // The table carries one row per variant, so the lookup cannot miss.
        match lookup(self.as_u8()) {
            Some(spec) => spec,
            None => unreachable!("opcode table row missing for {:?}", self),
        }
    }
}

/// Per-opcode legality: which addressing modes each operand slot accepts,
/// and whether the slot is semantically required.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeSpec {
    pub opcode: Opcode,
    pub src_modes: AddrMode,
    pub dest_modes: AddrMode,
    pub src_required: bool,
    pub dest_required: bool,
}

const fn row(
    opcode: Opcode,
    src_modes: AddrMode,
    dest_modes: AddrMode,
    src_required: bool,
    dest_required: bool,
) -> OpcodeSpec {
    OpcodeSpec {
        opcode,
        src_modes,
        dest_modes,
        src_required,
        dest_required,
    }
}

/// Value-or-register: the mode set for ordinary source operands.
const VAL: AddrMode = AddrMode::IMMEDIATE.union(AddrMode::REGISTER);

/// The opcode table. One row per opcode; consulted by [`validate`] before
/// every dispatch.
pub const OPCODE_TABLE: [OpcodeSpec; 17] = [
    row(Opcode::Nop, AddrMode::NONE, AddrMode::NONE, false, false),
    row(Opcode::Mov, VAL, AddrMode::REGISTER, true, true),
    row(Opcode::Push, VAL, AddrMode::NONE, true, false),
    row(Opcode::Pop, AddrMode::NONE, AddrMode::REGISTER, false, true),
    row(Opcode::Add, VAL, AddrMode::REGISTER, true, true),
    row(Opcode::Sub, VAL, AddrMode::REGISTER, true, true),
    row(Opcode::Mul, VAL, AddrMode::REGISTER, true, true),
    row(Opcode::Div, VAL, AddrMode::REGISTER, true, true),
    row(Opcode::Jmp, AddrMode::NONE, AddrMode::IMMEDIATE, false, true),
    row(Opcode::Cmp, VAL, VAL, true, true),
    row(Opcode::Jeq, AddrMode::NONE, AddrMode::IMMEDIATE, false, true),
    row(Opcode::Call, AddrMode::NONE, AddrMode::IMMEDIATE, false, true),
    row(Opcode::Ret, AddrMode::NONE, AddrMode::NONE, false, false),
    row(Opcode::Ldr, AddrMode::DIRECT, AddrMode::REGISTER, true, true),
    row(Opcode::Str, AddrMode::REGISTER, AddrMode::DIRECT, true, true),
    row(Opcode::Rst, AddrMode::NONE, AddrMode::NONE, false, false),
    row(Opcode::Hlt, AddrMode::NONE, AddrMode::NONE, false, false),
];

/// Find the table row for a raw opcode byte.
pub fn lookup(opcode: u8) -> Option<&'static OpcodeSpec> {
    OPCODE_TABLE
        .iter()
        .find(|spec| spec.opcode.as_u8() == opcode)
}

/// A decoded instruction.
///
/// Immutable once decoded; lives for one execution cycle. The fields are the
/// raw wire values, so an `Instruction` can represent an illegal encoding —
/// [`validate`] decides legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    pub src_mode: u8,
    pub dest_mode: u8,
    pub src_operand: u64,
    pub dest_operand: u64,
}

impl Instruction {
    /// Deserialize 19 raw bytes. Total: never fails.
    pub fn decode(bytes: &[u8; INSTRUCTION_WIDTH]) -> Instruction {
        let mut src = [0u8; 8];
        src.copy_from_slice(&bytes[3..11]);
        let mut dest = [0u8; 8];
        dest.copy_from_slice(&bytes[11..19]);

        Instruction {
            opcode: bytes[0],
            src_mode: bytes[1],
            dest_mode: bytes[2],
            src_operand: u64::from_le_bytes(src),
            dest_operand: u64::from_le_bytes(dest),
        }
    }

    /// Serialize back to the 19-byte wire form.
    pub fn encode(&self) -> [u8; INSTRUCTION_WIDTH] {
        let mut bytes = [0u8; INSTRUCTION_WIDTH];
        bytes[0] = self.opcode;
        bytes[1] = self.src_mode;
        bytes[2] = self.dest_mode;
        bytes[3..11].copy_from_slice(&self.src_operand.to_le_bytes());
        bytes[11..19].copy_from_slice(&self.dest_operand.to_le_bytes());
        bytes
    }
}

/// Check a decoded instruction against the opcode table.
///
/// Runs on every decoded instruction before dispatch. A failure is fatal for
/// the whole machine: the emulated program is malformed.
pub fn validate(instr: &Instruction) -> Result<(), InvalidInstruction> {
    if instr.opcode == 0 {
        return Err(InvalidInstruction::ReservedOpcode);
    }

    let spec = lookup(instr.opcode).ok_or(InvalidInstruction::UnknownOpcode {
        opcode: instr.opcode,
    })?;

    let src_mode = AddrMode::from_bits(instr.src_mode);
    if !src_mode.subset_of(spec.src_modes) {
        return Err(InvalidInstruction::IllegalSourceMode {
            opcode: instr.opcode,
            mode: instr.src_mode,
        });
    }

    let dest_mode = AddrMode::from_bits(instr.dest_mode);
    if !dest_mode.subset_of(spec.dest_modes) {
        return Err(InvalidInstruction::IllegalDestMode {
            opcode: instr.opcode,
            mode: instr.dest_mode,
        });
    }

    // An operand is structurally absent when its mode field is empty.
    if spec.src_required && src_mode.is_none() {
        return Err(InvalidInstruction::MissingSourceOperand {
            opcode: instr.opcode,
        });
    }
    if spec.dest_required && dest_mode.is_none() {
        return Err(InvalidInstruction::MissingDestOperand {
            opcode: instr.opcode,
        });
    }

    Ok(())
}

/// Ways an instruction can fail semantic validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInstruction {
    #[error("opcode 0 is reserved")]
    ReservedOpcode,

    #[error("unknown opcode {opcode:#04x}")]
    UnknownOpcode { opcode: u8 },

    #[error("illegal source addressing mode {mode:#04x} for opcode {opcode:#04x}")]
    IllegalSourceMode { opcode: u8, mode: u8 },

    #[error("illegal destination addressing mode {mode:#04x} for opcode {opcode:#04x}")]
    IllegalDestMode { opcode: u8, mode: u8 },

    #[error("source operand required but missing for opcode {opcode:#04x}")]
    MissingSourceOperand { opcode: u8 },

    #[error("destination operand required but missing for opcode {opcode:#04x}")]
    MissingDestOperand { opcode: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_field_layout() {
        let mut bytes = [0u8; INSTRUCTION_WIDTH];
        bytes[0] = Opcode::Mov.as_u8();
        bytes[1] = AddrMode::IMMEDIATE.bits();
        bytes[2] = AddrMode::REGISTER.bits();
        bytes[3..11].copy_from_slice(&0xDEAD_BEEF_u64.to_le_bytes());
        bytes[11..19].copy_from_slice(&7u64.to_le_bytes());

        let instr = Instruction::decode(&bytes);

        assert_eq!(instr.opcode, 0x02);
        assert_eq!(instr.src_mode, 1);
        assert_eq!(instr.dest_mode, 2);
        assert_eq!(instr.src_operand, 0xDEAD_BEEF);
        assert_eq!(instr.dest_operand, 7);
    }

    #[test]
    fn test_validate_accepts_legal_mov() {
        let instr = Instruction {
            opcode: Opcode::Mov.as_u8(),
            src_mode: AddrMode::IMMEDIATE.bits(),
            dest_mode: AddrMode::REGISTER.bits(),
            src_operand: 5,
            dest_operand: 1,
        };
        assert!(validate(&instr).is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved_opcode() {
        let instr = Instruction::decode(&[0u8; INSTRUCTION_WIDTH]);
        assert_eq!(validate(&instr), Err(InvalidInstruction::ReservedOpcode));
    }

    #[test]
    fn test_validate_rejects_unknown_opcode() {
        let instr = Instruction {
            opcode: 0x42,
            src_mode: 0,
            dest_mode: 0,
            src_operand: 0,
            dest_operand: 0,
        };
        assert_eq!(
            validate(&instr),
            Err(InvalidInstruction::UnknownOpcode { opcode: 0x42 })
        );
    }

    #[test]
    fn test_validate_rejects_immediate_dest_for_mov() {
        let instr = Instruction {
            opcode: Opcode::Mov.as_u8(),
            src_mode: AddrMode::IMMEDIATE.bits(),
            dest_mode: AddrMode::IMMEDIATE.bits(),
            src_operand: 5,
            dest_operand: 6,
        };
        assert_eq!(
            validate(&instr),
            Err(InvalidInstruction::IllegalDestMode {
                opcode: 0x02,
                mode: 1
            })
        );
    }

    #[test]
    fn test_validate_rejects_missing_required_operand() {
        // MOV with both operand slots marked NONE: mode subsets pass
        // (the empty set is a subset of everything), the requirement
        // check must catch it.
        let instr = Instruction {
            opcode: Opcode::Mov.as_u8(),
            src_mode: AddrMode::NONE.bits(),
            dest_mode: AddrMode::REGISTER.bits(),
            src_operand: 0,
            dest_operand: 1,
        };
        assert_eq!(
            validate(&instr),
            Err(InvalidInstruction::MissingSourceOperand { opcode: 0x02 })
        );
    }

    #[test]
    fn test_validate_rejects_indirect_everywhere() {
        for spec in &OPCODE_TABLE {
            let instr = Instruction {
                opcode: spec.opcode.as_u8(),
                src_mode: AddrMode::INDIRECT.bits(),
                dest_mode: 0,
                src_operand: 1,
                dest_operand: 0,
            };
            assert!(validate(&instr).is_err(), "{:?}", spec.opcode);
        }
    }

    #[test]
    fn test_opcode_byte_roundtrip() {
        for spec in &OPCODE_TABLE {
            assert_eq!(Opcode::from_u8(spec.opcode.as_u8()), Some(spec.opcode));
        }
        assert_eq!(Opcode::from_u8(0), None);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        for spec in &OPCODE_TABLE {
            let op = spec.opcode;
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    proptest! {
        #[test]
        fn prop_decode_encode_roundtrip(bytes in any::<[u8; INSTRUCTION_WIDTH]>()) {
            let instr = Instruction::decode(&bytes);
            prop_assert_eq!(instr.encode(), bytes);
        }

        #[test]
        fn prop_validate_matches_table(opcode_idx in 0usize..OPCODE_TABLE.len(),
                                       src_mode in any::<u8>(),
                                       dest_mode in any::<u8>()) {
            let spec = &OPCODE_TABLE[opcode_idx];
            let instr = Instruction {
                opcode: spec.opcode.as_u8(),
                src_mode,
                dest_mode,
                src_operand: 1,
                dest_operand: 1,
            };

            let src = AddrMode::from_bits(src_mode);
            let dest = AddrMode::from_bits(dest_mode);
            let legal = src.subset_of(spec.src_modes)
                && dest.subset_of(spec.dest_modes)
                && !(spec.src_required && src.is_none())
                && !(spec.dest_required && dest.is_none());

            prop_assert_eq!(validate(&instr).is_ok(), legal);
        }
    }
}
