//! Disassembler for TISC-64 programs.
//!
//! Converts decoded instructions back to the assembler's source syntax.

use crate::isa::{AddrMode, Instruction, Opcode};

/// Disassemble a single instruction to text.
pub fn disassemble_instruction(instr: &Instruction) -> String {
    let Some(opcode) = Opcode::from_u8(instr.opcode) else {
        return format!("??? ; opcode {:#04x}", instr.opcode);
    };

    let mut line = opcode.mnemonic().to_string();
    if let Some(src) = format_operand(instr.src_mode, instr.src_operand) {
        line.push(' ');
        line.push_str(&src);
    }
    if let Some(dest) = format_operand(instr.dest_mode, instr.dest_operand) {
        line.push(' ');
        line.push_str(&dest);
    }
    line
}

/// Disassemble a whole program, one instruction per line.
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut output = String::new();
    for (index, instr) in instructions.iter().enumerate() {
        output.push_str(&format!("{:04}: {}\n", index, disassemble_instruction(instr)));
    }
    output
}

fn format_operand(mode: u8, operand: u64) -> Option<String> {
    match AddrMode::from_bits(mode) {
        AddrMode::NONE => None,
        AddrMode::IMMEDIATE => Some(format!("{}", operand)),
        AddrMode::REGISTER => Some(format!("R{}", operand)),
        AddrMode::DIRECT => Some(format!("${:#x}", operand)),
        AddrMode::INDIRECT => Some(format!("*R{}", operand)),
        _ => Some(format!("?{:#04x}:{}", mode, operand)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assembler::assemble;

    #[test]
    fn test_disassemble_mov() {
        let instr = Instruction {
            opcode: Opcode::Mov.as_u8(),
            src_mode: AddrMode::IMMEDIATE.bits(),
            dest_mode: AddrMode::REGISTER.bits(),
            src_operand: 5,
            dest_operand: 1,
        };

        assert_eq!(disassemble_instruction(&instr), "MOV 5 R1");
    }

    #[test]
    fn test_disassemble_direct_operand() {
        let instr = Instruction {
            opcode: Opcode::Ldr.as_u8(),
            src_mode: AddrMode::DIRECT.bits(),
            dest_mode: AddrMode::REGISTER.bits(),
            src_operand: 0x2000,
            dest_operand: 2,
        };

        assert_eq!(disassemble_instruction(&instr), "LDR $0x2000 R2");
    }

    #[test]
    fn test_disassemble_unknown_opcode() {
        let instr = Instruction {
            opcode: 0x42,
            src_mode: 0,
            dest_mode: 0,
            src_operand: 0,
            dest_operand: 0,
        };

        assert!(disassemble_instruction(&instr).starts_with("???"));
    }

    #[test]
    fn test_assemble_disassemble_agree() {
        let program = assemble("MOV 5 R1\nPUSH R1\nHLT").unwrap();
        let text = disassemble(&program);

        assert!(text.contains("MOV 5 R1"));
        assert!(text.contains("PUSH R1"));
        assert!(text.contains("HLT"));
    }
}
