//! Two-pass assembler for TISC-64 programs.
//!
//! Syntax:
//! ```text
//! ; comment
//! .ORG 0x1000     ; offset added to $direct operands that follow
//! LOOP:           ; label (instruction index)
//!     MOV 5 R1    ; immediate 5 into register 1
//!     PUSH R1
//!     LDR $0x2000 R2
//!     STR R2 $0x2008
//!     CMP R1 R2
//!     JEQ LOOP
//!     HLT
//! .END
//! ```
//!
//! Operand forms: `Rn` register, `$addr` direct, `*Rn` indirect, decimal or
//! `0x` literal immediate, or a label name (assembles as an immediate
//! holding the label's instruction index). Instructions with a single
//! operand place it in the destination slot. A trailing HLT is appended to
//! every program.

use crate::cpu::NUM_REGISTERS;
use crate::isa::{self, AddrMode, Instruction, InvalidInstruction, Opcode};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source text into instructions.
pub fn assemble(source: &str) -> Result<Vec<Instruction>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// One parsed source statement, pending encoding.
struct Statement {
    line: usize,
    mnemonic: String,
    operands: Vec<String>,
    /// The `.ORG` offset in force when the statement was parsed.
    org: u64,
}

struct Assembler {
    /// Label -> instruction index.
    symbols: HashMap<String, u64>,
    statements: Vec<Statement>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            statements: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<Instruction>, AssemblerError> {
        // Pass 1: collect labels and statements.
        self.parse(source)?;

        // Pass 2: encode, with every label known.
        let mut output = Vec::with_capacity(self.statements.len() + 1);
        for i in 0..self.statements.len() {
            let instr = self.encode_statement(&self.statements[i])?;
            output.push(instr);
        }

        output.push(Instruction {
            opcode: Opcode::Hlt.as_u8(),
            src_mode: AddrMode::NONE.bits(),
            dest_mode: AddrMode::NONE.bits(),
            src_operand: 0,
            dest_operand: 0,
        });

        Ok(output)
    }

    fn parse(&mut self, source: &str) -> Result<(), AssemblerError> {
        let mut org: u64 = 0;

        for (idx, raw_line) in source.lines().enumerate() {
            let line_num = idx + 1;

            let line = match raw_line.find(';') {
                Some(i) => &raw_line[..i],
                None => raw_line,
            };
            let line = line.trim().to_uppercase();
            if line.is_empty() {
                continue;
            }

            if let Some(directive) = line.strip_prefix('.') {
                let mut parts = directive.split_whitespace();
                match parts.next() {
                    Some("ORG") => {
                        let arg = parts.next().ok_or_else(|| AssemblerError::SyntaxError {
                            line: line_num,
                            message: ".ORG requires an address".into(),
                        })?;
                        org = parse_number(arg).ok_or_else(|| AssemblerError::SyntaxError {
                            line: line_num,
                            message: format!("invalid .ORG address: {}", arg),
                        })?;
                    }
                    Some("END") => break,
                    _ => {
                        return Err(AssemblerError::SyntaxError {
                            line: line_num,
                            message: format!("unknown directive: {}", line),
                        })
                    }
                }
                continue;
            }

            if let Some(label) = line.strip_suffix(':') {
                let label = label.trim().to_string();
                if self.symbols.contains_key(&label) {
                    return Err(AssemblerError::DuplicateLabel {
                        line: line_num,
                        label,
                    });
                }
                self.symbols
                    .insert(label, self.statements.len() as u64);
                continue;
            }

            let mut parts = line.split_whitespace();
            let mnemonic = match parts.next() {
                Some(m) => m.to_string(),
                None => continue,
            };
            let operands: Vec<String> = parts
                .map(|op| op.trim_end_matches(',').to_string())
                .collect();

            self.statements.push(Statement {
                line: line_num,
                mnemonic,
                operands,
                org,
            });
        }

        Ok(())
    }

    fn encode_statement(&self, stmt: &Statement) -> Result<Instruction, AssemblerError> {
        let opcode =
            Opcode::from_mnemonic(&stmt.mnemonic).ok_or_else(|| AssemblerError::UnknownMnemonic {
                line: stmt.line,
                mnemonic: stmt.mnemonic.clone(),
            })?;

        let (src, dest) = match stmt.operands.len() {
            0 => ((AddrMode::NONE, 0), (AddrMode::NONE, 0)),
            // A single operand lands in whichever slot the opcode table
            // requires; for PUSH that is the source, everywhere else the
            // destination.
            1 => {
                let operand = self.parse_operand(&stmt.operands[0], stmt)?;
                let spec = opcode.spec();
                if spec.src_required && !spec.dest_required {
                    (operand, (AddrMode::NONE, 0))
                } else {
                    ((AddrMode::NONE, 0), operand)
                }
            }
            2 => (
                self.parse_operand(&stmt.operands[0], stmt)?,
                self.parse_operand(&stmt.operands[1], stmt)?,
            ),
            n => {
                return Err(AssemblerError::SyntaxError {
                    line: stmt.line,
                    message: format!("expected at most 2 operands, found {}", n),
                })
            }
        };

        let instr = Instruction {
            opcode: opcode.as_u8(),
            src_mode: src.0.bits(),
            dest_mode: dest.0.bits(),
            src_operand: src.1,
            dest_operand: dest.1,
        };

        // Reject operand combinations the opcode table forbids at assembly
        // time rather than at run time.
        isa::validate(&instr).map_err(|source| AssemblerError::IllegalOperands {
            line: stmt.line,
            source,
        })?;

        Ok(instr)
    }

    fn parse_operand(
        &self,
        token: &str,
        stmt: &Statement,
    ) -> Result<(AddrMode, u64), AssemblerError> {
        // Labels shadow every other operand form.
        if let Some(&index) = self.symbols.get(token) {
            return Ok((AddrMode::IMMEDIATE, index));
        }

        if let Some(reg) = token.strip_prefix('R') {
            let index = self.parse_register(reg, stmt)?;
            return Ok((AddrMode::REGISTER, index));
        }

        if let Some(addr) = token.strip_prefix('$') {
            let value = parse_number(addr).ok_or_else(|| AssemblerError::SyntaxError {
                line: stmt.line,
                message: format!("invalid address: {}", token),
            })?;
            return Ok((AddrMode::DIRECT, value.wrapping_add(stmt.org)));
        }

        if let Some(reg) = token.strip_prefix("*R") {
            let index = self.parse_register(reg, stmt)?;
            return Ok((AddrMode::INDIRECT, index));
        }

        if let Some(value) = parse_number(token) {
            return Ok((AddrMode::IMMEDIATE, value));
        }

        Err(AssemblerError::UndefinedLabel {
            line: stmt.line,
            name: token.to_string(),
        })
    }

    fn parse_register(&self, digits: &str, stmt: &Statement) -> Result<u64, AssemblerError> {
        let index: u64 = digits
            .parse()
            .map_err(|_| AssemblerError::SyntaxError {
                line: stmt.line,
                message: format!("invalid register: R{}", digits),
            })?;
        if index >= NUM_REGISTERS as u64 {
            return Err(AssemblerError::SyntaxError {
                line: stmt.line,
                message: format!("register R{} out of range", index),
            });
        }
        Ok(index)
    }
}

/// Parse a decimal or `0x` hexadecimal literal. The source is uppercased
/// before parsing, so the hex prefix arrives as `0X`.
fn parse_number(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0X") {
        return u64::from_str_radix(hex, 16).ok();
    }
    token.parse().ok()
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("undefined label on line {line}: {name}")]
    UndefinedLabel { line: usize, name: String },

    #[error("illegal operands on line {line}: {source}")]
    IllegalOperands {
        line: usize,
        #[source]
        source: InvalidInstruction,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; move and add
            MOV 5 R1
            MOV 3 R2
            ADD R2 R1
            HLT
        "#;

        let program = assemble(source).unwrap();

        // Four instructions plus the trailing HLT.
        assert_eq!(program.len(), 5);
        assert_eq!(program[0].opcode, Opcode::Mov.as_u8());
        assert_eq!(program[0].src_mode, AddrMode::IMMEDIATE.bits());
        assert_eq!(program[0].src_operand, 5);
        assert_eq!(program[0].dest_mode, AddrMode::REGISTER.bits());
        assert_eq!(program[0].dest_operand, 1);
    }

    #[test]
    fn test_assemble_forward_label() {
        let source = r#"
            JMP DONE
            NOP
        DONE:
            HLT
        "#;

        let program = assemble(source).unwrap();

        assert_eq!(program[0].opcode, Opcode::Jmp.as_u8());
        assert_eq!(program[0].dest_mode, AddrMode::IMMEDIATE.bits());
        assert_eq!(program[0].dest_operand, 2);
    }

    #[test]
    fn test_org_offsets_direct_operands() {
        let source = r#"
            .ORG 0x1000
            LDR $0x20 R1
            HLT
        "#;

        let program = assemble(source).unwrap();

        assert_eq!(program[0].src_mode, AddrMode::DIRECT.bits());
        assert_eq!(program[0].src_operand, 0x1020);
    }

    #[test]
    fn test_org_leaves_immediates_alone() {
        let source = r#"
            .ORG 0x1000
            MOV 0x20 R1
            HLT
        "#;

        let program = assemble(source).unwrap();

        assert_eq!(program[0].src_operand, 0x20);
    }

    #[test]
    fn test_end_directive_stops_assembly() {
        let source = r#"
            NOP
            .END
            MOV 5 R1
        "#;

        let program = assemble(source).unwrap();

        assert_eq!(program.len(), 2); // NOP + trailing HLT
    }

    #[test]
    fn test_single_operand_slot_follows_table() {
        let program = assemble("PUSH R3\nPOP R4").unwrap();

        // PUSH reads its source slot; POP writes its destination slot.
        assert_eq!(program[0].src_mode, AddrMode::REGISTER.bits());
        assert_eq!(program[0].src_operand, 3);
        assert_eq!(program[0].dest_mode, AddrMode::NONE.bits());
        assert_eq!(program[1].dest_mode, AddrMode::REGISTER.bits());
        assert_eq!(program[1].dest_operand, 4);
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert_eq!(
            assemble("FROB R1"),
            Err(AssemblerError::UnknownMnemonic {
                line: 1,
                mnemonic: "FROB".into()
            })
        );
    }

    #[test]
    fn test_duplicate_label() {
        let source = "A:\nNOP\nA:\nHLT";
        assert!(matches!(
            assemble(source),
            Err(AssemblerError::DuplicateLabel { line: 3, .. })
        ));
    }

    #[test]
    fn test_undefined_label() {
        assert!(matches!(
            assemble("JMP NOWHERE"),
            Err(AssemblerError::UndefinedLabel { line: 1, .. })
        ));
    }

    #[test]
    fn test_illegal_operand_combination() {
        // MOV cannot take a direct-address source; only LDR touches memory.
        assert!(matches!(
            assemble("MOV $5 R1"),
            Err(AssemblerError::IllegalOperands { line: 1, .. })
        ));
    }
}
