//! CPU execution engine for the TISC-64.
//!
//! Implements the per-cycle state machine: interrupt check, fetch, decode,
//! validate, PC advance, dispatch, execute. Every fault is fatal — there is
//! no instruction-level recovery, mirroring a real CPU's double-fault
//! behaviour in the absence of exception vectors.

use crate::bus::{Bus, BusError};
use crate::cpu::registers::NUM_REGISTERS;
use crate::cpu::Registers;
use crate::isa::{self, AddrMode, Instruction, InvalidInstruction, Opcode, INSTRUCTION_WIDTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// Executing normally.
    Running,
    /// Executed HLT: clean termination.
    Halted,
    /// Consumed a pending interrupt at the start of a cycle. No vector
    /// table exists, so the machine stops; the code is kept for the driver.
    Interrupted(u8),
}

/// The TISC-64 CPU.
///
/// Exclusively owns the register file and the bus it was constructed with,
/// plus a private code memory populated by the surrounding loader. Code
/// memory is addressed in whole instructions at byte offset `pc * 19` and
/// is distinct from the bus's address space.
pub struct Cpu {
    /// Register file.
    pub regs: Registers,
    /// The bus: RAM, ROM, devices, interrupt latch.
    pub bus: Bus,
    /// Current execution state.
    pub state: CpuState,
    /// Executed instruction count.
    pub cycles: u64,
    code: Vec<u8>,
    ir: [u8; INSTRUCTION_WIDTH],
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU over `bus`, with `sp` at the layout's stack base.
    pub fn new(bus: Bus) -> Self {
        let stack_base = bus.layout().stack_base;
        Self {
            regs: Registers::new(stack_base),
            bus,
            state: CpuState::Running,
            cycles: 0,
            code: Vec::new(),
            ir: [0; INSTRUCTION_WIDTH],
            last_instr: None,
        }
    }

    /// Populate code memory with a raw program image.
    pub fn load_program(&mut self, image: &[u8]) {
        self.code = image.to_vec();
    }

    /// Soft reset: registers, flags, stack pointer, program counter and the
    /// interrupt latch return to their initial values. Code memory and bus
    /// memory are untouched.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.bus.clear_interrupt();
        self.ir = [0; INSTRUCTION_WIDTH];
        self.state = CpuState::Running;
    }

    /// Execute one cycle.
    ///
    /// Returns the executed instruction, or `None` when a pending interrupt
    /// stopped the machine instead.
    pub fn step(&mut self) -> Result<Option<Instruction>, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Interrupts are observed once per cycle, before fetch.
        if let Some(code) = self.bus.take_interrupt() {
            self.state = CpuState::Interrupted(code);
            return Ok(None);
        }

        // Fetch
        let pc = self.regs.pc;
        let offset = (pc as usize)
            .checked_mul(INSTRUCTION_WIDTH)
            .filter(|off| {
                off.checked_add(INSTRUCTION_WIDTH)
                    .map_or(false, |end| end <= self.code.len())
            })
            .ok_or(CpuError::FetchOutOfRange { pc })?;
        self.ir
            .copy_from_slice(&self.code[offset..offset + INSTRUCTION_WIDTH]);

        // Decode
        let instr = Instruction::decode(&self.ir);

        // Validate against the opcode table before anything executes.
        isa::validate(&instr).map_err(|source| CpuError::InvalidInstruction { pc, source })?;
        let opcode = Opcode::from_u8(instr.opcode).ok_or(CpuError::InvalidInstruction {
            pc,
            source: InvalidInstruction::UnknownOpcode {
                opcode: instr.opcode,
            },
        })?;

        // PC advances before dispatch; control-flow handlers overwrite it.
        self.regs.pc += 1;

        self.execute(opcode, &instr)?;

        self.cycles += 1;
        self.last_instr = Some(instr);

        Ok(Some(instr))
    }

    /// Run until halt, interrupt or fault. Returns the number of
    /// instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    fn execute(&mut self, opcode: Opcode, instr: &Instruction) -> Result<(), CpuError> {
        match opcode {
            Opcode::Nop => {}

            Opcode::Mov => {
                let value = self.resolve_read(instr.src_mode, instr.src_operand)?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, value)?;
            }

            Opcode::Push => {
                let value = self.resolve_read(instr.src_mode, instr.src_operand)?;
                self.push_stack(value)?;
            }

            Opcode::Pop => {
                let value = self.pop_stack()?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, value)?;
            }

            Opcode::Add => {
                let src = self.resolve_read(instr.src_mode, instr.src_operand)?;
                let dest = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, dest.wrapping_add(src))?;
            }

            Opcode::Sub => {
                let src = self.resolve_read(instr.src_mode, instr.src_operand)?;
                let dest = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, dest.wrapping_sub(src))?;
            }

            Opcode::Mul => {
                let src = self.resolve_read(instr.src_mode, instr.src_operand)?;
                let dest = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, dest.wrapping_mul(src))?;
            }

            Opcode::Div => {
                let src = self.resolve_read(instr.src_mode, instr.src_operand)?;
                let dest = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                if src == 0 {
                    return Err(CpuError::DivisionByZero);
                }
                self.resolve_write(instr.dest_mode, instr.dest_operand, dest / src)?;
            }

            Opcode::Cmp => {
                let src = self.resolve_read(instr.src_mode, instr.src_operand)?;
                let dest = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                self.regs.flags.zero = src == dest;
            }

            Opcode::Jmp => {
                self.regs.pc = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
            }

            Opcode::Jeq => {
                // The zero flag is left untouched either way.
                if self.regs.flags.zero {
                    self.regs.pc = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
                }
            }

            Opcode::Call => {
                self.regs.ra = self.regs.pc;
                let ra = self.regs.ra;
                self.push_stack(ra)?;
                self.regs.pc = self.resolve_read(instr.dest_mode, instr.dest_operand)?;
            }

            Opcode::Ret => {
                let ra = self.pop_stack()?;
                self.regs.pc = ra;
                self.regs.ra = 0;
            }

            Opcode::Ldr => {
                let value = self.bus.read(instr.src_operand)?;
                self.resolve_write(instr.dest_mode, instr.dest_operand, value)?;
            }

            Opcode::Str => {
                let value = self.resolve_read(instr.src_mode, instr.src_operand)?;
                self.bus.write(instr.dest_operand, value)?;
            }

            Opcode::Rst => {
                self.reset();
            }

            Opcode::Hlt => {
                self.state = CpuState::Halted;
            }
        }

        Ok(())
    }

    /// Turn an (addressing mode, operand) pair into a value.
    ///
    /// DIRECT and INDIRECT are not value modes; instructions that touch
    /// memory route through the bus explicitly (LDR/STR).
    fn resolve_read(&self, mode: u8, operand: u64) -> Result<u64, CpuError> {
        match AddrMode::from_bits(mode) {
            AddrMode::IMMEDIATE => Ok(operand),
            AddrMode::REGISTER => Ok(self.regs.read(register_index(operand)?)),
            _ => Err(CpuError::IllegalAddressingMode { mode }),
        }
    }

    /// Store a value at the location an (addressing mode, operand) pair
    /// designates. IMMEDIATE is never a legal write target.
    fn resolve_write(&mut self, mode: u8, operand: u64, value: u64) -> Result<(), CpuError> {
        match AddrMode::from_bits(mode) {
            AddrMode::REGISTER => {
                self.regs.write(register_index(operand)?, value);
                Ok(())
            }
            _ => Err(CpuError::IllegalAddressingMode { mode }),
        }
    }

    fn push_stack(&mut self, value: u64) -> Result<(), CpuError> {
        self.bus.write(self.regs.sp, value)?;
        self.regs.sp = self.regs.sp.wrapping_sub(8);
        Ok(())
    }

    fn pop_stack(&mut self) -> Result<u64, CpuError> {
        self.regs.sp = self.regs.sp.wrapping_add(8);
        Ok(self.bus.read(self.regs.sp)?)
    }

    /// The most recently executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

fn register_index(operand: u64) -> Result<usize, CpuError> {
    if operand < NUM_REGISTERS as u64 {
        Ok(operand as usize)
    } else {
        Err(CpuError::InvalidRegister { index: operand })
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Fatal execution faults. Any of these stops the emulated machine for
/// good; the driver sees either a clean stop via [`CpuState`] or one of
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("instruction fetch at pc {pc} is outside code memory")]
    FetchOutOfRange { pc: u64 },

    #[error("invalid instruction at pc {pc}: {source}")]
    InvalidInstruction {
        pc: u64,
        #[source]
        source: InvalidInstruction,
    },

    #[error("bus fault: {0}")]
    Bus(#[from] BusError),

    #[error("illegal addressing mode {mode:#04x} for operand resolution")]
    IllegalAddressingMode { mode: u8 },

    #[error("register index {index} out of range")]
    InvalidRegister { index: u64 },

    #[error("division by zero")]
    DivisionByZero,
}
