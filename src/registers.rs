use std::fmt;

use crate::constants::*;

/// The emulator's user-visible register file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile([i32; NUM_TOTAL_REGS]);

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile([0; NUM_TOTAL_REGS])
    }

    pub fn read(&self, reg: usize) -> i32 {
        self.0[reg]
    }

    pub fn write(&mut self, reg: usize, value: i32) {
        self.0[reg] = value;
    }

    pub fn pc(&self) -> i32 {
        self.0[PC_REG]
    }

    pub fn next_pc(&self) -> i32 {
        self.0[NEXT_PC_REG]
    }

    pub fn stack_pointer(&self) -> i32 {
        self.0[STACK_REG]
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pc={:#x} next_pc={:#x} sp={:#x}",
            self.pc(),
            self.next_pc(),
            self.stack_pointer()
        )
    }
}
