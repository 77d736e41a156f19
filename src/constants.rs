/// Bytes per page and per frame (one disk sector).
pub const PAGE_SIZE: usize = 128;
pub const NUM_PHYS_PAGES: usize = 32;
pub const PM_SIZE: usize = NUM_PHYS_PAGES * PAGE_SIZE;

/// Stack region appended after the uninitialized data segment.
pub const USER_STACK_SIZE: usize = 1024;
/// The initial stack pointer sits this far below the top of the address space.
pub const STACK_GUARD: usize = 16;

pub const NOFF_MAGIC: u32 = 0x00ba_dfad;
/// magic + 3 segments * (size, virtual_addr, in_file_addr), one 32-bit word each
pub const NOFF_HEADER_WORDS: usize = 10;
pub const NOFF_HEADER_SIZE: usize = NOFF_HEADER_WORDS * 4;

pub const NUM_TOTAL_REGS: usize = 40;
pub const STACK_REG: usize = 29;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;

/// Width of one instruction; NextPC starts one instruction past PC.
pub const INSTRUCTION_SIZE: u32 = 4;

pub const INVALID_FRAME: i32 = -1;
pub const INVALID_ADDRESS: i64 = -1;
