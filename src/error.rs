use crate::process::{PageKey, ProcessId};

/// Result alias for pager operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced while loading images and servicing faults.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The header magic matched neither byte order.
    #[error("malformed executable image: bad magic {magic:#010x}")]
    MalformedImage { magic: u32 },
    #[error("executable image too short for a NOFF header ({len} bytes)")]
    TruncatedImage { len: u64 },
    #[error("{segment} segment [{start:#x}, {end:#x}) lies outside the {len}-byte image")]
    SegmentOutOfBounds {
        segment: &'static str,
        start: u64,
        end: u64,
        len: u64,
    },
    #[error("address space of {size} bytes exceeds the 32-bit signed register range")]
    AddressSpaceTooLarge { size: usize },
    #[error("{segment} segment ends at {end:#x}, past the {size}-byte address space")]
    SegmentOutsideAddressSpace {
        segment: &'static str,
        end: usize,
        size: usize,
    },
    #[error("virtual address {vaddr:#x} outside the {num_pages}-page address space")]
    AddressOutOfRange { vaddr: u32, num_pages: usize },
    #[error("write to read-only page at {vaddr:#x}")]
    ReadOnlyViolation { vaddr: u32 },
    /// Every frame is in use; recovered locally by evicting.
    #[error("no free physical frame")]
    NoFreeFrame,
    #[error("no swap slot for {0}")]
    NoSuchSlot(PageKey),
    #[error("unknown process {0}")]
    UnknownProcess(ProcessId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid access trace: {0}")]
    InvalidTrace(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
