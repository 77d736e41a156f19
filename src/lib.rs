pub mod address_space;
pub mod config;
pub mod constants;
pub mod error;
pub mod eviction;
pub mod frame_table;
pub mod image;
pub mod io;
pub mod machine;
pub mod memory;
pub mod process;
pub mod registers;
pub mod stats;
pub mod swap;
pub mod translation;

// Re-export commonly used items for convenience
pub use address_space::AddressSpace;
pub use config::{EvictionKind, PagerConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use image::{ExecutableImage, FileImage, MemoryImage, NoffHeader, Segment};
pub use machine::Machine;
pub use process::{PageKey, ProcessId, ProcessTable};
pub use translation::{TranslationResult, TranslationUnit, VirtualAddress};
