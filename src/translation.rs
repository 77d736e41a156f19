use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::address_space::AddressSpace;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::process::{PageKey, ProcessId};

/// Represents the decomposed components of a Virtual Address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub va: u32,
    pub vpn: usize,
    pub offset: usize,
}

impl VirtualAddress {
    /// Split a raw address into page number and offset within the page
    pub fn from_raw(va: u32, page_size: usize) -> Self {
        let va_usize = va as usize;
        VirtualAddress {
            va,
            vpn: va_usize / page_size,
            offset: va_usize % page_size,
        }
    }

    /// First byte of the page containing this address
    #[inline]
    pub fn page_start(&self, page_size: usize) -> usize {
        self.vpn * page_size
    }
}

impl std::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VA({:#x}) = (vpn={}, offset={})", self.va, self.vpn, self.offset)
    }
}

/// One page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    /// Frame holding the page, or `INVALID_FRAME` while unmapped.
    pub physical_page: i32,
    pub valid: bool,
    /// Set by the translation unit on every access.
    pub used: bool,
    /// Set by the translation unit on every write.
    pub dirty: bool,
    pub read_only: bool,
}

impl TranslationEntry {
    pub fn unmapped(virtual_page: usize, read_only: bool) -> Self {
        TranslationEntry {
            virtual_page,
            physical_page: INVALID_FRAME,
            valid: false,
            used: false,
            dirty: false,
            read_only,
        }
    }

    /// The frame index, when the entry is valid.
    pub fn frame(&self) -> Option<usize> {
        if self.valid && self.physical_page >= 0 {
            Some(self.physical_page as usize)
        } else {
            None
        }
    }

    pub(crate) fn map(&mut self, frame: usize) {
        self.physical_page = frame as i32;
        self.valid = true;
        self.used = false;
        self.dirty = false;
    }

    pub(crate) fn unmap(&mut self) {
        self.physical_page = INVALID_FRAME;
        self.valid = false;
    }
}

/// Flat, single-level page table shared between its address space, the
/// translation unit it is installed in, and the frame table during eviction.
#[derive(Debug, Clone)]
pub struct PageTable {
    owner: ProcessId,
    entries: Arc<Mutex<Vec<TranslationEntry>>>,
}

impl PageTable {
    pub fn new(owner: ProcessId, entries: Vec<TranslationEntry>) -> Self {
        PageTable {
            owner,
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Process whose pages this table maps.
    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of one entry.
    pub fn entry(&self, vpn: usize) -> TranslationEntry {
        self.entries.lock()[vpn]
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<TranslationEntry>> {
        self.entries.lock()
    }
}

/// Result of an address translation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationResult {
    Success(usize),
    /// The page is not resident; the fault handler must run.
    PageFault,
    /// The address lies past the installed page table (or none is installed).
    AddressError,
    ReadOnlyViolation,
}

impl TranslationResult {
    /// Convert to the output format (-1 for errors, PA otherwise)
    pub fn to_output(&self) -> i64 {
        match self {
            TranslationResult::Success(pa) => *pa as i64,
            _ => INVALID_ADDRESS,
        }
    }
}

/// The emulator's MMU: whichever page table was installed last, and its length.
pub struct TranslationUnit {
    machine: Arc<Machine>,
    page_table: Option<PageTable>,
    page_table_size: usize,
}

impl TranslationUnit {
    pub fn new(machine: Arc<Machine>) -> Self {
        TranslationUnit {
            machine,
            page_table: None,
            page_table_size: 0,
        }
    }

    /// Point the unit at another page table (context switch).
    pub fn install(&mut self, page_table: PageTable, size: usize) {
        self.page_table = Some(page_table);
        self.page_table_size = size;
    }

    pub fn page_table(&self) -> Option<&PageTable> {
        self.page_table.as_ref()
    }

    pub fn page_table_size(&self) -> usize {
        self.page_table_size
    }

    /// Translate without servicing faults. Sets `used`, and `dirty` on writes.
    pub fn translate(&self, vaddr: u32, writing: bool) -> TranslationResult {
        match self.walk(vaddr, writing, |paddr| paddr) {
            Ok(paddr) => TranslationResult::Success(paddr),
            Err(fault) => fault,
        }
    }

    /// Translate, running the fault handler of `space` until the page is resident.
    pub fn translate_with_demand_paging(
        &self,
        space: &AddressSpace,
        vaddr: u32,
        writing: bool,
    ) -> Result<usize> {
        self.access(space, vaddr, writing, |paddr| paddr)
    }

    pub fn read_byte(&self, space: &AddressSpace, vaddr: u32) -> Result<u8> {
        let memory = self.machine.memory();
        self.access(space, vaddr, false, |paddr| memory.read_byte(paddr))
    }

    pub fn write_byte(&self, space: &AddressSpace, vaddr: u32, value: u8) -> Result<()> {
        let memory = self.machine.memory();
        self.access(space, vaddr, true, |paddr| memory.write_byte(paddr, value))
    }

    fn access<R>(
        &self,
        space: &AddressSpace,
        vaddr: u32,
        writing: bool,
        mut op: impl FnMut(usize) -> R,
    ) -> Result<R> {
        loop {
            match self.walk(vaddr, writing, &mut op) {
                Ok(value) => return Ok(value),
                Err(TranslationResult::PageFault) => space.handle_fault(vaddr)?,
                Err(TranslationResult::ReadOnlyViolation) => {
                    return Err(Error::ReadOnlyViolation { vaddr });
                }
                Err(_) => {
                    return Err(Error::AddressOutOfRange {
                        vaddr,
                        num_pages: self.page_table_size,
                    });
                }
            }
        }
    }

    /// `op` runs on the physical address while the page table is locked, so an
    /// eviction cannot unmap the frame between translation and access.
    fn walk<R>(
        &self,
        vaddr: u32,
        writing: bool,
        op: impl FnOnce(usize) -> R,
    ) -> core::result::Result<R, TranslationResult> {
        let page_table = self.page_table.as_ref().ok_or(TranslationResult::AddressError)?;
        let page_size = self.machine.config().page_size;
        let va = VirtualAddress::from_raw(vaddr, page_size);
        if va.vpn >= self.page_table_size {
            return Err(TranslationResult::AddressError);
        }

        let (frame, value) = {
            let mut entries = page_table.lock();
            let entry = &mut entries[va.vpn];
            let frame = entry.frame().ok_or(TranslationResult::PageFault)?;
            if writing && entry.read_only {
                return Err(TranslationResult::ReadOnlyViolation);
            }
            entry.used = true;
            if writing {
                entry.dirty = true;
            }
            (frame, op(frame * page_size + va.offset))
        };
        // The frame may have been evicted since the unlock; touch only
        // stamps it if it still backs this page.
        self.machine
            .frames()
            .touch(frame, PageKey::new(page_table.owner(), va.vpn));
        Ok(value)
    }
}
