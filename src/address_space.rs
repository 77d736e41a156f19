//! Per-process address space: page table, lazy loader, and the fault and
//! eviction entry points the frame table drives.

use std::cmp::min;
use std::sync::Arc;

use log::{debug, info, trace};
use parking_lot::Mutex;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::frame_table::FrameIndex;
use crate::image::{ExecutableImage, NoffHeader, Segment};
use crate::machine::Machine;
use crate::process::{PageKey, ProcessId};
use crate::registers::RegisterFile;
use crate::translation::{PageTable, TranslationEntry, TranslationUnit, VirtualAddress};

pub struct AddressSpace {
    pid: ProcessId,
    machine: Arc<Machine>,
    image: Box<dyn ExecutableImage>,
    header: NoffHeader,
    num_pages: usize,
    page_table: PageTable,
    /// Serializes this space's own faults.
    fault_lock: Mutex<()>,
}

impl AddressSpace {
    /// Parse the image header and build an all-invalid page table.
    ///
    /// Nothing past the header is read and no frame is taken until the first
    /// fault.
    pub fn create(machine: &Arc<Machine>, image: Box<dyn ExecutableImage>) -> Result<Arc<Self>> {
        let header = NoffHeader::read_from(image.as_ref())?;
        let config = machine.config();
        let page_size = config.page_size;
        let num_pages = (header.segments_size() + config.user_stack_size).div_ceil(page_size);
        check_layout(&header, num_pages * page_size)?;

        let pid = machine.processes().next_pid();
        let page_table = PageTable::new(
            pid,
            (0..num_pages)
                .map(|vpn| {
                    let read_only = config.read_only_code && page_within(&header.code, vpn, page_size);
                    TranslationEntry::unmapped(vpn, read_only)
                })
                .collect(),
        );

        let space = Arc::new(AddressSpace {
            pid,
            machine: Arc::clone(machine),
            image,
            header,
            num_pages,
            page_table,
            fault_lock: Mutex::new(()),
        });
        machine.processes().register(&space);
        info!(
            "{}: created, {} pages (code {} bytes, data {} bytes, bss {} bytes)",
            space.pid, num_pages, header.code.size, header.init_data.size, header.uninit_data.size
        );
        Ok(space)
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn header(&self) -> &NoffHeader {
        &self.header
    }

    pub fn entry(&self, vpn: usize) -> TranslationEntry {
        self.page_table.entry(vpn)
    }

    /// Number of pages currently backed by a frame.
    pub fn resident_pages(&self) -> usize {
        self.page_table.lock().iter().filter(|entry| entry.valid).count()
    }

    /// Initial register state for running this image.
    pub fn init_registers(&self) -> RegisterFile {
        let mut regs = RegisterFile::new();
        // create() keeps the whole space, and so every address in it, below i32::MAX
        let pc = self.header.code.virtual_addr as i32;
        regs.write(PC_REG, pc);
        regs.write(NEXT_PC_REG, pc.wrapping_add(INSTRUCTION_SIZE as i32));
        // leave a little room so the first push cannot run off the end;
        // the stack alone is at least STACK_GUARD bytes
        let sp = self.num_pages * self.machine.config().page_size - STACK_GUARD;
        regs.write(STACK_REG, sp as i32);
        debug!("{}: initial registers {}", self.pid, regs);
        regs
    }

    /// Nothing to save: the page table lives here, not in the MMU.
    pub fn save_state(&self) {}

    /// Make this space the one the translation unit walks.
    pub fn restore_state(&self, unit: &mut TranslationUnit) {
        unit.install(self.page_table.clone(), self.num_pages);
    }

    /// Make the page containing `vaddr` resident.
    pub fn handle_fault(&self, vaddr: u32) -> Result<()> {
        let page_size = self.machine.config().page_size;
        let va = VirtualAddress::from_raw(vaddr, page_size);
        if va.vpn >= self.num_pages {
            return Err(Error::AddressOutOfRange {
                vaddr,
                num_pages: self.num_pages,
            });
        }

        let _serial = self.fault_lock.lock();
        let counters = self.machine.counters();
        counters.record_fault();
        if self.page_table.entry(va.vpn).valid {
            counters.record_spurious_fault();
            debug!("{}: spurious fault at {}", self.pid, va);
            return Ok(());
        }
        debug!("{}: page fault at {}", self.pid, va);

        let key = PageKey::new(self.pid, va.vpn);
        let frames = self.machine.frames();
        let frame = match frames.allocate(key) {
            Ok(frame) => frame,
            Err(Error::NoFreeFrame) => frames.evict_and_allocate(key, self.machine.processes()),
            Err(err) => return Err(err),
        };

        if let Err(err) = self.load_page(va.vpn, frame) {
            frames.free(frame);
            return Err(err);
        }
        self.page_table.lock()[va.vpn].map(frame);
        frames.commit(frame);
        debug!("{}: vpn {} now in frame {}", self.pid, va.vpn, frame);
        Ok(())
    }

    /// Fill `frame` with the current contents of page `vpn`: its swap slot if
    /// it was ever evicted, else the image segments covering it, else zeros.
    pub fn load_page(&self, vpn: usize, frame: FrameIndex) -> Result<()> {
        let key = PageKey::new(self.pid, vpn);
        let memory = self.machine.memory();
        let counters = self.machine.counters();
        let swap = self.machine.swap();

        if swap.contains(key) {
            let bytes = match swap.page_in(key) {
                Ok(bytes) => bytes,
                Err(err) => panic!("swap slot vanished while loading: {}", err),
            };
            memory.write_frame(frame, &bytes);
            counters.record_page_in();
            trace!("{}: vpn {} restored from swap", self.pid, vpn);
            return Ok(());
        }

        let page_size = self.machine.config().page_size;
        let page_start = vpn * page_size;
        let code = self.header.code;
        let init_data = self.header.init_data;
        let mut buf = vec![0u8; page_size];

        if code.contains(page_start) {
            let code_offset = page_start - code.virtual_addr as usize;
            let code_size = min(code.size as usize - code_offset, page_size);
            self.read_image(&mut buf[..code_size], code.in_file_addr as u64 + code_offset as u64)?;
            // a short code page continues with the start of initialized data
            let data_size = min(page_size - code_size, init_data.size as usize);
            if data_size > 0 {
                self.read_image(&mut buf[code_size..code_size + data_size], init_data.in_file_addr as u64)?;
            }
            trace!(
                "{}: vpn {} loaded with {} code bytes, {} data bytes",
                self.pid, vpn, code_size, data_size
            );
            counters.record_image_load();
        } else if init_data.contains(page_start) {
            let init_offset = page_start - init_data.virtual_addr as usize;
            let data_size = min(init_data.size as usize - init_offset, page_size);
            self.read_image(
                &mut buf[..data_size],
                init_data.in_file_addr as u64 + init_offset as u64,
            )?;
            trace!("{}: vpn {} loaded with {} data bytes", self.pid, vpn, data_size);
            counters.record_image_load();
        } else {
            memory.zero_frame(frame);
            trace!("{}: vpn {} zero-filled", self.pid, vpn);
            counters.record_zero_fill();
            return Ok(());
        }

        memory.write_frame(frame, &buf);
        Ok(())
    }

    /// Copy the page held in `frame` out to swap. Runs after
    /// [`invalidate_for_eviction`](Self::invalidate_for_eviction), without the
    /// frame table lock.
    pub fn evict_page(&self, vpn: usize, frame: FrameIndex) {
        let key = PageKey::new(self.pid, vpn);
        let bytes = self.machine.memory().read_frame(frame);
        self.machine.swap().page_out(key, &bytes);
        self.machine.counters().record_page_out();
        trace!("{}: vpn {} paged out from frame {}", self.pid, vpn, frame);
    }

    /// Called by the frame table, under its lock, when `frame` is chosen as a
    /// victim.
    pub(crate) fn invalidate_for_eviction(&self, vpn: usize, frame: FrameIndex) {
        let key = PageKey::new(self.pid, vpn);
        self.machine.swap().begin_page_out(key);
        let mut entries = self.page_table.lock();
        let entry = &mut entries[vpn];
        assert_eq!(
            entry.frame(),
            Some(frame),
            "frame {} chosen for eviction does not back {}",
            frame,
            key
        );
        entry.unmap();
        drop(entries);
        self.machine.counters().record_eviction();
    }

    fn read_image(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.image.read_at(buf, offset)?;
        Ok(())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let mapped: Vec<(usize, FrameIndex)> = {
            let mut entries = self.page_table.lock();
            entries
                .iter_mut()
                .filter_map(|entry| {
                    let frame = entry.frame()?;
                    entry.unmap();
                    Some((entry.virtual_page, frame))
                })
                .collect()
        };
        self.machine.frames().release_process(self.pid, &mapped);
        self.machine.swap().discard_process(self.pid);
        self.machine.processes().unregister(self.pid);
        info!("{}: exited, released {} frames", self.pid, mapped.len());
    }
}

/// The space must be addressable through the 32-bit registers, and every
/// non-empty segment must fall inside it.
fn check_layout(header: &NoffHeader, size: usize) -> Result<()> {
    if size > i32::MAX as usize {
        return Err(Error::AddressSpaceTooLarge { size });
    }
    let segments = [
        (header.code, "code"),
        (header.init_data, "initialized data"),
        (header.uninit_data, "uninitialized data"),
    ];
    for (segment, name) in segments {
        let end = segment.virtual_addr as usize + segment.size as usize;
        if segment.size > 0 && end > size {
            return Err(Error::SegmentOutsideAddressSpace {
                segment: name,
                end,
                size,
            });
        }
    }
    Ok(())
}

/// True if page `vpn` lies entirely inside `segment`.
fn page_within(segment: &Segment, vpn: usize, page_size: usize) -> bool {
    let start = vpn * page_size;
    let seg_start = segment.virtual_addr as usize;
    start >= seg_start && start + page_size <= seg_start + segment.size as usize
}
