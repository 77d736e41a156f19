//! Executable images in NOFF format: a 40-byte header of little-endian words
//! followed by the segment bytes it points at.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

use crate::constants::*;
use crate::error::{Error, Result};

/// Random-access byte source backing an address space.
pub trait ExecutableImage: Send + Sync {
    /// Fill `buf` from `offset`; a short read is an error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An image held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage(Vec<u8>);

impl MemoryImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        MemoryImage(bytes)
    }
}

impl From<Vec<u8>> for MemoryImage {
    fn from(bytes: Vec<u8>) -> Self {
        MemoryImage(bytes)
    }
}

impl ExecutableImage for MemoryImage {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| short_read(offset, buf.len()))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.0.len())
            .ok_or_else(|| short_read(offset, buf.len()))?;
        buf.copy_from_slice(&self.0[start..end]);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.0.len() as u64
    }
}

/// An image read from a file on the host.
pub struct FileImage {
    file: Mutex<File>,
    len: u64,
}

impl FileImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(FileImage {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ExecutableImage for FileImage {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

fn short_read(offset: u64, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {} bytes at offset {:#x} runs past the image", len, offset),
    )
}

/// One segment descriptor of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub size: u32,
    pub virtual_addr: u32,
    pub in_file_addr: u32,
}

impl Segment {
    pub fn new(size: u32, virtual_addr: u32, in_file_addr: u32) -> Self {
        Segment {
            size,
            virtual_addr,
            in_file_addr,
        }
    }

    /// True if `addr` lies in `[virtual_addr, virtual_addr + size)`.
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.virtual_addr as usize;
        addr >= start && addr < start + self.size as usize
    }

    fn swap_bytes(self) -> Self {
        Segment {
            size: self.size.swap_bytes(),
            virtual_addr: self.virtual_addr.swap_bytes(),
            in_file_addr: self.in_file_addr.swap_bytes(),
        }
    }
}

/// The NOFF header: magic plus code, initialized data and uninitialized data
/// segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    pub magic: u32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    pub fn new(code: Segment, init_data: Segment, uninit_data: Segment) -> Self {
        NoffHeader {
            magic: NOFF_MAGIC,
            code,
            init_data,
            uninit_data,
        }
    }

    /// Read and validate the header at the start of `image`.
    ///
    /// Words are little-endian. An image written in the other byte order is
    /// recognised by its swapped magic and every field is swapped back.
    pub fn read_from(image: &dyn ExecutableImage) -> Result<Self> {
        let len = image.len();
        if len < NOFF_HEADER_SIZE as u64 {
            return Err(Error::TruncatedImage { len });
        }
        let mut raw = [0u8; NOFF_HEADER_SIZE];
        image.read_at(&mut raw, 0)?;
        let header = Self::decode(&raw)?;
        header.check_bounds(len)?;
        Ok(header)
    }

    pub fn decode(raw: &[u8; NOFF_HEADER_SIZE]) -> Result<Self> {
        let mut words = [0u32; NOFF_HEADER_WORDS];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let header = NoffHeader {
            magic: words[0],
            code: Segment::new(words[1], words[2], words[3]),
            init_data: Segment::new(words[4], words[5], words[6]),
            uninit_data: Segment::new(words[7], words[8], words[9]),
        };

        if header.magic == NOFF_MAGIC {
            Ok(header)
        } else if header.magic.swap_bytes() == NOFF_MAGIC {
            Ok(header.swap_bytes())
        } else {
            Err(Error::MalformedImage { magic: header.magic })
        }
    }

    pub fn encode(&self) -> [u8; NOFF_HEADER_SIZE] {
        let words = [
            self.magic,
            self.code.size,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.init_data.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.uninit_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
        ];
        let mut raw = [0u8; NOFF_HEADER_SIZE];
        for (chunk, word) in raw.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        raw
    }

    /// Bytes of address space the segments need, stack excluded.
    pub fn segments_size(&self) -> usize {
        self.code.size as usize + self.init_data.size as usize + self.uninit_data.size as usize
    }

    fn swap_bytes(self) -> Self {
        NoffHeader {
            magic: self.magic.swap_bytes(),
            code: self.code.swap_bytes(),
            init_data: self.init_data.swap_bytes(),
            uninit_data: self.uninit_data.swap_bytes(),
        }
    }

    fn check_bounds(&self, len: u64) -> Result<()> {
        for (segment, name) in [(self.code, "code"), (self.init_data, "initialized data")] {
            let start = segment.in_file_addr as u64;
            let end = start + segment.size as u64;
            if segment.size > 0 && end > len {
                return Err(Error::SegmentOutOfBounds {
                    segment: name,
                    start,
                    end,
                    len,
                });
            }
        }
        Ok(())
    }
}

/// Lay out a complete image: header, then code, then initialized data.
pub fn build_image(code: &[u8], code_vaddr: u32, init_data: &[u8], uninit_size: u32) -> Vec<u8> {
    let code_offset = NOFF_HEADER_SIZE as u32;
    let data_offset = code_offset + code.len() as u32;
    let data_vaddr = code_vaddr + code.len() as u32;
    let header = NoffHeader::new(
        Segment::new(code.len() as u32, code_vaddr, code_offset),
        Segment::new(init_data.len() as u32, data_vaddr, data_offset),
        Segment::new(uninit_size, data_vaddr + init_data.len() as u32, 0),
    );
    let mut image = header.encode().to_vec();
    image.extend_from_slice(code);
    image.extend_from_slice(init_data);
    image
}
