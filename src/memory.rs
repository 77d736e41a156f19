use parking_lot::Mutex;

/// Simulated main memory: `num_frames * page_size` bytes, addressed physically.
///
/// Frame contents are copied in and out whole; byte accessors serve
/// the emulator side once a virtual address has been translated.
pub struct PhysicalMemory {
    data: Mutex<Box<[u8]>>,
    page_size: usize,
    num_frames: usize,
}

impl PhysicalMemory {
    /// Create a new physical memory initialized to all zeros
    pub fn new(num_frames: usize, page_size: usize) -> Self {
        PhysicalMemory {
            data: Mutex::new(vec![0u8; num_frames * page_size].into_boxed_slice()),
            page_size,
            num_frames,
        }
    }

    pub fn size(&self) -> usize {
        self.num_frames * self.page_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Calculate the starting address of a frame
    #[inline]
    pub fn frame_to_address(&self, frame: usize) -> usize {
        frame * self.page_size
    }

    /// Read a byte from physical memory
    pub fn read_byte(&self, address: usize) -> u8 {
        self.data.lock()[address]
    }

    /// Write a byte to physical memory
    pub fn write_byte(&self, address: usize, value: u8) {
        self.data.lock()[address] = value;
    }

    /// Copy a whole frame out of memory.
    pub fn read_frame(&self, frame: usize) -> Vec<u8> {
        let start = self.frame_bounds(frame);
        self.data.lock()[start..start + self.page_size].to_vec()
    }

    /// Overwrite a whole frame. `bytes` must be exactly one page long.
    pub fn write_frame(&self, frame: usize, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            self.page_size,
            "frame write of {} bytes, page size is {}",
            bytes.len(),
            self.page_size
        );
        let start = self.frame_bounds(frame);
        self.data.lock()[start..start + self.page_size].copy_from_slice(bytes);
    }

    pub fn zero_frame(&self, frame: usize) {
        let start = self.frame_bounds(frame);
        self.data.lock()[start..start + self.page_size].fill(0);
    }

    fn frame_bounds(&self, frame: usize) -> usize {
        assert!(
            frame < self.num_frames,
            "frame {} out of range ({} frames)",
            frame,
            self.num_frames
        );
        self.frame_to_address(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    #[test]
    fn test_pm_initialization() {
        let pm = PhysicalMemory::new(NUM_PHYS_PAGES, PAGE_SIZE);
        assert_eq!(pm.size(), PM_SIZE);
        assert_eq!(pm.read_byte(0), 0);
        assert_eq!(pm.read_byte(PM_SIZE - 1), 0);
    }

    #[test]
    fn test_pm_read_write() {
        let pm = PhysicalMemory::new(4, PAGE_SIZE);
        pm.write_byte(100, 42);
        assert_eq!(pm.read_byte(100), 42);
        assert_eq!(pm.read_byte(101), 0);
    }

    #[test]
    fn test_frame_to_address() {
        let pm = PhysicalMemory::new(16, PAGE_SIZE);
        assert_eq!(pm.frame_to_address(0), 0);
        assert_eq!(pm.frame_to_address(1), 128);
        assert_eq!(pm.frame_to_address(4), 512);
        assert_eq!(pm.frame_to_address(10), 1280);
    }

    #[test]
    fn test_frame_copy_in_and_out() {
        let pm = PhysicalMemory::new(4, PAGE_SIZE);
        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| i as u8).collect();
        pm.write_frame(2, &page);

        assert_eq!(pm.read_frame(2), page);
        assert_eq!(pm.read_byte(2 * PAGE_SIZE + 5), 5);
        // neighbours untouched
        assert!(pm.read_frame(1).iter().all(|&b| b == 0));
        assert!(pm.read_frame(3).iter().all(|&b| b == 0));

        pm.zero_frame(2);
        assert!(pm.read_frame(2).iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_frame_out_of_range() {
        let pm = PhysicalMemory::new(2, PAGE_SIZE);
        pm.zero_frame(2);
    }

    #[test]
    #[should_panic(expected = "page size")]
    fn test_short_frame_write() {
        let pm = PhysicalMemory::new(2, PAGE_SIZE);
        pm.write_frame(0, &[1, 2, 3]);
    }
}
