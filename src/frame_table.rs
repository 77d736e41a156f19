//! Registry of physical frames: which are free, who owns the rest, and which
//! page table entry each one backs.
//!
//! Eviction runs in two phases so the victim's swap write happens without the
//! table lock:
//!
//! 1. under the lock the victim frame moves to `Reserved` (invisible to both
//!    `allocate` and victim selection) and the victim's entry is invalidated;
//! 2. the victim address space copies the frame into swap, lock released;
//! 3. the requester loads its page and calls [`FrameTable::commit`], which
//!    finalizes owner and back-reference under the lock again.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::eviction::EvictionPolicy;
use crate::process::{PageKey, ProcessId, ProcessTable};

pub type FrameIndex = usize;

/// Free/used bitmap with lowest-index-first search.
#[derive(Debug, Clone)]
pub struct FrameBitmap {
    words: Vec<u64>,
    num_bits: usize,
}

impl FrameBitmap {
    pub fn new(num_bits: usize) -> Self {
        FrameBitmap {
            words: vec![0; num_bits.div_ceil(64)],
            num_bits,
        }
    }

    pub fn test(&self, bit: usize) -> bool {
        assert!(bit < self.num_bits, "bit {} out of range", bit);
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    pub fn mark(&mut self, bit: usize) {
        assert!(bit < self.num_bits, "bit {} out of range", bit);
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    pub fn clear(&mut self, bit: usize) {
        assert!(bit < self.num_bits, "bit {} out of range", bit);
        self.words[bit / 64] &= !(1 << (bit % 64));
    }

    /// Set and return the lowest clear bit.
    pub fn find(&mut self) -> Option<usize> {
        for (i, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = i * 64 + word.trailing_ones() as usize;
                if bit >= self.num_bits {
                    return None;
                }
                *word |= 1 << (bit % 64);
                return Some(bit);
            }
        }
        None
    }

    pub fn num_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.num_bits - set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Free,
    /// Handed to `owner`, contents or mapping not final yet.
    Reserved(PageKey),
    /// Backs the valid entry named by the key.
    Mapped(PageKey),
}

struct FrameMap {
    bitmap: FrameBitmap,
    states: Vec<FrameState>,
    policy: Box<dyn EvictionPolicy>,
}

impl FrameMap {
    fn reserve_free(&mut self, owner: PageKey) -> Option<FrameIndex> {
        let frame = self.bitmap.find()?;
        assert_eq!(
            self.states[frame],
            FrameState::Free,
            "bitmap handed out frame {} which is not free",
            frame
        );
        self.states[frame] = FrameState::Reserved(owner);
        Some(frame)
    }

    fn mapped_frames(&self) -> Vec<FrameIndex> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, state)| matches!(state, FrameState::Mapped(_)))
            .map(|(frame, _)| frame)
            .collect()
    }
}

/// The machine-wide frame table. Every operation holds one lock for its
/// whole duration.
pub struct FrameTable {
    inner: Mutex<FrameMap>,
    /// Signalled whenever a frame becomes free or leaves the reserved state.
    released: Condvar,
}

impl FrameTable {
    /// # Panics
    /// An empty pool is a configuration error.
    pub fn new(num_frames: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        assert!(num_frames > 0, "frame table needs at least one frame");
        FrameTable {
            inner: Mutex::new(FrameMap {
                bitmap: FrameBitmap::new(num_frames),
                states: vec![FrameState::Free; num_frames],
                policy,
            }),
            released: Condvar::new(),
        }
    }

    pub fn num_frames(&self) -> usize {
        self.inner.lock().states.len()
    }

    /// Reserve the lowest free frame for `owner`.
    ///
    /// The frame stays reserved until [`commit`](Self::commit) or
    /// [`free`](Self::free).
    pub fn allocate(&self, owner: PageKey) -> Result<FrameIndex> {
        let mut map = self.inner.lock();
        let frame = map.reserve_free(owner).ok_or(Error::NoFreeFrame)?;
        debug!("frame {} allocated to {}", frame, owner);
        Ok(frame)
    }

    /// Reclaim a mapped frame for `owner`, paging the victim out to swap.
    ///
    /// Returns a reserved frame like [`allocate`](Self::allocate). Takes a free
    /// frame instead if one appeared since the caller's `allocate` failed.
    pub fn evict_and_allocate(&self, owner: PageKey, processes: &dyn ProcessTable) -> FrameIndex {
        let (frame, victim, victim_space) = {
            let mut map = self.inner.lock();
            loop {
                if let Some(frame) = map.reserve_free(owner) {
                    debug!("frame {} freed up, allocated to {}", frame, owner);
                    return frame;
                }

                let mut candidates = map.mapped_frames();
                let mut chosen = None;
                while !candidates.is_empty() {
                    let frame = map.policy.select_victim(&candidates);
                    let victim = match map.states[frame] {
                        FrameState::Mapped(key) => key,
                        state => panic!("eviction selected frame {} in state {:?}", frame, state),
                    };
                    // An owner that is tearing down frees its frames itself.
                    match processes.lookup(victim.pid) {
                        Some(space) => {
                            chosen = Some((frame, victim, space));
                            break;
                        }
                        None => candidates.retain(|&f| f != frame),
                    }
                }

                match chosen {
                    Some((frame, victim, space)) => {
                        map.states[frame] = FrameState::Reserved(owner);
                        space.invalidate_for_eviction(victim.vpn, frame);
                        break (frame, victim, space);
                    }
                    None => {
                        warn!("{} waiting: every frame is reserved or being released", owner);
                        self.released.wait(&mut map);
                    }
                }
            }
        };

        debug!("evicting {} from frame {} for {}", victim, frame, owner);
        victim_space.evict_page(victim.vpn, frame);
        frame
    }

    /// Finalize a reserved frame: its page is loaded and its entry installed.
    pub fn commit(&self, frame: FrameIndex) {
        let mut map = self.inner.lock();
        let owner = match map.states[frame] {
            FrameState::Reserved(owner) => owner,
            state => panic!("commit of frame {} in state {:?}", frame, state),
        };
        map.states[frame] = FrameState::Mapped(owner);
        map.policy.admitted(frame);
        drop(map);
        self.released.notify_all();
    }

    /// Return a frame to the pool. The caller has already invalidated the
    /// entry that mapped it.
    ///
    /// # Panics
    /// Freeing a frame that is already free.
    pub fn free(&self, frame: FrameIndex) {
        let mut map = self.inner.lock();
        assert!(
            map.states[frame] != FrameState::Free && map.bitmap.test(frame),
            "double free of frame {}",
            frame
        );
        map.bitmap.clear(frame);
        map.states[frame] = FrameState::Free;
        drop(map);
        debug!("frame {} freed", frame);
        self.released.notify_all();
    }

    /// Free every frame `pid` still maps, all under one lock acquisition.
    ///
    /// # Panics
    /// If a frame's back-reference does not match the entry naming it.
    pub(crate) fn release_process(&self, pid: ProcessId, mapped: &[(usize, FrameIndex)]) {
        if mapped.is_empty() {
            return;
        }
        let mut map = self.inner.lock();
        for &(vpn, frame) in mapped {
            let expected = PageKey::new(pid, vpn);
            assert!(
                map.states[frame] == FrameState::Mapped(expected),
                "frame {} does not back {} (state {:?})",
                frame,
                expected,
                map.states[frame]
            );
            map.bitmap.clear(frame);
            map.states[frame] = FrameState::Free;
        }
        drop(map);
        debug!("released {} frames of {}", mapped.len(), pid);
        self.released.notify_all();
    }

    /// Record an access to `page` in `frame` for recency-based policies.
    /// Ignored unless `frame` still backs `page`.
    pub fn touch(&self, frame: FrameIndex, page: PageKey) {
        let mut map = self.inner.lock();
        if map.states[frame] == FrameState::Mapped(page) {
            map.policy.touched(frame);
        }
    }

    /// Used covers both mapped and reserved frames.
    pub fn is_frame_used(&self, frame: FrameIndex) -> bool {
        self.inner.lock().bitmap.test(frame)
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().bitmap.num_clear()
    }

    /// The page a used frame belongs to.
    pub fn owner(&self, frame: FrameIndex) -> Option<PageKey> {
        match self.inner.lock().states[frame] {
            FrameState::Free => None,
            FrameState::Reserved(key) | FrameState::Mapped(key) => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::AddressSpace;
    use crate::config::PagerConfig;
    use crate::eviction::{LruPolicy, RandomPolicy};
    use crate::image::{build_image, MemoryImage};
    use crate::machine::Machine;
    use crate::translation::TranslationUnit;
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct NoProcesses;

    impl ProcessTable for NoProcesses {
        fn lookup(&self, _pid: ProcessId) -> Option<Arc<AddressSpace>> {
            None
        }
    }

    fn key(pid: u32, vpn: usize) -> PageKey {
        PageKey::new(ProcessId(pid), vpn)
    }

    fn table(frames: usize) -> FrameTable {
        FrameTable::new(frames, Box::new(RandomPolicy::seeded(1)))
    }

    #[test]
    fn test_bitmap_find_lowest() {
        let mut bitmap = FrameBitmap::new(70);
        assert_eq!(bitmap.find(), Some(0));
        assert_eq!(bitmap.find(), Some(1));
        bitmap.clear(0);
        assert_eq!(bitmap.find(), Some(0));
        assert_eq!(bitmap.num_clear(), 68);
    }

    #[test]
    fn test_bitmap_crosses_word_boundary() {
        let mut bitmap = FrameBitmap::new(66);
        for expected in 0..66 {
            assert_eq!(bitmap.find(), Some(expected));
        }
        assert_eq!(bitmap.find(), None);
        assert_eq!(bitmap.num_clear(), 0);
        bitmap.clear(65);
        assert!(!bitmap.test(65));
        assert_eq!(bitmap.find(), Some(65));
    }

    #[test]
    fn test_allocate_lowest_index_first() {
        let frames = table(3);
        assert_eq!(frames.allocate(key(0, 0)).unwrap(), 0);
        assert_eq!(frames.allocate(key(0, 1)).unwrap(), 1);
        frames.free(0);
        assert_eq!(frames.allocate(key(1, 0)).unwrap(), 0);
        assert_eq!(frames.owner(0), Some(key(1, 0)));
    }

    #[test]
    fn test_allocate_exhausted() {
        let frames = table(2);
        frames.allocate(key(0, 0)).unwrap();
        frames.allocate(key(0, 1)).unwrap();
        assert!(matches!(frames.allocate(key(0, 2)), Err(Error::NoFreeFrame)));
        assert_eq!(frames.free_frame_count(), 0);
    }

    #[test]
    fn test_queries() {
        let frames = table(4);
        assert_eq!(frames.num_frames(), 4);
        assert_eq!(frames.free_frame_count(), 4);
        let frame = frames.allocate(key(2, 9)).unwrap();
        assert!(frames.is_frame_used(frame));
        assert!(!frames.is_frame_used(frame + 1));
        frames.commit(frame);
        assert_eq!(frames.owner(frame), Some(key(2, 9)));
        assert_eq!(frames.owner(frame + 1), None);
        assert_eq!(frames.free_frame_count(), 3);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let frames = table(2);
        let frame = frames.allocate(key(0, 0)).unwrap();
        frames.free(frame);
        frames.free(frame);
    }

    #[test]
    #[should_panic(expected = "commit of frame")]
    fn test_commit_free_frame_panics() {
        let frames = table(1);
        frames.commit(0);
    }

    #[test]
    #[should_panic(expected = "at least one frame")]
    fn test_empty_pool_panics() {
        table(0);
    }

    #[test]
    fn test_evict_takes_free_frame_when_available() {
        let frames = table(2);
        frames.allocate(key(0, 0)).unwrap();
        // no mapped frames and nobody to look up, but a free frame exists
        assert_eq!(frames.evict_and_allocate(key(1, 0), &NoProcesses), 1);
    }

    #[test]
    fn test_release_process() {
        let frames = FrameTable::new(4, Box::new(LruPolicy::new(4)));
        for vpn in 0..3 {
            let frame = frames.allocate(key(5, vpn)).unwrap();
            frames.commit(frame);
        }
        frames.release_process(ProcessId(5), &[(0, 0), (1, 1), (2, 2)]);
        assert_eq!(frames.free_frame_count(), 4);
    }

    #[test]
    #[should_panic(expected = "does not back")]
    fn test_release_process_checks_back_reference() {
        let frames = table(2);
        let frame = frames.allocate(key(5, 0)).unwrap();
        frames.commit(frame);
        frames.release_process(ProcessId(5), &[(1, frame)]);
    }

    /// Remembers which frames it was told about.
    struct Recording(Arc<Mutex<Vec<FrameIndex>>>);

    impl EvictionPolicy for Recording {
        fn select_victim(&mut self, candidates: &[FrameIndex]) -> FrameIndex {
            candidates[0]
        }

        fn touched(&mut self, frame: FrameIndex) {
            self.0.lock().push(frame);
        }
    }

    #[test]
    fn test_touch_ignores_stale_page() {
        let touched = Arc::new(Mutex::new(Vec::new()));
        let frames = FrameTable::new(2, Box::new(Recording(Arc::clone(&touched))));
        let frame = frames.allocate(key(1, 4)).unwrap();
        // reserved frames are not stamped
        frames.touch(frame, key(1, 4));
        frames.commit(frame);

        frames.touch(frame, key(1, 4));
        // the frame now backs someone else's page
        frames.touch(frame, key(2, 4));
        frames.touch(frame, key(1, 5));
        frames.touch(frame + 1, key(1, 4));
        assert_eq!(*touched.lock(), vec![frame]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate(u32, usize),
        Free(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..4, 0usize..16).prop_map(|(pid, vpn)| Op::Allocate(pid, vpn)),
            (0usize..8).prop_map(Op::Free),
        ]
    }

    #[derive(Debug, Clone)]
    enum PagingOp {
        Write(usize, usize, u8),
        Evict,
        Exit(usize),
    }

    const SPACES: usize = 3;

    fn paging_op_strategy() -> impl Strategy<Value = PagingOp> {
        prop_oneof![
            3 => (0..SPACES, 0usize..9, any::<u8>()).prop_map(|(s, vpn, value)| PagingOp::Write(s, vpn, value)),
            1 => Just(PagingOp::Evict),
            1 => (0..SPACES).prop_map(PagingOp::Exit),
        ]
    }

    fn spawn(machine: &Arc<Machine>, tag: u8) -> Arc<AddressSpace> {
        let image = build_image(&[tag; 50], 0, &[], 0);
        AddressSpace::create(machine, Box::new(MemoryImage::new(image))).unwrap()
    }

    fn resident_contents(machine: &Machine, spaces: &[Arc<AddressSpace>]) -> Vec<(PageKey, Vec<u8>)> {
        let mut pages = Vec::new();
        for space in spaces {
            for vpn in 0..space.num_pages() {
                if let Some(frame) = space.entry(vpn).frame() {
                    pages.push((PageKey::new(space.pid(), vpn), machine.memory().read_frame(frame)));
                }
            }
        }
        pages
    }

    fn space_entry_frame(spaces: &[Arc<AddressSpace>], page: PageKey) -> Option<FrameIndex> {
        spaces
            .iter()
            .find(|space| space.pid() == page.pid)
            .and_then(|space| space.entry(page.vpn).frame())
    }

    /// Every used frame backs a valid entry naming it, no page sits in two
    /// frames, and every valid entry is accounted for by a used frame.
    fn check_back_references(
        machine: &Machine,
        spaces: &[Arc<AddressSpace>],
    ) -> core::result::Result<(), TestCaseError> {
        let frames = machine.frames();
        let mut owners = HashSet::new();
        for frame in 0..frames.num_frames() {
            if let Some(owner) = frames.owner(frame) {
                prop_assert!(owners.insert(owner), "{} held by two frames", owner);
                let space = machine.processes().lookup(owner.pid);
                prop_assert!(space.is_some(), "frame {} owned by exited {}", frame, owner.pid);
                if let Some(space) = space {
                    prop_assert_eq!(space.entry(owner.vpn).frame(), Some(frame));
                }
            }
        }
        prop_assert_eq!(frames.free_frame_count() + owners.len(), frames.num_frames());
        let valid: usize = spaces.iter().map(|space| space.resident_pages()).sum();
        prop_assert_eq!(valid, owners.len());
        Ok(())
    }

    proptest! {
        #[test]
        fn eviction_keeps_frames_unique_and_back_referenced(
            ops in proptest::collection::vec(paging_op_strategy(), 1..48)
        ) {
            let config = PagerConfig {
                num_phys_pages: 3,
                seed: Some(9),
                ..Default::default()
            };
            let machine = Machine::new(config).unwrap();
            let page_size = machine.config().page_size;
            let mut spaces: Vec<_> = (0..SPACES as u8).map(|tag| spawn(&machine, tag)).collect();
            // never registered, so it is never picked as a victim owner
            let requester = PageKey::new(ProcessId(u32::MAX), 0);

            for op in ops {
                match op {
                    PagingOp::Write(s, vpn, value) => {
                        let mut unit = TranslationUnit::new(Arc::clone(&machine));
                        spaces[s].restore_state(&mut unit);
                        let vaddr = (vpn * page_size + 1) as u32;
                        unit.write_byte(&spaces[s], vaddr, value).unwrap();
                        prop_assert_eq!(unit.read_byte(&spaces[s], vaddr).unwrap(), value);
                    }
                    PagingOp::Evict => {
                        let before = resident_contents(&machine, &spaces);
                        let had_free = machine.frames().free_frame_count() > 0;
                        let frame = machine.frames().evict_and_allocate(requester, machine.processes());
                        prop_assert_eq!(machine.frames().owner(frame), Some(requester));

                        let lost: Vec<_> = before
                            .iter()
                            .filter(|(key, _)| {
                                spaces
                                    .iter()
                                    .find(|space| space.pid() == key.pid)
                                    .is_some_and(|space| !space.entry(key.vpn).valid)
                            })
                            .collect();
                        if had_free {
                            prop_assert!(lost.is_empty());
                        } else {
                            prop_assert_eq!(lost.len(), 1);
                            let (victim, bytes) = lost[0];
                            prop_assert_eq!(space_entry_frame(&spaces, *victim), None);
                            prop_assert_eq!(&machine.swap().page_in(*victim).unwrap(), bytes);
                        }
                        machine.frames().free(frame);
                    }
                    PagingOp::Exit(s) => {
                        let pid = spaces[s].pid();
                        spaces[s] = spawn(&machine, s as u8);
                        prop_assert!(machine.processes().lookup(pid).is_none());
                        prop_assert!((0..9).all(|vpn| !machine.swap().contains(PageKey::new(pid, vpn))));
                    }
                }
                check_back_references(&machine, &spaces)?;
            }
        }

        #[test]
        fn used_frames_are_unique_and_counted(ops in proptest::collection::vec(op_strategy(), 1..64)) {
            let frames = table(8);
            let mut held: Vec<FrameIndex> = Vec::new();
            for op in ops {
                match op {
                    Op::Allocate(pid, vpn) => match frames.allocate(key(pid, vpn)) {
                        Ok(frame) => {
                            prop_assert!(!held.contains(&frame));
                            frames.commit(frame);
                            held.push(frame);
                        }
                        Err(Error::NoFreeFrame) => {
                            prop_assert_eq!(held.len(), 8);
                        }
                        Err(other) => {
                            prop_assert!(false, "unexpected error {}", other);
                        }
                    },
                    Op::Free(i) => {
                        if !held.is_empty() {
                            let frame = held.remove(i % held.len());
                            frames.free(frame);
                        }
                    }
                }
                prop_assert_eq!(frames.free_frame_count() + held.len(), 8);
                for frame in 0..8 {
                    prop_assert_eq!(frames.is_frame_used(frame), held.contains(&frame));
                }
            }
        }
    }
}
