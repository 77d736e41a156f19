//! Victim selection strategies for the frame table.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{EvictionKind, PagerConfig};
use crate::frame_table::FrameIndex;

/// Chooses which in-use frame to reclaim when the pool is exhausted.
///
/// Called with the frame table lock held. `candidates` lists only frames that
/// are mapped and whose owner is still alive; it is never empty.
pub trait EvictionPolicy: Send {
    fn select_victim(&mut self, candidates: &[FrameIndex]) -> FrameIndex;

    /// A page was just installed in `frame`.
    fn admitted(&mut self, _frame: FrameIndex) {}

    /// An access set the `use` bit of the page in `frame`.
    fn touched(&mut self, _frame: FrameIndex) {}
}

/// Build the policy named by the configuration.
pub fn from_config(config: &PagerConfig) -> Box<dyn EvictionPolicy> {
    match config.eviction {
        EvictionKind::Random => Box::new(match config.seed {
            Some(seed) => RandomPolicy::seeded(seed),
            None => RandomPolicy::new(),
        }),
        EvictionKind::Lru => Box::new(LruPolicy::new(config.num_phys_pages)),
    }
}

/// Uniform choice over the candidates.
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new() -> Self {
        RandomPolicy {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        RandomPolicy {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for RandomPolicy {
    fn select_victim(&mut self, candidates: &[FrameIndex]) -> FrameIndex {
        candidates[self.rng.gen_range(0..candidates.len())]
    }
}

/// Least recently touched frame wins; ties go to the lower frame index.
pub struct LruPolicy {
    last_touched: Vec<u64>,
    clock: u64,
}

impl LruPolicy {
    pub fn new(num_frames: usize) -> Self {
        LruPolicy {
            last_touched: vec![0; num_frames],
            clock: 0,
        }
    }

    fn stamp(&mut self, frame: FrameIndex) {
        self.clock += 1;
        self.last_touched[frame] = self.clock;
    }
}

impl EvictionPolicy for LruPolicy {
    fn select_victim(&mut self, candidates: &[FrameIndex]) -> FrameIndex {
        candidates
            .iter()
            .copied()
            .min_by_key(|&frame| (self.last_touched[frame], frame))
            .expect("victim selection over an empty candidate set")
    }

    fn admitted(&mut self, frame: FrameIndex) {
        self.stamp(frame);
    }

    fn touched(&mut self, frame: FrameIndex) {
        self.stamp(frame);
    }
}
