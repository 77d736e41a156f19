use std::sync::Arc;

use log::info;

use crate::config::PagerConfig;
use crate::error::Result;
use crate::eviction::{self, EvictionPolicy};
use crate::frame_table::FrameTable;
use crate::memory::PhysicalMemory;
use crate::process::ProcessRegistry;
use crate::stats::{PagerStats, StatsSnapshot};
use crate::swap::SwapStore;

/// Everything shared by all address spaces: physical memory, the frame
/// table, the swap store and the process registry.
pub struct Machine {
    config: PagerConfig,
    memory: PhysicalMemory,
    frames: FrameTable,
    swap: SwapStore,
    processes: ProcessRegistry,
    stats: PagerStats,
}

impl Machine {
    /// Build a machine running the eviction policy named by `config`.
    pub fn new(config: PagerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let policy = eviction::from_config(&config);
        Self::with_policy(config, policy)
    }

    /// Build a machine with a caller-supplied eviction policy.
    pub fn with_policy(config: PagerConfig, policy: Box<dyn EvictionPolicy>) -> Result<Arc<Self>> {
        config.validate()?;
        info!(
            "machine: {} frames of {} bytes, {:?} eviction",
            config.num_phys_pages, config.page_size, config.eviction
        );
        Ok(Arc::new(Machine {
            memory: PhysicalMemory::new(config.num_phys_pages, config.page_size),
            frames: FrameTable::new(config.num_phys_pages, policy),
            swap: SwapStore::new(config.page_size),
            processes: ProcessRegistry::new(),
            stats: PagerStats::new(),
            config,
        }))
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &PagerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::AddressSpace;
    use crate::config::EvictionKind;
    use crate::error::Error;
    use crate::image::{build_image, MemoryImage};
    use crate::translation::TranslationUnit;
    use std::thread;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = PagerConfig {
            num_phys_pages: 0,
            ..Default::default()
        };
        assert!(matches!(Machine::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_components_sized_from_config() {
        let config = PagerConfig {
            num_phys_pages: 6,
            page_size: 64,
            ..Default::default()
        };
        let machine = Machine::new(config).unwrap();
        assert_eq!(machine.memory().size(), 6 * 64);
        assert_eq!(machine.frames().num_frames(), 6);
        assert_eq!(machine.frames().free_frame_count(), 6);
        assert!(machine.swap().is_empty());
        assert!(machine.processes().is_empty());
        assert_eq!(machine.stats(), StatsSnapshot::default());
    }

    /// Several processes fault and write over more pages than there are frames;
    /// every byte written must read back after the churn.
    fn concurrent_faults_preserve_contents(eviction: EvictionKind) {
        let config = PagerConfig {
            num_phys_pages: 4,
            eviction,
            seed: Some(11),
            ..Default::default()
        };
        let machine = Machine::new(config).unwrap();
        let page_size = machine.config().page_size;

        let workers: Vec<_> = (0..4u8)
            .map(|tag| {
                let machine = Arc::clone(&machine);
                thread::spawn(move || {
                    let image = build_image(&[tag; 64], 0, &[], 0);
                    let space = AddressSpace::create(&machine, Box::new(MemoryImage::new(image))).unwrap();
                    let mut unit = TranslationUnit::new(Arc::clone(&machine));
                    space.restore_state(&mut unit);

                    let pages = 6;
                    for round in 0..3u8 {
                        for vpn in 0..pages {
                            let vaddr = (vpn * page_size + 5) as u32;
                            let value = tag.wrapping_mul(31).wrapping_add(vpn as u8).wrapping_add(round);
                            unit.write_byte(&space, vaddr, value).unwrap();
                        }
                    }
                    for vpn in 0..pages {
                        let vaddr = (vpn * page_size + 5) as u32;
                        let expected = tag.wrapping_mul(31).wrapping_add(vpn as u8).wrapping_add(2);
                        assert_eq!(unit.read_byte(&space, vaddr).unwrap(), expected);
                    }
                    // untouched code bytes survive eviction too
                    assert_eq!(unit.read_byte(&space, 0).unwrap(), tag);
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(machine.stats().evictions > 0);
        assert_eq!(machine.frames().free_frame_count(), 4);
        assert!(machine.swap().is_empty());
        assert!(machine.processes().is_empty());
    }

    #[test]
    fn test_concurrent_faults_random_policy() {
        concurrent_faults_preserve_contents(EvictionKind::Random);
    }

    #[test]
    fn test_concurrent_faults_lru_policy() {
        concurrent_faults_preserve_contents(EvictionKind::Lru);
    }
}
