use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::constants::*;
use crate::error::{Error, Result};

/// Which victim-selection strategy the frame table runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    #[default]
    Random,
    Lru,
}

impl std::str::FromStr for EvictionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(EvictionKind::Random),
            "lru" => Ok(EvictionKind::Lru),
            other => Err(Error::InvalidConfig(format!("unknown eviction policy: {}", other))),
        }
    }
}

/// Machine configuration. Every field falls back to the value in `constants`.
///
/// ```toml
/// page_size = 128
/// num_phys_pages = 4
/// eviction = "lru"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagerConfig {
    pub page_size: usize,
    pub num_phys_pages: usize,
    pub user_stack_size: usize,
    pub eviction: EvictionKind,
    /// Seed for the random eviction policy; `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Mark pages lying entirely inside the code segment read-only.
    pub read_only_code: bool,
}

impl Default for PagerConfig {
    fn default() -> Self {
        PagerConfig {
            page_size: PAGE_SIZE,
            num_phys_pages: NUM_PHYS_PAGES,
            user_stack_size: USER_STACK_SIZE,
            eviction: EvictionKind::default(),
            seed: None,
            read_only_code: false,
        }
    }
}

impl PagerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Rejects configurations the machine cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.num_phys_pages == 0 {
            return Err(Error::InvalidConfig("physical frame pool is empty".to_string()));
        }
        if self.page_size == 0 || self.page_size % 4 != 0 {
            return Err(Error::InvalidConfig(format!(
                "page size {} is not a positive multiple of the word size",
                self.page_size
            )));
        }
        if self.page_size <= STACK_GUARD {
            return Err(Error::InvalidConfig(format!(
                "page size {} must exceed the {}-byte stack guard",
                self.page_size, STACK_GUARD
            )));
        }
        if self.user_stack_size < STACK_GUARD {
            return Err(Error::InvalidConfig(format!(
                "user stack of {} bytes is smaller than the {}-byte stack guard",
                self.user_stack_size, STACK_GUARD
            )));
        }
        Ok(())
    }

    /// Total bytes of simulated physical memory.
    pub fn memory_size(&self) -> usize {
        self.num_phys_pages * self.page_size
    }
}
