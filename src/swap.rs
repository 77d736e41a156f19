use std::collections::HashMap;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::process::{PageKey, ProcessId};

enum Slot {
    /// Eviction has claimed the page but its bytes are still being copied out.
    InFlight,
    Stored(Box<[u8]>),
}

/// Backing store for evicted pages, one slot per `(pid, vpn)`.
///
/// Slots live in memory for as long as their process does.
pub struct SwapStore {
    page_size: usize,
    slots: Mutex<HashMap<PageKey, Slot>>,
    written: Condvar,
}

impl SwapStore {
    pub fn new(page_size: usize) -> Self {
        SwapStore {
            page_size,
            slots: Mutex::new(HashMap::new()),
            written: Condvar::new(),
        }
    }

    /// Store (or overwrite) the contents of `key`.
    pub fn page_out(&self, key: PageKey, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            self.page_size,
            "swap slot {} written with {} bytes",
            key,
            bytes.len()
        );
        trace!("swap: page out {}", key);
        self.slots.lock().insert(key, Slot::Stored(bytes.into()));
        self.written.notify_all();
    }

    /// Return the last contents paged out for `key`.
    ///
    /// Blocks while an eviction of `key` is still copying its frame out.
    pub fn page_in(&self, key: PageKey) -> Result<Vec<u8>> {
        let mut slots = self.slots.lock();
        loop {
            match slots.get(&key) {
                None => return Err(Error::NoSuchSlot(key)),
                Some(Slot::Stored(bytes)) => {
                    trace!("swap: page in {}", key);
                    return Ok(bytes.to_vec());
                }
                Some(Slot::InFlight) => self.written.wait(&mut slots),
            }
        }
    }

    /// True if `key` was paged out, or is being paged out right now.
    pub fn contains(&self, key: PageKey) -> bool {
        self.slots.lock().contains_key(&key)
    }

    /// Number of slots held, in-flight ones included.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every slot belonging to an exiting process.
    pub fn discard_process(&self, pid: ProcessId) {
        self.slots.lock().retain(|key, _| key.pid != pid);
    }

    /// Claim `key` for an eviction whose copy has not happened yet.
    pub(crate) fn begin_page_out(&self, key: PageKey) {
        self.slots.lock().insert(key, Slot::InFlight);
    }
}
