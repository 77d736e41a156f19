use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::address_space::AddressSpace;

/// Identifier of a simulated process (one address space each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Names one virtual page of one process.
///
/// This is the frame table's back-reference to a page table entry and the key
/// of a swap slot; frame indices are reused across processes, these are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub pid: ProcessId,
    pub vpn: usize,
}

impl PageKey {
    pub fn new(pid: ProcessId, vpn: usize) -> Self {
        PageKey { pid, vpn }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, vpn {})", self.pid, self.vpn)
    }
}

/// Resolves a process id to its address space. Consulted only during eviction.
pub trait ProcessTable: Send + Sync {
    /// `None` once the process has exited or started tearing down.
    fn lookup(&self, pid: ProcessId) -> Option<Arc<AddressSpace>>;
}

/// In-memory process table holding weak references, so registration never
/// keeps an address space alive past its owner.
#[derive(Default)]
pub struct ProcessRegistry {
    next_pid: AtomicU32,
    spaces: Mutex<HashMap<ProcessId, Weak<AddressSpace>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_pid(&self) -> ProcessId {
        ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, space: &Arc<AddressSpace>) {
        let previous = self.spaces.lock().insert(space.pid(), Arc::downgrade(space));
        assert!(previous.is_none(), "{} registered twice", space.pid());
    }

    pub(crate) fn unregister(&self, pid: ProcessId) {
        self.spaces.lock().remove(&pid);
    }

    /// Processes currently registered (live or tearing down).
    pub fn len(&self) -> usize {
        self.spaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessTable for ProcessRegistry {
    fn lookup(&self, pid: ProcessId) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().get(&pid).and_then(Weak::upgrade)
    }
}
