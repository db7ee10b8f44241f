//! Routing domains: the multi-tenancy unit.
//!
//! A [`Domain`] is a named collection of fifos. Two domains may hold
//! same-named fifos without collision; agents, by contrast, are global to
//! the whole manager.

use std::collections::HashMap;

use crate::fifo::{DispatchMode, Fifo, FifoKey};

/// A named collection of fifos, created lazily on first use.
#[derive(Debug)]
pub(crate) struct Domain {
    pub name: String,
    pub fifos: HashMap<String, Fifo>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fifos: HashMap::new() }
    }

    pub fn fifo(&self, name: &str) -> Option<&Fifo> {
        self.fifos.get(name)
    }

    pub fn fifo_mut(&mut self, name: &str) -> Option<&mut Fifo> {
        self.fifos.get_mut(name)
    }

    /// Get or create a fifo. `seq` is only consumed when the fifo is
    /// actually created; an existing fifo keeps its original mode.
    pub fn ensure_fifo(&mut self, name: &str, mode: DispatchMode, seq: &mut u64) -> &mut Fifo {
        match self.fifos.entry(name.to_string()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let key = FifoKey::new(self.name.clone(), name);
                let fifo = Fifo::new(key, mode, *seq);
                *seq += 1;
                entry.insert(fifo)
            }
        }
    }
}
