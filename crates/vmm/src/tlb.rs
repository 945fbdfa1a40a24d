//! A flat, fully associative translation lookaside buffer.

use crate::{FrameNumber, PageNumber};

/// One TLB slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbEntry {
    pub valid: bool,
    pub page: PageNumber,
    pub frame: FrameNumber,
    /// Reference stamp of the last hit or load.
    pub referenced: u64,
}

/// How a translation was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbLoad {
    /// Went into an invalid slot.
    Clean { slot: usize },
    /// Replaced the least recently referenced valid slot.
    Steal {
        slot: usize,
        page: PageNumber,
        frame: FrameNumber,
    },
}

/// A per-CPU TLB.
pub struct Tlb {
    entries: Box<[TlbEntry]>,
}

impl Tlb {
    /// Creates a TLB with every slot invalid.
    pub fn new(entry_count: usize) -> Self {
        Self {
            entries: vec![TlbEntry::default(); entry_count].into_boxed_slice(),
        }
    }

    pub fn entries(&self) -> &[TlbEntry] {
        &self.entries
    }

    /// Looks up a page, refreshing the slot's stamp on a hit.
    pub fn lookup(&mut self, page: PageNumber, stamp: u64) -> Option<FrameNumber> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.valid && entry.page == page)?;
        entry.referenced = stamp;
        Some(entry.frame)
    }

    /// Installs a translation.
    ///
    /// The first invalid slot wins. With every slot valid, the slot with the smallest
    /// stamp is replaced, the lowest index winning ties.
    pub fn install(&mut self, page: PageNumber, frame: FrameNumber, stamp: u64) -> TlbLoad {
        let load = match self.entries.iter().position(|entry| !entry.valid) {
            Some(slot) => TlbLoad::Clean { slot },
            None => {
                let mut slot = 0;
                for (index, entry) in self.entries.iter().enumerate().skip(1) {
                    if entry.referenced < self.entries[slot].referenced {
                        slot = index;
                    }
                }
                let victim = self.entries[slot];
                TlbLoad::Steal {
                    slot,
                    page: victim.page,
                    frame: victim.frame,
                }
            }
        };
        let slot = match load {
            TlbLoad::Clean { slot } | TlbLoad::Steal { slot, .. } => slot,
        };
        self.entries[slot] = TlbEntry {
            valid: true,
            page,
            frame,
            referenced: stamp,
        };
        load
    }

    /// Invalidates every slot.
    pub fn invalidate(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.valid = false;
        }
    }

    /// Invalidates any slot caching `page`. Returns whether one was found.
    pub fn purge(&mut self, page: PageNumber) -> bool {
        let mut purged = false;
        for entry in self.entries.iter_mut().filter(|e| e.valid && e.page == page) {
            entry.valid = false;
            purged = true;
        }
        purged
    }

    /// Iterates over valid slots.
    pub fn valid_entries(&self) -> impl Iterator<Item = &TlbEntry> + '_ {
        self.entries.iter().filter(|entry| entry.valid)
    }
}
