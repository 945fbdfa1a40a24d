//! Per-CPU address translation.
//!
//! A [`TranslationUnit`] turns virtual addresses into frame numbers for whichever process
//! is dispatched on its CPU. With a TLB it consults the cache first and falls back to the
//! page table on a miss, installing what it finds. Without one every translation walks
//! the page table and stamps the frame directly, which is how LRU order is kept when no
//! TLB is in use.
//!
//! Translation never resolves faults: a `None` result sends the caller to
//! [`MemoryManager::handle_fault`](crate::MemoryManager::handle_fault).

use crate::{
    AddressSpace, FrameNumber, FrameTable, Geometry, PageNumber, ProcessId, ReferenceClock,
    VirtualAddress,
    page_table::Walk,
    tlb::{Tlb, TlbLoad},
};

/// Translation counters for one CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationStats {
    pub hits: u64,
    pub faults: u64,
    pub invalidates: u64,
    pub load_cleans: u64,
    pub load_steals: u64,
}

/// The translation hardware of one CPU.
pub struct TranslationUnit {
    cpu: usize,
    tlb: Option<Tlb>,
    /// The process most recently dispatched on this CPU.
    owner: Option<ProcessId>,
    stats: TranslationStats,
}

impl TranslationUnit {
    /// Creates a translation unit, with a TLB of `geometry.tlb_entries()` slots if
    /// `use_tlb` is set.
    pub fn new(cpu: usize, geometry: &Geometry, use_tlb: bool) -> Self {
        Self {
            cpu,
            tlb: use_tlb.then(|| Tlb::new(geometry.tlb_entries())),
            owner: None,
            stats: TranslationStats::default(),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn tlb(&self) -> Option<&Tlb> {
        self.tlb.as_ref()
    }

    pub fn owner(&self) -> Option<ProcessId> {
        self.owner
    }

    pub fn stats(&self) -> TranslationStats {
        self.stats
    }

    /// Switches the unit to a process, invalidating the TLB if the previous process
    /// was a different one.
    pub fn dispatch(&mut self, pid: ProcessId) {
        let switching = self.owner.is_some_and(|owner| owner != pid);
        if let Some(tlb) = self.tlb.as_mut()
            && switching
        {
            self.stats.invalidates += 1;
            log::info!("CPU {} TLB Invalidate.", self.cpu);
            tlb.invalidate();
        }
        self.owner = Some(pid);
    }

    /// Drops any cached translation of `page` if this unit caches `pid`.
    pub fn purge(&mut self, pid: ProcessId, page: PageNumber) -> bool {
        match self.tlb.as_mut() {
            Some(tlb) if self.owner == Some(pid) => tlb.purge(page),
            _ => false,
        }
    }

    /// Drops every cached translation of `pid` without counting an invalidate.
    pub fn forget(&mut self, pid: ProcessId) {
        if let Some(tlb) = self.tlb.as_mut()
            && self.owner == Some(pid)
        {
            tlb.invalidate();
        }
    }

    /// Copies TLB reference stamps into the frame table.
    pub fn flush_references(&self, frames: &mut FrameTable) {
        let Some(tlb) = self.tlb.as_ref() else {
            return;
        };
        for entry in tlb.valid_entries() {
            frames.refresh(entry.frame, entry.referenced);
        }
    }

    /// Translates an address of the dispatched process.
    pub fn translate(
        &mut self,
        geometry: &Geometry,
        space: &AddressSpace,
        frames: &mut FrameTable,
        clock: &mut ReferenceClock,
        addr: VirtualAddress,
    ) -> Option<FrameNumber> {
        let page = geometry.page_of(addr);
        if let Some(tlb) = self.tlb.as_mut() {
            if let Some(frame) = tlb.lookup(page, clock.stamp()) {
                self.log_hit(page, frame);
                return Some(frame);
            }
            let frame = self.walk(space, frames, clock, page)?;
            self.load(page, frame, clock.stamp());
            Some(frame)
        } else {
            let frame = self.walk(space, frames, clock, page)?;
            self.log_hit(page, frame);
            Some(frame)
        }
    }

    /// Looks a page up in the page table, stamping the frame on success.
    fn walk(
        &mut self,
        space: &AddressSpace,
        frames: &mut FrameTable,
        clock: &mut ReferenceClock,
        page: PageNumber,
    ) -> Option<FrameNumber> {
        match space.walk(page) {
            Walk::Entry(entry) => {
                if let Some(frame) = entry.frame() {
                    frames.touch(frame, clock.stamp());
                    return Some(frame);
                }
            }
            Walk::MissingTable { l1 } => {
                log::info!("CPU {} PTE L1 Index Null at index [{}]", self.cpu, l1);
            }
            Walk::MissingEntry { l1, l2 } => {
                log::info!("CPU {} PTE is Null at index [{}][{}]", self.cpu, l1, l2);
            }
            Walk::OutOfRange => {}
        }
        self.stats.faults += 1;
        log::info!("CPU {} Xlation Fault: page {}", self.cpu, page);
        None
    }

    fn load(&mut self, page: PageNumber, frame: FrameNumber, stamp: u64) {
        let Some(tlb) = self.tlb.as_mut() else {
            return;
        };
        match tlb.install(page, frame, stamp) {
            TlbLoad::Clean { .. } => {
                self.stats.load_cleans += 1;
                log::info!(
                    "CPU {} TLB Load Clean: page/frame {}->{}",
                    self.cpu,
                    page,
                    frame
                );
            }
            TlbLoad::Steal {
                page: old_page,
                frame: old_frame,
                ..
            } => {
                self.stats.load_steals += 1;
                log::info!(
                    "CPU {} TLB Load Steal: page/frame {}->{} stolen from {}->{}",
                    self.cpu,
                    page,
                    frame,
                    old_page,
                    old_frame
                );
            }
        }
    }

    fn log_hit(&mut self, page: PageNumber, frame: FrameNumber) {
        self.stats.hits += 1;
        log::info!(
            "CPU {} Xlation Hit: page/frame {}->{}",
            self.cpu,
            page,
            frame
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameOwner;

    struct Fixture {
        geometry: Geometry,
        space: AddressSpace,
        frames: FrameTable,
        clock: ReferenceClock,
    }

    const PID: ProcessId = ProcessId::new(0);

    impl Fixture {
        /// 16-byte pages, 4 frames, 16 pages, 2 TLB entries.
        fn new() -> Self {
            let geometry = Geometry::new(4, 2, 4, 2, 1).unwrap();
            Self {
                geometry,
                space: AddressSpace::new(PID, geometry),
                frames: FrameTable::new(geometry.frame_count()),
                clock: ReferenceClock::new(),
            }
        }

        fn map(&mut self, page: usize) -> FrameNumber {
            let page = PageNumber::new(page);
            self.space.allocate(page, 1).unwrap();
            let frame = self.frames.take_free().unwrap();
            self.frames
                .assign(frame, FrameOwner { pid: PID, page }, self.clock.stamp());
            self.space.entry_mut(page).unwrap().set_resident(frame);
            frame
        }

        fn translate(&mut self, mmu: &mut TranslationUnit, page: usize) -> Option<FrameNumber> {
            let addr = self.geometry.page_start(PageNumber::new(page)) + 4;
            mmu.translate(
                &self.geometry,
                &self.space,
                &mut self.frames,
                &mut self.clock,
                addr,
            )
        }
    }

    mod page_table_mode {
        use super::*;

        #[test]
        fn resident_pages_hit_and_stamp_the_frame() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, false);
            let frame = fixture.map(3);
            let before = fixture.frames.referenced(frame);

            assert_eq!(fixture.translate(&mut mmu, 3), Some(frame));
            assert!(fixture.frames.referenced(frame) > before);
            assert_eq!(mmu.stats().hits, 1);
        }

        #[test]
        fn unmapped_and_missing_pages_fault() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, false);
            fixture.space.allocate(PageNumber::new(2), 1).unwrap();

            assert_eq!(fixture.translate(&mut mmu, 2), None);
            assert_eq!(fixture.translate(&mut mmu, 3), None);
            assert_eq!(fixture.translate(&mut mmu, 9), None);
            assert_eq!(fixture.translate(&mut mmu, 40), None);
            assert_eq!(mmu.stats().faults, 4);
            assert_eq!(mmu.stats().hits, 0);
        }
    }

    mod tlb_mode {
        use super::*;

        #[test]
        fn two_entries_five_nine_five() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, true);
            mmu.dispatch(PID);
            let five = fixture.map(5);
            let nine = fixture.map(9);

            assert_eq!(fixture.translate(&mut mmu, 5), Some(five));
            assert_eq!(fixture.translate(&mut mmu, 9), Some(nine));
            let nine_stamp = mmu.tlb().unwrap().entries()[1].referenced;
            let five_stamp = mmu.tlb().unwrap().entries()[0].referenced;

            assert_eq!(fixture.translate(&mut mmu, 5), Some(five));

            let stats = mmu.stats();
            assert_eq!(stats.load_cleans, 2);
            assert_eq!(stats.load_steals, 0);
            assert_eq!(stats.hits, 1);
            let entries = mmu.tlb().unwrap().entries();
            assert!(entries[0].referenced > five_stamp);
            assert_eq!(entries[1].referenced, nine_stamp);
            assert_eq!(entries[1].page, PageNumber::new(9));
        }

        #[test]
        fn full_tlb_steals_the_oldest_slot() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, true);
            mmu.dispatch(PID);
            for page in [1, 2, 3] {
                fixture.map(page);
            }
            fixture.translate(&mut mmu, 1);
            fixture.translate(&mut mmu, 2);
            fixture.translate(&mut mmu, 1);
            fixture.translate(&mut mmu, 3);

            let stats = mmu.stats();
            assert_eq!((stats.load_cleans, stats.load_steals), (2, 1));
            let pages: Vec<_> = mmu
                .tlb()
                .unwrap()
                .valid_entries()
                .map(|e| e.page.as_usize())
                .collect();
            assert_eq!(pages, vec![1, 3]);
        }

        #[test]
        fn switching_processes_invalidates() {
            let fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(1, &fixture.geometry, true);
            mmu.dispatch(PID);
            mmu.dispatch(PID);
            assert_eq!(mmu.stats().invalidates, 0);
            mmu.dispatch(ProcessId::new(1));
            assert_eq!(mmu.stats().invalidates, 1);
        }

        #[test]
        fn purge_only_applies_to_the_cached_process() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, true);
            mmu.dispatch(PID);
            fixture.map(4);
            fixture.translate(&mut mmu, 4);

            assert!(!mmu.purge(ProcessId::new(7), PageNumber::new(4)));
            assert!(mmu.purge(PID, PageNumber::new(4)));
            assert_eq!(mmu.tlb().unwrap().valid_entries().count(), 0);
        }

        #[test]
        fn flush_copies_stamps_into_frames() {
            let mut fixture = Fixture::new();
            let mut mmu = TranslationUnit::new(0, &fixture.geometry, true);
            mmu.dispatch(PID);
            let frame = fixture.map(6);
            fixture.map(7);
            fixture.translate(&mut mmu, 6);
            fixture.translate(&mut mmu, 6);
            let hit_stamp = mmu.tlb().unwrap().entries()[0].referenced;
            assert!(fixture.frames.referenced(frame) < hit_stamp);

            mmu.flush_references(&mut fixture.frames);
            assert_eq!(fixture.frames.referenced(frame), hit_stamp);
        }
    }
}
