//! The memory manager: page faults, frame stealing and process teardown.
//!
//! The memory manager owns physical memory, the frame table, the swap store and every
//! process's address space. Address spaces live in an arena indexed by [`ProcessId`],
//! frames point back at their owner by (process, page), and nothing holds a reference
//! to anything else.
//!
//! ## Fault handling
//!
//! A fault is resolved in a fixed order:
//!
//! 1. Instruction fetches beyond the text pages are illegal.
//! 2. Pages beyond the address space, or never allocated, are segmentation violations.
//! 3. TLB reference stamps from every CPU are copied into the frame table, so the LRU
//!    choice below sees the real reference order.
//! 4. A frame is taken from the free list, or the least recently used frame is stolen:
//!    its contents go to the swap store, its owner's entry records the token and every
//!    CPU caching the owner's translation purges it.
//! 5. The page is swapped back in if it had been swapped out, otherwise zero-filled.
//! 6. The entry becomes resident and the frame records its new owner.
//!
//! Violations are ordinary results. Only broken bookkeeping is an error.

use crate::{
    AddressSpace, FrameNumber, FrameOwner, FrameTable, Geometry, MemoryError, PageNumber,
    PageState, PhysicalAddress, PhysicalMemory, ProcessId, ReferenceClock, SwapStore,
    TranslationUnit, VirtualAddress, page_table::Hole,
};

/// The kind of access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// An instruction fetch by a process whose text occupies `text_pages` pages.
    Instruction { text_pages: usize },
    /// A data load or store.
    Data,
}

/// Why a fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Instruction fetch outside the text pages.
    IllegalFetch { page: PageNumber },
    /// The page is beyond the address space.
    OutOfRange { page: PageNumber },
    /// The page was never allocated.
    Unallocated { page: PageNumber },
}

/// Outcome of handling a page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page is now resident in the frame.
    Resolved(FrameNumber),
    /// The access is illegal; the process must be terminated.
    Violation(Violation),
}

/// Owner of all memory state in the machine.
pub struct MemoryManager {
    geometry: Geometry,
    memory: PhysicalMemory,
    frames: FrameTable,
    swap: SwapStore,
    clock: ReferenceClock,
    spaces: Vec<Option<AddressSpace>>,
}

impl MemoryManager {
    /// Creates a memory manager with every frame free and no address spaces.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            memory: PhysicalMemory::new(&geometry),
            frames: FrameTable::new(geometry.frame_count()),
            swap: SwapStore::new(),
            clock: ReferenceClock::new(),
            spaces: Vec::new(),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Creates an empty address space for a process, replacing any previous one.
    pub fn create_address_space(&mut self, pid: ProcessId) {
        let index = pid.as_usize();
        if self.spaces.len() <= index {
            self.spaces.resize_with(index + 1, || None);
        }
        self.spaces[index] = Some(AddressSpace::new(pid, self.geometry));
    }

    pub fn address_space(&self, pid: ProcessId) -> Option<&AddressSpace> {
        self.spaces.get(pid.as_usize())?.as_ref()
    }

    fn space_mut(&mut self, pid: ProcessId) -> Result<&mut AddressSpace, MemoryError> {
        self.spaces
            .get_mut(pid.as_usize())
            .and_then(Option::as_mut)
            .ok_or(MemoryError::UnknownProcess(pid))
    }

    /// Allocates `count` pages of a process starting at `start`.
    ///
    /// Returns `Ok(false)`, changing nothing, if the range does not fit.
    pub fn allocate_pages(
        &mut self,
        pid: ProcessId,
        start: PageNumber,
        count: usize,
    ) -> Result<bool, MemoryError> {
        self.space_mut(pid)?.allocate(start, count)
    }

    /// Translates an address for a process through a CPU's translation unit.
    pub fn translate(
        &mut self,
        mmu: &mut TranslationUnit,
        pid: ProcessId,
        addr: VirtualAddress,
    ) -> Option<FrameNumber> {
        let space = self.spaces.get(pid.as_usize())?.as_ref()?;
        mmu.translate(
            &self.geometry,
            space,
            &mut self.frames,
            &mut self.clock,
            addr,
        )
    }

    /// Copies a CPU's TLB reference stamps into the frame table.
    pub fn flush_references(&mut self, mmu: &TranslationUnit) {
        mmu.flush_references(&mut self.frames);
    }

    /// Resolves a page fault.
    ///
    /// `mmus` are the translation units of every CPU; their TLB stamps feed the LRU
    /// choice and they are purged of any translation for a stolen page.
    pub fn handle_fault(
        &mut self,
        pid: ProcessId,
        addr: VirtualAddress,
        access: Access,
        mmus: &mut [TranslationUnit],
    ) -> Result<FaultResolution, MemoryError> {
        let page = self.geometry.page_of(addr);

        if let Access::Instruction { text_pages } = access
            && page.as_usize() >= text_pages
        {
            log::trace!("Illegal instruction fetch for process {pid} at {addr}, page {page}");
            return Ok(FaultResolution::Violation(Violation::IllegalFetch { page }));
        }

        let space = self.space_mut(pid)?;
        if page.as_usize() >= space.page_count() {
            log::trace!(
                "Segmentation fault for process {} on virtual address {}. Page {} exceeds address space size {}",
                pid,
                addr,
                page,
                space.page_count()
            );
            return Ok(FaultResolution::Violation(Violation::OutOfRange { page }));
        }
        let Some(entry) = space.entry(page) else {
            log::trace!(
                "Segmentation fault for process {pid} on virtual address {addr}. Page {page}"
            );
            return Ok(FaultResolution::Violation(Violation::Unallocated { page }));
        };
        let state = entry.state();
        if let PageState::Resident(frame) = state {
            return Ok(FaultResolution::Resolved(frame));
        }

        for mmu in mmus.iter() {
            mmu.flush_references(&mut self.frames);
        }
        let frame = self.allocate_frame(pid, page, mmus)?;

        match state {
            PageState::Swapped(token) => {
                self.dump_frame("Frame before swap in:", frame);
                self.swap
                    .swap_in(token, self.memory.frame_mut(frame), pid, page)?;
                self.dump_frame("Frame after swap in:", frame);
            }
            _ => {
                self.dump_frame("Zero frame before:", frame);
                self.memory.zero_frame(frame);
                self.dump_frame("Zero frame after:", frame);
            }
        }

        let space = self.space_mut(pid)?;
        if let Some(entry) = space.entry_mut(page) {
            entry.set_resident(frame);
        }
        Ok(FaultResolution::Resolved(frame))
    }

    /// Finds a frame for (pid, page), stealing one if none is free.
    fn allocate_frame(
        &mut self,
        pid: ProcessId,
        page: PageNumber,
        mmus: &mut [TranslationUnit],
    ) -> Result<FrameNumber, MemoryError> {
        let frame = match self.frames.take_free() {
            Some(frame) => {
                log::trace!("Using free frame {frame} for process {pid} page {page}");
                frame
            }
            None => {
                let frame =
                    self.frames
                        .least_recently_used()
                        .ok_or(MemoryError::NoEvictableFrame {
                            frame_count: self.frames.frame_count(),
                        })?;
                self.steal_frame(frame, pid, page, mmus)?;
                frame
            }
        };
        let stamp = self.clock.stamp();
        self.frames.assign(frame, FrameOwner { pid, page }, stamp);
        Ok(frame)
    }

    /// Swaps out the current contents of an owned frame.
    fn steal_frame(
        &mut self,
        frame: FrameNumber,
        pid: ProcessId,
        page: PageNumber,
        mmus: &mut [TranslationUnit],
    ) -> Result<(), MemoryError> {
        let Some(victim) = self.frames.owner(frame) else {
            return Err(MemoryError::NoEvictableFrame {
                frame_count: self.frames.frame_count(),
            });
        };
        log::trace!(
            "Stealing frame {} from process {} page {} for process {} page {}",
            frame,
            victim.pid,
            victim.page,
            pid,
            page
        );
        let missing = MemoryError::MissingOwnerEntry {
            frame,
            pid: victim.pid,
            page: victim.page,
        };
        let entry = self
            .spaces
            .get_mut(victim.pid.as_usize())
            .and_then(Option::as_mut)
            .and_then(|space| space.entry_mut(victim.page))
            .ok_or(missing.clone())?;
        if entry.frame() != Some(frame) {
            return Err(missing);
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("Frame before swap out:");
            for line in self.memory.dump_frame(frame) {
                log::trace!("\t{line}");
            }
        }
        let token = self.swap.swap_out(
            self.memory.frame(frame),
            victim.pid,
            victim.page,
            self.clock.current(),
        );
        entry.set_swapped(token);

        for mmu in mmus.iter_mut() {
            mmu.purge(victim.pid, victim.page);
        }
        Ok(())
    }

    /// Tears down a process: swapped pages are deleted, resident frames are freed and
    /// cached translations are dropped.
    pub fn release_address_space(
        &mut self,
        pid: ProcessId,
        mmus: &mut [TranslationUnit],
    ) -> Result<(), MemoryError> {
        let space = self
            .spaces
            .get_mut(pid.as_usize())
            .and_then(Option::take)
            .ok_or(MemoryError::UnknownProcess(pid))?;
        for (page, entry) in space.entries() {
            match entry.state() {
                PageState::Swapped(token) => self.swap.delete(token, pid, page)?,
                PageState::Resident(frame) => {
                    log::trace!(
                        "Reclaiming free frame {} from process {} at vaddr {}",
                        frame,
                        pid,
                        self.geometry.page_start(page)
                    );
                    self.frames.release(frame);
                }
                PageState::Unmapped => {}
            }
        }
        for mmu in mmus.iter_mut() {
            mmu.forget(pid);
        }
        Ok(())
    }

    /// Logs and returns the holes in a process's page table.
    pub fn check_page_table(&self, pid: ProcessId) -> Vec<Hole> {
        self.address_space(pid)
            .map(AddressSpace::check)
            .unwrap_or_default()
    }

    /// Combines a frame and the page offset of an address.
    pub fn physical_address(&self, frame: FrameNumber, addr: VirtualAddress) -> PhysicalAddress {
        self.geometry.physical_address(frame, addr)
    }

    pub fn load_word(&self, addr: PhysicalAddress) -> i32 {
        self.memory.load_word(addr)
    }

    pub fn store_word(&mut self, addr: PhysicalAddress, value: i32) {
        self.memory.store_word(addr, value);
    }

    /// Whether `frame` still holds the page of `addr` for a process.
    ///
    /// Unlike [`translate`](Self::translate) this touches no TLB, stamp or counter.
    pub fn holds(&self, pid: ProcessId, addr: VirtualAddress, frame: FrameNumber) -> bool {
        let page = self.geometry.page_of(addr);
        self.frames.owner(frame) == Some(FrameOwner { pid, page })
    }

    /// Logs any page images left in the swap store and returns how many there are.
    pub fn check_swaps(&self) -> usize {
        let outstanding = self.swap.outstanding();
        if !outstanding.is_empty() {
            log::error!("Exiting with swapped pages!");
            for (token, page) in &outstanding {
                log::error!(
                    "Token: {} page {} pid {} time {}",
                    token,
                    page.page,
                    page.pid,
                    page.time
                );
            }
        }
        outstanding.len()
    }

    fn dump_frame(&self, title: &str, frame: FrameNumber) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{title}");
            log::trace!("Dumping frame number {frame}:");
            for line in self.memory.dump_frame(frame) {
                log::trace!("\t{line}");
            }
        }
    }
}
