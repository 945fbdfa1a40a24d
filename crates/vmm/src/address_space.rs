//! Per-process address spaces.

use crate::{
    Geometry, MemoryError, PageNumber, ProcessId,
    page_table::{Hole, PageTable, PageTableEntry, Walk},
};

/// The virtual address space of one process.
///
/// Owns the process's page table. Pages must be allocated before they can be faulted
/// in; allocation only creates entries, it never assigns frames.
pub struct AddressSpace {
    pid: ProcessId,
    table: PageTable,
    page_count: usize,
}

impl AddressSpace {
    /// Creates an address space with no pages allocated.
    pub fn new(pid: ProcessId, geometry: Geometry) -> Self {
        Self {
            pid,
            table: PageTable::new(geometry),
            page_count: geometry.page_count(),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Number of pages this address space can hold.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Allocates `count` pages starting at `start`.
    ///
    /// Returns `Ok(false)` without touching the table when the range does not fit in
    /// the address space. Allocating a page that is already allocated is an error; the
    /// whole range is checked before any entry is created.
    pub fn allocate(&mut self, start: PageNumber, count: usize) -> Result<bool, MemoryError> {
        let fits = start
            .as_usize()
            .checked_add(count)
            .is_some_and(|end| end <= self.page_count);
        if !fits {
            log::info!(
                "Memory request exceeds allocation for process {} start page {} count {}",
                self.pid,
                start,
                count
            );
            return Ok(false);
        }

        let pages = (0..count).map(|i| start + i);
        if let Some(page) = pages.clone().find(|page| self.table.entry(*page).is_some()) {
            return Err(MemoryError::AlreadyAllocated {
                pid: self.pid,
                page,
            });
        }
        for page in pages {
            self.table.insert(page, PageTableEntry::new());
        }
        Ok(true)
    }

    /// Walks the page table for a page.
    pub fn walk(&self, page: PageNumber) -> Walk {
        self.table.walk(page)
    }

    pub fn entry(&self, page: PageNumber) -> Option<&PageTableEntry> {
        self.table.entry(page)
    }

    pub fn entry_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        self.table.entry_mut(page)
    }

    /// Iterates over allocated pages from low to high addresses.
    pub fn entries(&self) -> impl Iterator<Item = (PageNumber, &PageTableEntry)> + '_ {
        self.table.entries()
    }

    /// Logs every missing second-level block and missing entry.
    pub fn check(&self) -> Vec<Hole> {
        let holes = self.table.holes();
        for hole in &holes {
            match hole {
                Hole::Table { l1 } => log::debug!(
                    "Process {}: No 2nd Level Page Table at index [{}][]",
                    self.pid,
                    l1
                ),
                Hole::Entry { l1, l2 } => {
                    log::debug!("Process {}: No PTE at index [{}][{}]", self.pid, l1, l2)
                }
            }
        }
        holes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageState;

    fn space() -> AddressSpace {
        AddressSpace::new(ProcessId::new(0), Geometry::new(4, 2, 4, 2, 1).unwrap())
    }

    #[test]
    fn allocation_creates_unmapped_entries() {
        let mut space = space();
        assert_eq!(space.allocate(PageNumber::new(2), 3), Ok(true));
        let pages: Vec<_> = space
            .entries()
            .map(|(page, entry)| (page.as_usize(), entry.state()))
            .collect();
        assert_eq!(
            pages,
            vec![
                (2, PageState::Unmapped),
                (3, PageState::Unmapped),
                (4, PageState::Unmapped)
            ]
        );
    }

    #[test]
    fn allocation_up_to_the_last_page_fits() {
        let mut space = space();
        assert_eq!(space.allocate(PageNumber::new(12), 4), Ok(true));
        assert!(space.entry(PageNumber::new(15)).is_some());
    }

    #[test]
    fn oversized_allocation_changes_nothing() {
        let mut space = space();
        space.allocate(PageNumber::new(0), 1).unwrap();
        space
            .entry_mut(PageNumber::new(0))
            .unwrap()
            .set_resident(crate::FrameNumber::new(3));

        assert_eq!(space.allocate(PageNumber::new(10), 7), Ok(false));
        assert_eq!(space.allocate(PageNumber::new(usize::MAX), 2), Ok(false));
        assert_eq!(space.entries().count(), 1);
        assert_eq!(
            space.entry(PageNumber::new(0)).unwrap().state(),
            PageState::Resident(crate::FrameNumber::new(3))
        );
    }

    #[test]
    fn reallocation_is_an_error_and_changes_nothing() {
        let mut space = space();
        space.allocate(PageNumber::new(3), 1).unwrap();
        assert_eq!(
            space.allocate(PageNumber::new(1), 4),
            Err(MemoryError::AlreadyAllocated {
                pid: ProcessId::new(0),
                page: PageNumber::new(3)
            })
        );
        assert!(space.entry(PageNumber::new(1)).is_none());
        assert!(space.entry(PageNumber::new(2)).is_none());
    }

    #[test]
    fn check_reports_holes() {
        let mut space = space();
        space.allocate(PageNumber::new(0), 4).unwrap();
        space.allocate(PageNumber::new(4), 1).unwrap();
        let holes = space.check();
        assert_eq!(holes.len(), 5);
        assert_eq!(holes[0], Hole::Entry { l1: 1, l2: 1 });
    }
}
