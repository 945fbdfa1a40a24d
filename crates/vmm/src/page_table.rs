//! Two-level forward-mapped page tables.
//!
//! The first level is a fixed array of optional second-level blocks. Blocks are created
//! the first time a page in their range is allocated, and a page that has never been
//! allocated has no entry at all. Index bit slicing comes from the [`Geometry`].

use crate::{FrameNumber, Geometry, PageNumber, SwapToken};

/// Where the contents of an allocated page currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageState {
    /// Allocated but never touched: the first fault zero-fills a frame.
    #[default]
    Unmapped,
    /// Backed by a physical frame.
    Resident(FrameNumber),
    /// Evicted to the swap store under a token.
    Swapped(SwapToken),
}

/// A page table entry for an allocated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageTableEntry {
    state: PageState,
}

impl PageTableEntry {
    /// Creates an entry for a freshly allocated page.
    pub const fn new() -> Self {
        Self {
            state: PageState::Unmapped,
        }
    }

    pub const fn state(&self) -> PageState {
        self.state
    }

    /// Returns the backing frame if the page is resident.
    pub const fn frame(&self) -> Option<FrameNumber> {
        match self.state {
            PageState::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    /// Returns the swap token if the page is swapped out.
    pub const fn token(&self) -> Option<SwapToken> {
        match self.state {
            PageState::Swapped(token) => Some(token),
            _ => None,
        }
    }

    pub const fn is_resident(&self) -> bool {
        matches!(self.state, PageState::Resident(_))
    }

    pub fn set_resident(&mut self, frame: FrameNumber) {
        self.state = PageState::Resident(frame);
    }

    pub fn set_swapped(&mut self, token: SwapToken) {
        self.state = PageState::Swapped(token);
    }
}

/// Result of walking the page table for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// The first-level index is beyond the table.
    OutOfRange,
    /// No second-level block exists for the first-level index.
    MissingTable { l1: usize },
    /// The block exists but the page was never allocated.
    MissingEntry { l1: usize, l2: usize },
    /// The page is allocated.
    Entry(PageTableEntry),
}

/// A gap found while checking a page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hole {
    /// A first-level slot with no second-level block.
    Table { l1: usize },
    /// A second-level slot with no entry.
    Entry { l1: usize, l2: usize },
}

type Block = Box<[Option<PageTableEntry>]>;

/// A sparse two-level page table.
pub struct PageTable {
    level1: Box<[Option<Block>]>,
    geometry: Geometry,
}

impl PageTable {
    /// Creates an empty page table with no second-level blocks.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            level1: (0..geometry.level1_entries()).map(|_| None).collect(),
            geometry,
        }
    }

    /// Walks the table for a page.
    pub fn walk(&self, page: PageNumber) -> Walk {
        let l1 = self.geometry.level1_index(page);
        let l2 = self.geometry.level2_index(page);
        match self.level1.get(l1) {
            None => Walk::OutOfRange,
            Some(None) => Walk::MissingTable { l1 },
            Some(Some(block)) => match block[l2] {
                None => Walk::MissingEntry { l1, l2 },
                Some(entry) => Walk::Entry(entry),
            },
        }
    }

    /// Returns the entry for a page if it is allocated.
    pub fn entry(&self, page: PageNumber) -> Option<&PageTableEntry> {
        let l1 = self.geometry.level1_index(page);
        let l2 = self.geometry.level2_index(page);
        self.level1.get(l1)?.as_ref()?[l2].as_ref()
    }

    /// Returns the entry for a page for modification if it is allocated.
    pub fn entry_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        let l1 = self.geometry.level1_index(page);
        let l2 = self.geometry.level2_index(page);
        self.level1.get_mut(l1)?.as_mut()?[l2].as_mut()
    }

    /// Installs an entry, creating the second-level block if needed.
    ///
    /// Returns the entry previously installed for the page. Pages beyond the table are
    /// ignored and return `None`.
    pub fn insert(&mut self, page: PageNumber, entry: PageTableEntry) -> Option<PageTableEntry> {
        let l1 = self.geometry.level1_index(page);
        let l2 = self.geometry.level2_index(page);
        let level2_entries = self.geometry.level2_entries();
        let block = self
            .level1
            .get_mut(l1)?
            .get_or_insert_with(|| vec![None; level2_entries].into_boxed_slice());
        block[l2].replace(entry)
    }

    /// Iterates over allocated pages in ascending page order.
    pub fn entries(&self) -> impl Iterator<Item = (PageNumber, &PageTableEntry)> + '_ {
        let level2_entries = self.geometry.level2_entries();
        self.level1
            .iter()
            .enumerate()
            .filter_map(|(l1, block)| block.as_ref().map(|block| (l1, block)))
            .flat_map(move |(l1, block)| {
                block.iter().enumerate().filter_map(move |(l2, entry)| {
                    entry
                        .as_ref()
                        .map(|entry| (PageNumber::new(l1 * level2_entries + l2), entry))
                })
            })
    }

    /// Number of second-level blocks that have been created.
    pub fn table_count(&self) -> usize {
        self.level1.iter().filter(|block| block.is_some()).count()
    }

    /// Lists every missing block and missing entry, in index order.
    pub fn holes(&self) -> Vec<Hole> {
        let mut holes = Vec::new();
        for (l1, block) in self.level1.iter().enumerate() {
            let Some(block) = block else {
                holes.push(Hole::Table { l1 });
                continue;
            };
            holes.extend(
                block
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.is_none())
                    .map(|(l2, _)| Hole::Entry { l1, l2 }),
            );
        }
        holes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PageTable {
        PageTable::new(Geometry::new(4, 2, 4, 2, 1).unwrap())
    }

    mod walk {
        use super::*;

        #[test]
        fn empty_table_has_no_blocks() {
            let table = table();
            assert_eq!(table.table_count(), 0);
            assert_eq!(table.walk(PageNumber::new(5)), Walk::MissingTable { l1: 1 });
        }

        #[test]
        fn pages_past_the_table_are_out_of_range() {
            assert_eq!(table().walk(PageNumber::new(16)), Walk::OutOfRange);
        }

        #[test]
        fn sibling_pages_share_a_block() {
            let mut table = table();
            table.insert(PageNumber::new(5), PageTableEntry::new());
            assert_eq!(table.table_count(), 1);
            assert_eq!(
                table.walk(PageNumber::new(6)),
                Walk::MissingEntry { l1: 1, l2: 2 }
            );
            assert_eq!(
                table.walk(PageNumber::new(5)),
                Walk::Entry(PageTableEntry::new())
            );
        }
    }

    mod entries {
        use super::*;

        #[test]
        fn state_changes_are_exclusive() {
            let mut entry = PageTableEntry::new();
            assert_eq!(entry.state(), PageState::Unmapped);

            entry.set_resident(FrameNumber::new(2));
            assert_eq!(entry.frame(), Some(FrameNumber::new(2)));
            assert_eq!(entry.token(), None);

            entry.set_swapped(SwapToken::new(7));
            assert!(!entry.is_resident());
            assert_eq!(entry.frame(), None);
            assert_eq!(entry.token(), Some(SwapToken::new(7)));
        }

        #[test]
        fn insert_returns_previous() {
            let mut table = table();
            assert_eq!(table.insert(PageNumber::new(3), PageTableEntry::new()), None);
            assert_eq!(
                table.insert(PageNumber::new(3), PageTableEntry::new()),
                Some(PageTableEntry::new())
            );
            assert_eq!(table.insert(PageNumber::new(99), PageTableEntry::new()), None);
        }

        #[test]
        fn iterates_in_page_order() {
            let mut table = table();
            for page in [9, 1, 14, 2] {
                table.insert(PageNumber::new(page), PageTableEntry::new());
            }
            let pages: Vec<_> = table.entries().map(|(page, _)| page.as_usize()).collect();
            assert_eq!(pages, vec![1, 2, 9, 14]);
        }

        #[test]
        fn mutation_through_entry_mut() {
            let mut table = table();
            table.insert(PageNumber::new(4), PageTableEntry::new());
            table
                .entry_mut(PageNumber::new(4))
                .unwrap()
                .set_resident(FrameNumber::new(1));
            assert!(table.entry(PageNumber::new(4)).unwrap().is_resident());
            assert!(table.entry_mut(PageNumber::new(5)).is_none());
        }
    }

    #[test]
    fn reports_holes() {
        let mut table = table();
        for page in [0, 1, 2] {
            table.insert(PageNumber::new(page), PageTableEntry::new());
        }
        assert_eq!(
            table.holes(),
            vec![
                Hole::Entry { l1: 0, l2: 3 },
                Hole::Table { l1: 1 },
                Hole::Table { l1: 2 },
                Hole::Table { l1: 3 },
            ]
        );
    }
}
