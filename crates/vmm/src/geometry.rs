//! System geometry: page size, frame count, address space size and page table shape.
//!
//! Every size in the simulated machine is a power of two configured by its log2. The
//! geometry owns all of the bit slicing that turns addresses into page numbers, page
//! numbers into page table indexes and frames back into physical addresses.

use core::fmt;

use crate::{FrameNumber, PageNumber, PhysicalAddress, VirtualAddress};

/// Size of a machine word in bytes. Instructions are one word long.
pub const WORD_BYTES: u64 = 4;

/// Largest supported physical memory, as a log2 of bytes.
const MAX_PHYSICAL_BITS: u32 = 32;

/// Largest supported virtual address space, as a log2 of bytes.
const MAX_VIRTUAL_BITS: u32 = 48;

/// Largest supported TLB, as a log2 of entries.
const MAX_TLB_LOG2: u32 = 16;

/// Errors produced when validating a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// Level one of the page table cannot index more pages than the address space has.
    #[error("level one entry count log2 {level1_log2} exceeds page count log2 {page_count_log2}")]
    LevelOneTooWide {
        level1_log2: u32,
        page_count_log2: u32,
    },
    /// Pages must hold at least one word.
    #[error("page size log2 {0} is smaller than one 4-byte word")]
    PageTooSmall(u32),
    /// Physical memory would exceed the supported size.
    #[error("physical memory of 2^{0} bytes exceeds the supported 2^32")]
    PhysicalTooLarge(u32),
    /// The virtual address space would exceed the supported size.
    #[error("virtual address space of 2^{0} bytes exceeds the supported 2^48")]
    VirtualTooLarge(u32),
    /// The TLB would exceed the supported size.
    #[error("TLB entry count log2 {0} exceeds the supported 16")]
    TlbTooLarge(u32),
}

/// Validated system geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    page_size_log2: u32,
    frame_count_log2: u32,
    page_count_log2: u32,
    level1_log2: u32,
    tlb_entry_count_log2: u32,
}

impl Geometry {
    /// Creates a geometry, validating that all of the log2 parameters fit together.
    pub fn new(
        page_size_log2: u32,
        frame_count_log2: u32,
        page_count_log2: u32,
        level1_log2: u32,
        tlb_entry_count_log2: u32,
    ) -> Result<Self, GeometryError> {
        if level1_log2 > page_count_log2 {
            return Err(GeometryError::LevelOneTooWide {
                level1_log2,
                page_count_log2,
            });
        }
        if (1u64 << page_size_log2.min(63)) < WORD_BYTES {
            return Err(GeometryError::PageTooSmall(page_size_log2));
        }
        let physical_bits = page_size_log2.saturating_add(frame_count_log2);
        if physical_bits > MAX_PHYSICAL_BITS {
            return Err(GeometryError::PhysicalTooLarge(physical_bits));
        }
        let virtual_bits = page_size_log2.saturating_add(page_count_log2);
        if virtual_bits > MAX_VIRTUAL_BITS {
            return Err(GeometryError::VirtualTooLarge(virtual_bits));
        }
        if tlb_entry_count_log2 > MAX_TLB_LOG2 {
            return Err(GeometryError::TlbTooLarge(tlb_entry_count_log2));
        }

        Ok(Self {
            page_size_log2,
            frame_count_log2,
            page_count_log2,
            level1_log2,
            tlb_entry_count_log2,
        })
    }

    pub const fn page_size_log2(&self) -> u32 {
        self.page_size_log2
    }

    /// Bytes per page (and per frame).
    pub const fn page_size(&self) -> usize {
        1 << self.page_size_log2
    }

    /// Number of physical frames.
    pub const fn frame_count(&self) -> usize {
        1 << self.frame_count_log2
    }

    /// Number of pages in every address space.
    pub const fn page_count(&self) -> usize {
        1 << self.page_count_log2
    }

    /// Total bytes of simulated physical memory.
    pub const fn memory_size(&self) -> usize {
        self.page_size() * self.frame_count()
    }

    /// Number of first-level page table slots.
    pub const fn level1_entries(&self) -> usize {
        1 << self.level1_log2
    }

    /// Number of entries in each second-level block.
    pub const fn level2_entries(&self) -> usize {
        1 << self.level2_log2()
    }

    /// Number of TLB entries per CPU.
    pub const fn tlb_entries(&self) -> usize {
        1 << self.tlb_entry_count_log2
    }

    const fn level2_log2(&self) -> u32 {
        self.page_count_log2 - self.level1_log2
    }

    /// Returns the first-level index of a page.
    ///
    /// Pages beyond the address space produce indexes beyond [`Self::level1_entries`].
    pub const fn level1_index(&self, page: PageNumber) -> usize {
        page.as_usize() >> self.level2_log2()
    }

    /// Returns the second-level index of a page.
    pub const fn level2_index(&self, page: PageNumber) -> usize {
        page.as_usize() & (self.level2_entries() - 1)
    }

    /// Returns the page containing a virtual address.
    pub fn page_of(&self, addr: VirtualAddress) -> PageNumber {
        let page = addr.as_u64() >> self.page_size_log2;
        PageNumber::new(usize::try_from(page).unwrap_or(usize::MAX))
    }

    /// Returns the byte offset of an address within its page.
    pub const fn page_offset(&self, addr: VirtualAddress) -> u64 {
        addr.as_u64() & (self.page_size() as u64 - 1)
    }

    /// Returns the first virtual address of a page.
    pub const fn page_start(&self, page: PageNumber) -> VirtualAddress {
        VirtualAddress::new((page.as_usize() as u64) << self.page_size_log2)
    }

    /// Returns the first physical address of a frame.
    pub const fn frame_start(&self, frame: FrameNumber) -> PhysicalAddress {
        PhysicalAddress::new((frame.as_usize() as u64) << self.page_size_log2)
    }

    /// Combines a frame with the page offset of a virtual address.
    pub const fn physical_address(
        &self,
        frame: FrameNumber,
        addr: VirtualAddress,
    ) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_start(frame).as_u64() | self.page_offset(addr))
    }

    /// Returns the frame containing a physical address.
    pub const fn frame_of(&self, addr: PhysicalAddress) -> FrameNumber {
        FrameNumber::new((addr.as_u64() >> self.page_size_log2) as usize)
    }

    /// Number of pages needed to hold `bytes` bytes, rounding up.
    pub const fn pages_for_bytes(&self, bytes: u64) -> usize {
        bytes.div_ceil(self.page_size() as u64) as usize
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page size log2 {}, frame count log2 {}, page count log2 {}, level one entries log2 {}, TLB entries log2 {}",
            self.page_size_log2,
            self.frame_count_log2,
            self.page_count_log2,
            self.level1_log2,
            self.tlb_entry_count_log2
        )
    }
}
