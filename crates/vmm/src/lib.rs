//! # Virtual Memory Manager (VMM)
//!
//! The memory core of the paged machine simulator. It provides:
//!
//! - Power-of-two machine geometry and the address/page/frame arithmetic built on it.
//! - Simulated physical memory.
//! - Per-process two-level page tables with lazily created second-level blocks.
//! - A frame table with a free list and LRU reference stamps.
//! - A token-addressed swap store.
//! - Per-CPU translation units with an optional TLB.
//! - A memory manager that resolves page faults, steals frames and tears down
//!   address spaces.
//!
//! Nothing in this crate is thread-safe on its own; the simulator serializes all access
//! behind one lock.

mod address;
mod address_space;
mod error;
mod frame_table;
mod geometry;
mod memory;
mod memory_manager;
mod mmu;
mod numbers;
mod page_table;
mod swap;
mod tlb;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use error::MemoryError;
pub use frame_table::{FrameOwner, FrameTable, ReferenceClock};
pub use geometry::{Geometry, GeometryError, WORD_BYTES};
pub use memory::PhysicalMemory;
pub use memory_manager::{Access, FaultResolution, MemoryManager, Violation};
pub use mmu::{TranslationStats, TranslationUnit};
pub use numbers::{FrameNumber, PageNumber, ProcessId, SwapToken};
pub use page_table::{Hole, PageState, PageTable, PageTableEntry, Walk};
pub use swap::{SwapStore, SwappedPage};
pub use tlb::{Tlb, TlbEntry, TlbLoad};
