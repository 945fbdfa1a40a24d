//! Errors raised by the memory core.
//!
//! Everything here is an invariant violation: the memory manager found its own
//! bookkeeping in a state it should never reach. Workload faults such as touching an
//! unallocated page are reported as [`FaultResolution`](crate::FaultResolution) values
//! instead.

use crate::{FrameNumber, PageNumber, ProcessId, SwapToken};

/// A simulation-fatal inconsistency in the memory core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// A swap token was used that the swap store does not hold.
    #[error("swap token {token} for process {pid} page {page} is not outstanding")]
    UnknownSwapToken {
        token: SwapToken,
        pid: ProcessId,
        page: PageNumber,
    },

    /// A page was allocated twice.
    #[error("process {pid} page {page} is already allocated")]
    AlreadyAllocated { pid: ProcessId, page: PageNumber },

    /// A frame claims an owner whose page table does not map it.
    #[error("frame {frame} is owned by process {pid} page {page}, which does not map it")]
    MissingOwnerEntry {
        frame: FrameNumber,
        pid: ProcessId,
        page: PageNumber,
    },

    /// The free list is empty and no frame has an owner to steal from.
    #[error("no evictable frame among {frame_count} frames")]
    NoEvictableFrame { frame_count: usize },

    /// The process has no address space.
    #[error("process {0} has no address space")]
    UnknownProcess(ProcessId),
}
