//! Physical frame bookkeeping: the free list and LRU reference times.
//!
//! Every frame is either on the free list or owned by exactly one (process, page). Owned
//! frames carry the reference stamp used to pick a victim when the free list runs dry.
//! The frame table only tracks ownership; copying page contents in and out of frames is
//! the memory manager's job.

use std::collections::VecDeque;

use crate::{FrameNumber, PageNumber, ProcessId};

/// Source of reference stamps for frames and TLB slots.
///
/// Stamps only order references against each other; they have nothing to do with
/// simulated time.
#[derive(Debug, Default)]
pub struct ReferenceClock(u64);

impl ReferenceClock {
    pub const fn new() -> Self {
        Self(0)
    }

    /// Returns the next stamp. Every call returns a larger value than the last.
    pub fn stamp(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// The most recently issued stamp.
    pub fn current(&self) -> u64 {
        self.0
    }
}

/// The (process, page) pair that owns a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameOwner {
    pub pid: ProcessId,
    pub page: PageNumber,
}

/// Metadata for one physical frame.
#[derive(Debug, Clone, Copy, Default)]
struct FrameInfo {
    owner: Option<FrameOwner>,
    /// Last reference stamp. Only meaningful while owned.
    referenced: u64,
}

/// The pool of physical frames.
pub struct FrameTable {
    frames: Box<[FrameInfo]>,
    free: VecDeque<FrameNumber>,
}

impl FrameTable {
    /// Creates a table with every frame free, in ascending order.
    pub fn new(frame_count: usize) -> Self {
        Self {
            frames: vec![FrameInfo::default(); frame_count].into_boxed_slice(),
            free: (0..frame_count).map(FrameNumber::new).collect(),
        }
    }

    /// Total number of frames in the pool.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn owned_count(&self) -> usize {
        self.frames.iter().filter(|f| f.owner.is_some()).count()
    }

    /// Takes the frame at the head of the free list.
    pub fn take_free(&mut self) -> Option<FrameNumber> {
        self.free.pop_front()
    }

    /// Returns the owned frame with the oldest reference stamp.
    ///
    /// Ties go to the lowest frame number.
    pub fn least_recently_used(&self) -> Option<FrameNumber> {
        let mut victim: Option<(FrameNumber, u64)> = None;
        for (index, info) in self.frames.iter().enumerate() {
            if info.owner.is_none() {
                continue;
            }
            if victim.is_none_or(|(_, oldest)| info.referenced < oldest) {
                victim = Some((FrameNumber::new(index), info.referenced));
            }
        }
        victim.map(|(frame, _)| frame)
    }

    /// Returns the owner of a frame, if it is owned.
    pub fn owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.frames[frame.as_usize()].owner
    }

    /// Returns the reference stamp of a frame.
    pub fn referenced(&self, frame: FrameNumber) -> u64 {
        self.frames[frame.as_usize()].referenced
    }

    /// Hands a frame to a new owner and stamps it.
    ///
    /// The frame must already be off the free list: freshly taken, or being stolen.
    pub fn assign(&mut self, frame: FrameNumber, owner: FrameOwner, stamp: u64) {
        let info = &mut self.frames[frame.as_usize()];
        info.owner = Some(owner);
        info.referenced = stamp;
    }

    /// Drops a frame's owner and returns it to the tail of the free list.
    pub fn release(&mut self, frame: FrameNumber) -> Option<FrameOwner> {
        let info = &mut self.frames[frame.as_usize()];
        let owner = info.owner.take();
        if owner.is_some() {
            self.free.push_back(frame);
        }
        owner
    }

    /// Sets the reference stamp of an owned frame.
    pub fn touch(&mut self, frame: FrameNumber, stamp: u64) {
        let info = &mut self.frames[frame.as_usize()];
        if info.owner.is_some() {
            info.referenced = stamp;
        }
    }

    /// Raises the reference stamp of an owned frame to at least `stamp`.
    pub fn refresh(&mut self, frame: FrameNumber, stamp: u64) {
        let info = &mut self.frames[frame.as_usize()];
        if info.owner.is_some() {
            info.referenced = info.referenced.max(stamp);
        }
    }

    /// Iterates over owned frames and their owners.
    pub fn owned(&self) -> impl Iterator<Item = (FrameNumber, FrameOwner)> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter_map(|(index, info)| info.owner.map(|owner| (FrameNumber::new(index), owner)))
    }
}
