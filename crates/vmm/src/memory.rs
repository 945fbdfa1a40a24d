//! Simulated physical memory.
//!
//! A flat byte array of `frame_count * page_size` bytes. Words are little-endian,
//! four bytes long, and never straddle a frame: a word that starts near the end of a
//! frame wraps around to the start of the same frame.

use crate::{FrameNumber, Geometry, PhysicalAddress, geometry::WORD_BYTES};

/// The machine's physical memory.
pub struct PhysicalMemory {
    /// The underlying memory buffer.
    bytes: Vec<u8>,
    page_size: usize,
}

impl PhysicalMemory {
    /// Creates zeroed physical memory sized for the geometry.
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            bytes: vec![0u8; geometry.memory_size()],
            page_size: geometry.page_size(),
        }
    }

    /// Returns the size of physical memory in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the bytes of one frame.
    ///
    /// # Panics
    /// Panics if the frame is beyond the end of physical memory.
    pub fn frame(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.as_usize() * self.page_size;
        &self.bytes[start..start + self.page_size]
    }

    /// Returns the bytes of one frame for writing.
    ///
    /// # Panics
    /// Panics if the frame is beyond the end of physical memory.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.as_usize() * self.page_size;
        &mut self.bytes[start..start + self.page_size]
    }

    /// Fills a frame with zeroes.
    pub fn zero_frame(&mut self, frame: FrameNumber) {
        self.frame_mut(frame).fill(0);
    }

    /// Loads the word at a physical address.
    pub fn load_word(&self, addr: PhysicalAddress) -> i32 {
        let mut word = [0u8; WORD_BYTES as usize];
        for (i, byte) in word.iter_mut().enumerate() {
            *byte = self.bytes[self.wrapped_index(addr, i)];
        }
        i32::from_le_bytes(word)
    }

    /// Stores a word at a physical address.
    pub fn store_word(&mut self, addr: PhysicalAddress, value: i32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            let index = self.wrapped_index(addr, i);
            self.bytes[index] = byte;
        }
    }

    /// Index of byte `i` of the word at `addr`, wrapped within its frame.
    fn wrapped_index(&self, addr: PhysicalAddress, i: usize) -> usize {
        let addr = addr.as_u64() as usize;
        let base = addr & !(self.page_size - 1);
        base + ((addr - base + i) & (self.page_size - 1))
    }

    /// Formats the words of a frame, one per line, as hexadecimal.
    pub fn dump_frame(&self, frame: FrameNumber) -> Vec<String> {
        self.frame(frame)
            .chunks_exact(WORD_BYTES as usize)
            .enumerate()
            .map(|(index, chunk)| {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                format!("{index:3}: {word:08X}")
            })
            .collect()
    }
}
