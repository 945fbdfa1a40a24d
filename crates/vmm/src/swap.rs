//! The swap store: evicted page images addressed by token.
//!
//! Swap I/O is instantaneous. Tokens come from a counter that only moves forward,
//! probing past any token that is still outstanding.

use std::collections::HashMap;
use std::fmt;

use crate::{MemoryError, PageNumber, ProcessId, SwapToken};

/// One evicted page image.
#[derive(Clone, PartialEq, Eq)]
pub struct SwappedPage {
    pub pid: ProcessId,
    pub page: PageNumber,
    /// Reference stamp at which the page was swapped out.
    pub time: u64,
    pub bytes: Box<[u8]>,
}

impl fmt::Debug for SwappedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwappedPage")
            .field("pid", &self.pid)
            .field("page", &self.page)
            .field("time", &self.time)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Token-addressed store of swapped-out pages.
#[derive(Default)]
pub struct SwapStore {
    pages: HashMap<SwapToken, SwappedPage>,
    next_token: u64,
}

impl SwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies a page image into the store and returns its token.
    pub fn swap_out(
        &mut self,
        bytes: &[u8],
        pid: ProcessId,
        page: PageNumber,
        time: u64,
    ) -> SwapToken {
        while self.pages.contains_key(&SwapToken::new(self.next_token)) {
            self.next_token = self.next_token.wrapping_add(1);
        }
        let token = SwapToken::new(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        log::trace!("Swapped out process {pid} page {page} under token {token}");
        self.pages.insert(
            token,
            SwappedPage {
                pid,
                page,
                time,
                bytes: bytes.into(),
            },
        );
        token
    }

    /// Copies a page image back into `target` and consumes its token.
    ///
    /// The caller passes the (process, page) it expects the image to belong to. A
    /// mismatch is logged and the copy still happens.
    pub fn swap_in(
        &mut self,
        token: SwapToken,
        target: &mut [u8],
        pid: ProcessId,
        page: PageNumber,
    ) -> Result<(), MemoryError> {
        let swapped = self
            .pages
            .remove(&token)
            .ok_or(MemoryError::UnknownSwapToken { token, pid, page })?;
        if swapped.pid != pid || swapped.page != page {
            log::error!(
                "Swap in mismatch for token {}: stored process {} page {}, requested process {} page {}",
                token,
                swapped.pid,
                swapped.page,
                pid,
                page
            );
        }
        target.copy_from_slice(&swapped.bytes);
        Ok(())
    }

    /// Discards a page image without copying it.
    pub fn delete(
        &mut self,
        token: SwapToken,
        pid: ProcessId,
        page: PageNumber,
    ) -> Result<(), MemoryError> {
        self.pages
            .remove(&token)
            .ok_or(MemoryError::UnknownSwapToken { token, pid, page })?;
        log::debug!("Deleting swapped page for token {token} page {page} pid {pid}");
        Ok(())
    }

    /// Number of page images currently held.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Lists outstanding page images ordered by token.
    pub fn outstanding(&self) -> Vec<(SwapToken, &SwappedPage)> {
        let mut pages: Vec<_> = self.pages.iter().map(|(token, page)| (*token, page)).collect();
        pages.sort_by_key(|(token, _)| *token);
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PID: ProcessId = ProcessId::new(1);
    const PAGE: PageNumber = PageNumber::new(4);

    #[test]
    fn round_trip_restores_bytes() {
        let mut store = SwapStore::new();
        let image: Vec<u8> = (0u8..16).collect();
        let token = store.swap_out(&image, PID, PAGE, 3);

        let mut target = [0xffu8; 16];
        store.swap_in(token, &mut target, PID, PAGE).unwrap();
        assert_eq!(&target[..], &image[..]);
        assert!(store.is_empty());
    }

    #[test]
    fn tokens_are_single_use() {
        let mut store = SwapStore::new();
        let token = store.swap_out(&[1; 16], PID, PAGE, 0);
        let mut target = [0u8; 16];
        store.swap_in(token, &mut target, PID, PAGE).unwrap();
        assert_eq!(
            store.swap_in(token, &mut target, PID, PAGE),
            Err(MemoryError::UnknownSwapToken {
                token,
                pid: PID,
                page: PAGE
            })
        );
    }

    #[test]
    fn tokens_never_collide_with_outstanding_ones() {
        let mut store = SwapStore::new();
        let first = store.swap_out(&[1; 16], PID, PAGE, 0);
        let second = store.swap_out(&[2; 16], PID, PageNumber::new(5), 0);
        assert_ne!(first, second);
        store.delete(first, PID, PAGE).unwrap();
        let third = store.swap_out(&[3; 16], PID, PAGE, 0);
        assert_ne!(third, second);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn mismatched_swap_in_still_copies() {
        let mut store = SwapStore::new();
        let token = store.swap_out(&[7; 16], PID, PAGE, 0);
        let mut target = [0u8; 16];
        store
            .swap_in(token, &mut target, ProcessId::new(2), PAGE)
            .unwrap();
        assert_eq!(target, [7; 16]);
    }

    #[test]
    fn deleting_an_unknown_token_fails() {
        let mut store = SwapStore::new();
        assert!(matches!(
            store.delete(SwapToken::new(42), PID, PAGE),
            Err(MemoryError::UnknownSwapToken { .. })
        ));
    }

    #[test]
    fn outstanding_is_sorted() {
        let mut store = SwapStore::new();
        for page in 0..3 {
            store.swap_out(&[0; 16], PID, PageNumber::new(page), 0);
        }
        let tokens: Vec<_> = store.outstanding().iter().map(|(t, _)| t.as_u64()).collect();
        assert_eq!(tokens, vec![0, 1, 2]);
    }
}
