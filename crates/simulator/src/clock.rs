//! Virtual time and the pending-wake queue.

use std::collections::BTreeMap;

use crate::SimError;

/// A point in simulated time.
pub type Tick = u64;

/// The global simulated clock. It only moves forward.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Tick,
}

impl VirtualClock {
    pub const fn new() -> Self {
        Self { now: 0 }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Moves the clock to `tick`. Moving backwards is a time warp.
    pub fn advance_to(&mut self, tick: Tick) -> Result<(), SimError> {
        if tick < self.now {
            return Err(SimError::TimeWarp {
                now: self.now,
                tick,
            });
        }
        self.now = tick;
        Ok(())
    }
}

/// Waiters keyed by the tick at which they wake.
///
/// Waiters sharing a tick are released in the order they were scheduled.
#[derive(Debug)]
pub struct EventQueue<W> {
    pending: BTreeMap<Tick, Vec<W>>,
}

impl<W> Default for EventQueue<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> EventQueue<W> {
    pub const fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
        }
    }

    pub fn schedule(&mut self, tick: Tick, waiter: W) {
        self.pending.entry(tick).or_default().push(waiter);
    }

    /// The earliest tick with a pending waiter.
    pub fn next_tick(&self) -> Option<Tick> {
        self.pending.keys().next().copied()
    }

    /// Removes and returns every waiter due at the earliest pending tick.
    pub fn pop_next(&mut self) -> Option<(Tick, Vec<W>)> {
        self.pending.pop_first()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of pending waiters across all ticks.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clock_refuses_to_go_backwards() {
        let mut clock = VirtualClock::new();
        clock.advance_to(5).unwrap();
        clock.advance_to(5).unwrap();
        assert!(matches!(
            clock.advance_to(4),
            Err(SimError::TimeWarp { now: 5, tick: 4 })
        ));
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn same_tick_waiters_keep_their_order() {
        let mut queue = EventQueue::new();
        queue.schedule(3, 'b');
        queue.schedule(1, 'a');
        queue.schedule(3, 'c');
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_tick(), Some(1));
        assert_eq!(queue.pop_next(), Some((1, vec!['a'])));
        assert_eq!(queue.pop_next(), Some((3, vec!['b', 'c'])));
        assert_eq!(queue.pop_next(), None);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn draining_never_moves_time_backwards(ticks in prop::collection::vec(0u64..50, 0..40)) {
            let mut queue = EventQueue::new();
            for (index, tick) in ticks.iter().enumerate() {
                queue.schedule(*tick, index);
            }
            let mut clock = VirtualClock::new();
            let mut released = 0;
            while let Some((tick, waiters)) = queue.pop_next() {
                let before = clock.now();
                prop_assert!(clock.advance_to(tick).is_ok());
                prop_assert!(clock.now() >= before);
                released += waiters.len();
            }
            prop_assert_eq!(released, ticks.len());
        }
    }
}
