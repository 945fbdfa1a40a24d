//! Scheduling policy.
//!
//! The simulator calls into a [`Scheduler`] at every scheduling event. Calls are made
//! with the machine lock held, one at a time, so implementations need no locking of
//! their own.

use std::collections::VecDeque;

use vmm::ProcessId;

pub trait Scheduler: Send {
    /// A process arrived and is ready to run.
    fn process_started(&mut self, pid: ProcessId);

    /// A process used its whole quantum of `ticks` on `cpu` and is still ready.
    fn quantum_expired(&mut self, pid: ProcessId, cpu: usize, ticks: u32);

    /// Picks the next process to run on `cpu`, or `None` to let the CPU idle.
    fn schedule(&mut self, cpu: usize) -> Option<ProcessId>;

    /// A process terminated and must not be returned from [`Self::schedule`] again.
    fn process_exited(&mut self, pid: ProcessId);

    /// A process blocked on `cpu` after running `ticks` of its burst.
    fn process_blocked(&mut self, pid: ProcessId, cpu: usize, ticks: u32);

    /// A blocked process became ready again.
    fn unblocked(&mut self, pid: ProcessId);
}

/// First come, first served with a fixed quantum per process.
#[derive(Debug, Default)]
pub struct RoundRobin {
    ready: VecDeque<ProcessId>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.ready.iter().copied()
    }
}

impl Scheduler for RoundRobin {
    fn process_started(&mut self, pid: ProcessId) {
        self.ready.push_back(pid);
    }

    fn quantum_expired(&mut self, pid: ProcessId, _cpu: usize, _ticks: u32) {
        self.ready.push_back(pid);
    }

    fn schedule(&mut self, _cpu: usize) -> Option<ProcessId> {
        self.ready.pop_front()
    }

    fn process_exited(&mut self, pid: ProcessId) {
        self.ready.retain(|ready| *ready != pid);
    }

    fn process_blocked(&mut self, _pid: ProcessId, _cpu: usize, _ticks: u32) {}

    fn unblocked(&mut self, pid: ProcessId) {
        self.ready.push_back(pid);
    }
}
