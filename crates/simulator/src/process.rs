//! Simulated processes.

use core::fmt;

use vmm::{ProcessId, VirtualAddress};

use crate::{Registers, Trace, clock::Tick};

/// Quantum given to processes that do not configure one.
pub const DEFAULT_QUANTUM: u32 = 4;

/// A process as described by the configuration, before it arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub trace: Trace,
    /// Tick at which the process arrives.
    pub start: Tick,
    pub quantum: u32,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, trace: Trace) -> Self {
        Self {
            name: name.into(),
            trace,
            start: 0,
            quantum: DEFAULT_QUANTUM,
        }
    }

    pub fn with_start(mut self, start: Tick) -> Self {
        self.start = start;
        self
    }

    pub fn with_quantum(mut self, quantum: u32) -> Self {
        self.quantum = quantum;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Waiting for its arrival tick.
    Pending,
    Ready,
    Running { cpu: usize },
    Blocked,
    Exited,
}

pub struct Process {
    pid: ProcessId,
    name: String,
    trace: Trace,
    quantum: u32,
    pub(crate) status: ProcessStatus,
    /// Registers saved while the process is off-CPU.
    pub(crate) saved: Registers,
    /// First virtual address past the text pages.
    pub(crate) data_base: VirtualAddress,
    pub(crate) text_pages: usize,
    pub(crate) started_at: Option<Tick>,
    pub(crate) completed_at: Option<Tick>,
    pub(crate) dispatches: u64,
    pub(crate) executed_ticks: u64,
    pub(crate) instruction_faults: u64,
    pub(crate) data_faults: u64,
    /// Length in ticks of every completed burst.
    pub(crate) bursts: Vec<u32>,
}

impl Process {
    pub fn new(pid: ProcessId, spec: ProcessSpec) -> Self {
        Self {
            pid,
            name: spec.name,
            trace: spec.trace,
            quantum: spec.quantum,
            status: ProcessStatus::Pending,
            saved: Registers::default(),
            data_base: VirtualAddress::new(0),
            text_pages: 0,
            started_at: None,
            completed_at: None,
            dispatches: 0,
            executed_ticks: 0,
            instruction_faults: 0,
            data_faults: 0,
            bursts: Vec::new(),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Records the end of a burst.
    pub(crate) fn end_burst(&mut self, ticks: u32) {
        self.bursts.push(ticks);
    }

    pub(crate) fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            pid: self.pid,
            name: self.name.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            executed_ticks: self.executed_ticks,
            dispatches: self.dispatches,
            instruction_faults: self.instruction_faults,
            data_faults: self.data_faults,
            bursts: self.bursts.clone(),
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process {}({})", self.name, self.pid)
    }
}

/// What a process did over the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub pid: ProcessId,
    pub name: String,
    /// `None` if the process never arrived.
    pub started_at: Option<Tick>,
    pub completed_at: Option<Tick>,
    pub executed_ticks: u64,
    pub dispatches: u64,
    pub instruction_faults: u64,
    pub data_faults: u64,
    pub bursts: Vec<u32>,
}
