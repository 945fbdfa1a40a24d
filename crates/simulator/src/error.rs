//! Error types for loading and running a simulation.
//!
//! Process-fatal events (segmentation violations, invalid instructions, failed
//! allocations) are not errors; they terminate the offending process and the run goes
//! on. Everything here stops the whole simulation.

use std::{io, path::PathBuf};

use java_properties::PropertiesError;
use vmm::{GeometryError, MemoryError, ProcessId, VirtualAddress};

use crate::{ProcessStatus, clock::Tick};

/// A simulation-fatal condition.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("memory manager failure at time {time}: {source}")]
    Memory {
        time: Tick,
        #[source]
        source: MemoryError,
    },

    /// Every CPU is parked, processes are still alive and nothing is scheduled to wake.
    #[error("all {cpus} CPUs are blocked in idle at time {time} with {live} live processes and no pending events")]
    Stalled { time: Tick, cpus: usize, live: usize },

    /// A wake event is due before the current time.
    #[error("time warp: current time is {now} but an event is pending at {tick}")]
    TimeWarp { now: Tick, tick: Tick },

    /// A fault was resolved but translating the same address failed again.
    #[error("recursive {kind} translation failure for process {pid} at {addr}")]
    RecursiveTranslation {
        kind: &'static str,
        pid: ProcessId,
        addr: VirtualAddress,
    },

    /// An instruction's own pages keep evicting each other.
    #[error("process {pid} cannot keep the pages of the instruction at {addr} resident in {frames} frames at time {time}")]
    Thrashing {
        time: Tick,
        pid: ProcessId,
        addr: VirtualAddress,
        frames: usize,
    },

    /// The scheduler handed out a process that cannot run.
    #[error("scheduler gave CPU {cpu} process {pid} at time {time}, which is {status:?} rather than ready")]
    NotReady {
        time: Tick,
        cpu: usize,
        pid: ProcessId,
        status: ProcessStatus,
    },

    #[error("failed to start the thread for {name}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("CPU {0} worker panicked")]
    WorkerPanic(usize),

    #[error("director panicked")]
    DirectorPanic,
}

/// A configuration file that could not be turned into a [`SimConfig`](crate::SimConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed configuration properties")]
    Syntax(#[from] PropertiesError),

    #[error("configuration is missing the {0} property")]
    Missing(String),

    #[error("configuration property {key} has invalid value '{value}'")]
    Invalid { key: String, value: String },

    #[error("configuration lists no processes")]
    NoProcesses,

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// A trace file that could not be expanded into instructions.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("unable to read trace file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trace input {source_name} is not a valid properties file")]
    Syntax {
        source_name: String,
        #[source]
        source: PropertiesError,
    },

    #[error("trace input {source_name} is missing the {tag}.TR property")]
    MissingTag { source_name: String, tag: String },

    #[error("trace input {source_name} has invalid repetition count '{value}' for {tag}")]
    InvalidReps {
        source_name: String,
        tag: String,
        value: String,
    },

    #[error("trace input {source_name} nests tags deeper than {limit} levels at {tag}")]
    TooDeep {
        source_name: String,
        tag: String,
        limit: usize,
    },

    #[error("trace input {source_name} expands to more than {limit} instructions")]
    TooLong { source_name: String, limit: usize },
}
