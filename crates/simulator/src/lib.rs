//! # vmsim
//!
//! A discrete-event simulator of a multiprogrammed, demand-paged machine. One or more
//! CPUs run traced instruction streams against simulated physical memory, translating
//! through two-level page tables and optional per-CPU TLBs. The memory core lives in
//! the [`vmm`] crate; this crate supplies everything that makes the machine run:
//!
//! - [`clock`]: virtual time and the queue of pending wake-ups.
//! - The director, a barrier that advances virtual time once every CPU is parked.
//! - The CPU worker loop: dispatch, translate, fault, execute, one tick per instruction.
//! - [`Scheduler`] and the [`RoundRobin`] policy.
//! - [`Instruction`], the trace instruction set, and [`Trace`], its loader.
//! - [`SimConfig`] and the [`Properties`] reader behind it.
//! - [`Console`], the logger installed by the `vmsim` binary.
//!
//! ```no_run
//! use vmsim::{ProcessSpec, SimConfig, Simulation, Trace};
//! use vmm::Geometry;
//!
//! let geometry = Geometry::new(4, 2, 4, 2, 1)?;
//! let config = SimConfig::new(geometry)
//!     .with_process(ProcessSpec::new("A", Trace::new(["printStr hi", "Syscall_Exit"])));
//! let summary = Simulation::new(config).run()?;
//! assert_eq!(summary.output, vec!["[PrintString] hi"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod clock;
mod config;
mod console;
mod cpu;
mod director;
mod error;
mod instruction;
mod process;
mod properties;
mod scheduler;
mod simulation;
mod stats;
mod trace;

pub use clock::{EventQueue, Tick, VirtualClock};
pub use config::SimConfig;
pub use console::Console;
pub use error::{ConfigError, SimError, TraceError};
pub use instruction::{ExecContext, Instruction, Outcome, Register, Registers, Signal};
pub use process::{DEFAULT_QUANTUM, Process, ProcessSpec, ProcessStatus, ProcessSummary};
pub use properties::{Properties, parse_integer};
pub use scheduler::{RoundRobin, Scheduler};
pub use simulation::Simulation;
pub use stats::{CpuSummary, RunSummary};
pub use trace::{BYTES_PER_INSTRUCTION, Trace};
