//! Running a configured machine to completion.

use std::thread;

use vmm::{MemoryManager, ProcessId};

use crate::{
    Process, RoundRobin, RunSummary, Scheduler, SimConfig, SimError, cpu,
    director::{Machine, Shared},
};

/// Traces shorter than this are logged when the simulation is built.
const LOGGED_TRACE_LIMIT: usize = 100;

pub struct Simulation {
    shared: Shared,
    cpu_count: usize,
}

impl Simulation {
    /// Builds a simulation scheduled round robin.
    pub fn new(config: SimConfig) -> Self {
        Self::with_scheduler(config, Box::new(RoundRobin::new()))
    }

    pub fn with_scheduler(config: SimConfig, scheduler: Box<dyn Scheduler>) -> Self {
        let SimConfig {
            geometry,
            cpus,
            use_tlb,
            processes: specs,
        } = config;
        log::debug!("Geometry: {geometry}");

        let arrivals: Vec<_> = specs.iter().map(|spec| spec.start).collect();
        let processes: Vec<_> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Process::new(ProcessId::new(index), spec))
            .collect();
        for process in &processes {
            let trace = process.trace();
            if trace.len() < LOGGED_TRACE_LIMIT {
                log::debug!(
                    "Trace for {process}: [{}]",
                    trace.iter().collect::<Vec<_>>().join(", ")
                );
            }
        }

        let machine = Machine::new(
            MemoryManager::new(geometry),
            cpus,
            use_tlb,
            scheduler,
            processes,
            &arrivals,
        );
        Self {
            shared: Shared::new(machine),
            cpu_count: cpus,
        }
    }

    /// Runs every process to completion on one thread per CPU plus the director.
    pub fn run(self) -> Result<RunSummary, SimError> {
        let shared = &self.shared;
        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.cpu_count);
            for id in 0..self.cpu_count {
                let name = format!("CPU {id}");
                match thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || cpu::run(shared, id))
                {
                    Ok(handle) => workers.push((id, handle)),
                    Err(source) => {
                        shared.abort(SimError::Spawn { name, source });
                        break;
                    }
                }
            }

            match thread::Builder::new()
                .name("director".into())
                .spawn_scoped(scope, || shared.direct())
            {
                Ok(handle) => {
                    if handle.join().is_err() {
                        shared.abort(SimError::DirectorPanic);
                    }
                }
                Err(source) => shared.abort(SimError::Spawn {
                    name: "director".into(),
                    source,
                }),
            }

            for (id, handle) in workers {
                if handle.join().is_err() {
                    shared.abort(SimError::WorkerPanic(id));
                }
            }
        });

        let summary = self.shared.into_machine().into_summary()?;
        summary.log();
        Ok(summary)
    }
}
