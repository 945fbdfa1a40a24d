//! End of run statistics.

use vmm::TranslationStats;

use crate::{ProcessSummary, clock::Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSummary {
    pub cpu: usize,
    pub stats: TranslationStats,
}

/// The results of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Virtual time at which the last process completed.
    pub finished_at: Tick,
    pub use_tlb: bool,
    pub cpus: Vec<CpuSummary>,
    pub processes: Vec<ProcessSummary>,
    /// Page images still in the swap store after every process exited.
    pub outstanding_swaps: usize,
    /// Lines printed by `printReg` and `printStr`, in execution order.
    pub output: Vec<String>,
}

impl RunSummary {
    /// Translation counters summed over every CPU.
    pub fn totals(&self) -> TranslationStats {
        self.cpus
            .iter()
            .fold(TranslationStats::default(), |mut total, cpu| {
                total.hits += cpu.stats.hits;
                total.faults += cpu.stats.faults;
                total.invalidates += cpu.stats.invalidates;
                total.load_cleans += cpu.stats.load_cleans;
                total.load_steals += cpu.stats.load_steals;
                total
            })
    }

    pub fn process(&self, name: &str) -> Option<&ProcessSummary> {
        self.processes.iter().find(|process| process.name == name)
    }

    /// Writes the summary to the log.
    pub fn log(&self) {
        log::info!("Finished at time {}", self.finished_at);
        for process in &self.processes {
            match (process.started_at, process.completed_at) {
                (Some(started), Some(completed)) => log::info!(
                    "Process {}({}): started at {started}, completed at {completed}, {} ticks, {} dispatches, {} instruction faults, {} data faults",
                    process.name,
                    process.pid,
                    process.executed_ticks,
                    process.dispatches,
                    process.instruction_faults,
                    process.data_faults
                ),
                _ => log::info!("Process {}({}) never ran", process.name, process.pid),
            }
        }
        for cpu in &self.cpus {
            let stats = cpu.stats;
            log::info!("Statistics for CPU {}", cpu.cpu);
            if self.use_tlb {
                log::info!(
                    "     Hits: {}. Load Cleans: {}. Load Steals: {}. Faults: {}. Invalidates: {}.",
                    stats.hits,
                    stats.load_cleans,
                    stats.load_steals,
                    stats.faults,
                    stats.invalidates
                );
            } else {
                log::info!(
                    "     Hits: {}. Faults: {}. Invalidates: {}.",
                    stats.hits,
                    stats.faults,
                    stats.invalidates
                );
            }
        }
    }
}
