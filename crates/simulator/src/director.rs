//! The director: the barrier that moves virtual time forward.
//!
//! All machine state lives in one [`Machine`] behind one mutex. CPU workers hold the
//! lock for as long as they run and give it up only by parking, either for a number of
//! ticks or idle until something happens. Once every CPU is parked the director takes
//! the earliest pending wake tick, moves the clock there and releases everything due at
//! that tick: arriving processes are started, blocked processes are handed back to the
//! scheduler and waiting CPUs resume. Idle CPUs are released on every advance so they
//! can look for new work.
//!
//! Released CPUs run one at a time, in ascending CPU order, each until it parks again.
//! The order in which CPUs touch shared state within a tick is therefore fixed, and a
//! run is reproducible.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use vmm::{MemoryError, MemoryManager, PageNumber, ProcessId, TranslationUnit};

use crate::{
    Process, ProcessStatus, Registers, RunSummary, Scheduler, SimError,
    clock::{EventQueue, Tick, VirtualClock},
    cpu::CpuState,
    stats::CpuSummary,
};

/// Something waiting for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Waiter {
    /// A CPU spending ticks on an instruction.
    Cpu(usize),
    /// A process arriving or coming back from a block.
    Process(ProcessId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Running,
    /// Every process has completed.
    Finished,
    /// A fatal error was recorded.
    Aborted,
}

/// The whole simulated machine.
pub(crate) struct Machine {
    pub clock: VirtualClock,
    pub events: EventQueue<Waiter>,
    pub cpu_count: usize,
    /// CPUs currently parked, idle or waiting on a tick.
    pub parked: usize,
    pub idle: Vec<usize>,
    /// CPUs allowed to run, the front one running.
    pub turns: VecDeque<usize>,
    /// Processes that have not completed.
    pub live: usize,
    pub state: RunState,
    pub error: Option<SimError>,
    pub memory: MemoryManager,
    pub mmus: Vec<TranslationUnit>,
    pub cpus: Vec<CpuState>,
    pub scheduler: Box<dyn Scheduler>,
    pub processes: Vec<Process>,
    pub output: Vec<String>,
    pub use_tlb: bool,
}

pub(crate) type Guard<'a> = MutexGuard<'a, Machine>;

/// Wraps a memory manager failure with the time it happened.
pub(crate) fn fatal(time: Tick) -> impl Fn(MemoryError) -> SimError {
    move |source| SimError::Memory { time, source }
}

impl Machine {
    pub fn new(
        memory: MemoryManager,
        cpu_count: usize,
        use_tlb: bool,
        scheduler: Box<dyn Scheduler>,
        processes: Vec<Process>,
        arrivals: &[Tick],
    ) -> Self {
        let geometry = *memory.geometry();
        let mut events = EventQueue::new();
        for (process, start) in processes.iter().zip(arrivals) {
            events.schedule(*start, Waiter::Process(process.pid()));
        }
        Self {
            clock: VirtualClock::new(),
            events,
            cpu_count,
            parked: 0,
            idle: Vec::new(),
            turns: (0..cpu_count).collect(),
            live: processes.len(),
            state: RunState::Running,
            error: None,
            memory,
            mmus: (0..cpu_count)
                .map(|cpu| TranslationUnit::new(cpu, &geometry, use_tlb))
                .collect(),
            cpus: (0..cpu_count).map(|_| CpuState::default()).collect(),
            scheduler,
            processes,
            output: Vec::new(),
            use_tlb,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn process(&self, pid: ProcessId) -> &Process {
        &self.processes[pid.as_usize()]
    }

    pub fn process_mut(&mut self, pid: ProcessId) -> &mut Process {
        &mut self.processes[pid.as_usize()]
    }

    /// Records a fatal error. The first error recorded wins.
    pub fn abort(&mut self, error: SimError) {
        if self.error.is_none() {
            log::error!("Simulation aborted at time {}: {error}", self.clock.now());
            self.error = Some(error);
        }
        self.state = RunState::Aborted;
    }

    /// Moves the clock to the next pending tick and releases everything due then.
    ///
    /// Called with every CPU parked.
    fn advance(&mut self) -> Result<(), SimError> {
        if self.live == 0 {
            self.state = RunState::Finished;
            return Ok(());
        }
        let now = self.clock.now();
        let Some((tick, waiters)) = self.events.pop_next() else {
            return Err(SimError::Stalled {
                time: now,
                cpus: self.cpu_count,
                live: self.live,
            });
        };
        self.clock.advance_to(tick)?;

        let mut released = Vec::new();
        for waiter in waiters {
            match waiter {
                Waiter::Cpu(cpu) => released.push(cpu),
                Waiter::Process(pid) => self.wake_process(pid)?,
            }
        }
        released.append(&mut self.idle);
        released.sort_unstable();
        self.parked -= released.len();
        self.turns.extend(released);
        Ok(())
    }

    fn wake_process(&mut self, pid: ProcessId) -> Result<(), SimError> {
        let now = self.clock.now();
        let process = self.process_mut(pid);
        if process.is_started() {
            log::debug!("Unblocking {process} at time {now}");
            process.status = ProcessStatus::Ready;
            self.scheduler.unblocked(pid);
            Ok(())
        } else {
            self.start_process(pid)
        }
    }

    /// Creates the address space of an arriving process and loads its text.
    fn start_process(&mut self, pid: ProcessId) -> Result<(), SimError> {
        let now = self.clock.now();
        let geometry = *self.memory.geometry();
        self.memory.create_address_space(pid);
        let process = &mut self.processes[pid.as_usize()];
        let text_pages = geometry.pages_for_bytes(process.trace().text_bytes());
        let loaded = self
            .memory
            .allocate_pages(pid, PageNumber::new(0), text_pages)
            .map_err(fatal(now))?;
        if !loaded {
            log::info!(
                "Unable to start {process}: {text_pages} text pages exceed the address space"
            );
            process.status = ProcessStatus::Exited;
            process.completed_at = Some(now);
            self.memory
                .release_address_space(pid, &mut self.mmus)
                .map_err(fatal(now))?;
            self.live -= 1;
            return Ok(());
        }
        process.text_pages = text_pages;
        process.data_base = geometry.page_start(PageNumber::new(text_pages));
        process.saved = Registers::default();
        process.started_at = Some(now);
        process.status = ProcessStatus::Ready;
        log::info!("{process} started at time {now}");
        self.scheduler.process_started(pid);
        Ok(())
    }

    /// Consumes the machine after the run, producing its summary or its fatal error.
    pub fn into_summary(self) -> Result<RunSummary, SimError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let outstanding_swaps = self.memory.check_swaps();
        Ok(RunSummary {
            finished_at: self.clock.now(),
            use_tlb: self.use_tlb,
            cpus: self
                .mmus
                .iter()
                .map(|mmu| CpuSummary {
                    cpu: mmu.cpu(),
                    stats: mmu.stats(),
                })
                .collect(),
            processes: self.processes.iter().map(Process::summary).collect(),
            outstanding_swaps,
            output: self.output,
        })
    }
}

/// The machine and the two condition variables CPUs and director wait on.
pub(crate) struct Shared {
    machine: Mutex<Machine>,
    cpu_wake: Condvar,
    director_wake: Condvar,
}

impl Shared {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine: Mutex::new(machine),
            cpu_wake: Condvar::new(),
            director_wake: Condvar::new(),
        }
    }

    /// Locks the machine.
    ///
    /// A poisoned lock means a thread panicked, and [`AbortOnPanic`] has recorded that
    /// before anyone else can observe the state.
    pub fn lock(&self) -> Guard<'_> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_machine(self) -> Machine {
        self.machine
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until it is `cpu`'s turn to run or the run is over.
    pub fn wait_for_turn<'a>(&'a self, machine: Guard<'a>, cpu: usize) -> Guard<'a> {
        self.cpu_wake
            .wait_while(machine, |m| m.is_running() && m.turns.front() != Some(&cpu))
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks `cpu` until `wake`, or idle if `wake` is `None`, and waits for its next
    /// turn.
    pub fn park<'a>(&'a self, mut machine: Guard<'a>, cpu: usize, wake: Option<Tick>) -> Guard<'a> {
        match wake {
            Some(tick) => machine.events.schedule(tick, Waiter::Cpu(cpu)),
            None => machine.idle.push(cpu),
        }
        machine.parked += 1;
        if machine.turns.front() == Some(&cpu) {
            machine.turns.pop_front();
        }
        if machine.parked == machine.cpu_count {
            self.director_wake.notify_one();
        }
        self.cpu_wake.notify_all();
        self.wait_for_turn(machine, cpu)
    }

    /// Records a fatal error and wakes every thread so they can wind down.
    pub fn abort(&self, error: SimError) {
        self.lock().abort(error);
        self.cpu_wake.notify_all();
        self.director_wake.notify_all();
    }

    /// The director thread's body.
    pub fn direct(&self) {
        let _abort = AbortOnPanic {
            shared: self,
            error: SimError::DirectorPanic,
        };
        let mut machine = self.lock();
        loop {
            machine = self
                .director_wake
                .wait_while(machine, |m| m.is_running() && m.parked < m.cpu_count)
                .unwrap_or_else(PoisonError::into_inner);
            if !machine.is_running() {
                break;
            }
            if let Err(error) = machine.advance() {
                machine.abort(error);
            }
            self.cpu_wake.notify_all();
            if !machine.is_running() {
                break;
            }
        }
        drop(machine);
        self.cpu_wake.notify_all();
    }
}

/// Records an abort if the owning thread unwinds.
pub(crate) struct AbortOnPanic<'a> {
    pub shared: &'a Shared,
    pub error: SimError,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let error = std::mem::replace(&mut self.error, SimError::DirectorPanic);
            self.shared.abort(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProcessSpec, RoundRobin, Trace};
    use vmm::Geometry;

    fn machine(cpus: usize, processes: &[(Trace, Tick)]) -> Machine {
        let geometry = Geometry::new(4, 2, 4, 2, 1).unwrap();
        let specs: Vec<_> = processes
            .iter()
            .enumerate()
            .map(|(index, (trace, _))| {
                Process::new(
                    ProcessId::new(index),
                    ProcessSpec::new(format!("P{index}"), trace.clone()),
                )
            })
            .collect();
        let arrivals: Vec<_> = processes.iter().map(|(_, start)| *start).collect();
        Machine::new(
            MemoryManager::new(geometry),
            cpus,
            false,
            Box::new(RoundRobin::new()),
            specs,
            &arrivals,
        )
    }

    fn park_all(machine: &mut Machine) {
        while let Some(cpu) = machine.turns.pop_front() {
            machine.idle.push(cpu);
            machine.parked += 1;
        }
    }

    #[test]
    fn advance_starts_arrivals_and_releases_idle_cpus_in_order() {
        let mut machine = machine(2, &[(Trace::new(["Syscall_Exit"]), 3)]);
        park_all(&mut machine);
        machine.idle.reverse();
        assert_eq!(machine.idle, vec![1, 0]);

        machine.advance().unwrap();
        assert_eq!(machine.clock.now(), 3);
        assert_eq!(machine.turns, VecDeque::from([0, 1]));
        assert_eq!(machine.parked, 0);
        assert_eq!(machine.process(ProcessId::new(0)).status(), ProcessStatus::Ready);
        assert_eq!(machine.scheduler.schedule(0), Some(ProcessId::new(0)));
    }

    #[test]
    fn oversized_text_kills_the_process_at_start() {
        let long = Trace::new(vec!["NoOp"; 4 * 16 + 1]);
        let mut machine = machine(1, &[(long, 0)]);
        park_all(&mut machine);
        machine.advance().unwrap();
        assert_eq!(machine.live, 0);
        assert_eq!(machine.process(ProcessId::new(0)).status(), ProcessStatus::Exited);
        assert_eq!(machine.scheduler.schedule(0), None);

        park_all(&mut machine);
        machine.advance().unwrap();
        assert_eq!(machine.state, RunState::Finished);
    }

    #[test]
    fn nothing_pending_with_live_processes_is_a_stall() {
        let mut machine = machine(1, &[(Trace::new(["NoOp"]), 0)]);
        park_all(&mut machine);
        machine.advance().unwrap();
        machine.scheduler.schedule(0);
        park_all(&mut machine);
        assert!(matches!(
            machine.advance(),
            Err(SimError::Stalled { live: 1, .. })
        ));
    }

    #[test]
    fn events_before_now_are_a_time_warp() {
        let mut machine = machine(1, &[(Trace::new(["NoOp"]), 5)]);
        park_all(&mut machine);
        machine.advance().unwrap();
        machine.events.schedule(2, Waiter::Cpu(0));
        assert!(matches!(
            machine.advance(),
            Err(SimError::TimeWarp { now: 5, tick: 2 })
        ));
    }
}
