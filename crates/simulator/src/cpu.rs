//! The CPU worker loop.
//!
//! Each simulated CPU runs on its own thread. When it has the turn it asks the
//! scheduler for a process and runs it instruction by instruction:
//!
//! 1. End the burst if the quantum is used up.
//! 2. Translate the instruction pointer. A fault is resolved and the instruction
//!    restarted, or the process is terminated if the address is illegal.
//! 3. Decode the instruction and translate its data address, if it has one, the same
//!    way.
//! 4. Spend one tick. The CPU parks until the director reaches the next tick. Other
//!    CPUs run meanwhile and may steal the frames just translated, so on waking they
//!    are checked and, if gone, faulted back in before executing. The tick is not
//!    spent again.
//! 5. Execute. Signals terminate the process, a block ends the burst.

use vmm::{
    Access, FaultResolution, FrameNumber, PhysicalAddress, ProcessId, VirtualAddress, Violation,
};

use crate::{
    ExecContext, Instruction, Outcome, ProcessStatus, Registers, Signal, SimError,
    director::{AbortOnPanic, Guard, Machine, Shared, Waiter, fatal},
};

/// Faults one instruction may take before its pages are declared impossible to hold.
const MAX_RESTARTS: u32 = 8;

/// Per-CPU architectural state.
#[derive(Debug, Default)]
pub(crate) struct CpuState {
    pub regs: Registers,
    pub current: Option<ProcessId>,
}

/// The worker thread's body.
pub(crate) fn run(shared: &Shared, cpu: usize) {
    let _abort = AbortOnPanic {
        shared,
        error: SimError::WorkerPanic(cpu),
    };
    let machine = shared.wait_for_turn(shared.lock(), cpu);
    if let Err(error) = work(shared, machine, cpu) {
        shared.abort(error);
    }
}

fn work<'a>(shared: &'a Shared, mut machine: Guard<'a>, cpu: usize) -> Result<(), SimError> {
    while machine.is_running() {
        let Some(pid) = machine.scheduler.schedule(cpu) else {
            log::debug!("CPU {cpu} idle at time {}", machine.clock.now());
            machine = shared.park(machine, cpu, None);
            continue;
        };
        let status = machine.process(pid).status();
        if status != ProcessStatus::Ready {
            return Err(SimError::NotReady {
                time: machine.clock.now(),
                cpu,
                pid,
                status,
            });
        }
        machine = run_burst(shared, machine, cpu, pid)?;
    }
    Ok(())
}

/// Translates an address, resolving a fault if there is one.
enum Fetch {
    Ready(FrameNumber),
    /// The fault was resolved; restart the instruction.
    Restart,
    /// The process was terminated.
    Terminated,
}

/// The frames an instruction was translated to.
#[derive(Debug, Clone, Copy)]
struct Frames {
    instruction: FrameNumber,
    data: Option<(VirtualAddress, FrameNumber)>,
}

enum Resolve {
    Ready(Frames),
    Terminated,
}

fn run_burst<'a>(
    shared: &'a Shared,
    mut machine: Guard<'a>,
    cpu: usize,
    pid: ProcessId,
) -> Result<Guard<'a>, SimError> {
    machine.dispatch(cpu, pid);
    let quantum = machine.process(pid).quantum();
    let mut burst = 0u32;
    loop {
        if burst >= quantum {
            machine.expire_quantum(cpu, pid, burst);
            return Ok(machine);
        }

        let ip = machine.cpus[cpu].regs.ip;
        let index = usize::try_from(ip.as_u64() / crate::trace::BYTES_PER_INSTRUCTION)
            .unwrap_or(usize::MAX);
        let text = machine.process(pid).trace().get(index).into_owned();
        let instruction = Instruction::decode(&text);

        let Resolve::Ready(frames) = machine.resolve(cpu, pid, &instruction, burst)? else {
            return Ok(machine);
        };

        let wake = machine.clock.now() + 1;
        machine = shared.park(machine, cpu, Some(wake));
        if !machine.is_running() {
            return Ok(machine);
        }
        machine.process_mut(pid).executed_ticks += 1;
        burst += 1;

        let frames = if machine.still_holds(pid, ip, frames) {
            frames
        } else {
            log::debug!(
                "Frames of {} were stolen while CPU {cpu} waited for time {}",
                machine.process(pid),
                machine.clock.now()
            );
            match machine.resolve(cpu, pid, &instruction, burst)? {
                Resolve::Ready(frames) => frames,
                Resolve::Terminated => return Ok(machine),
            }
        };
        let i_paddr = machine.memory.physical_address(frames.instruction, ip);
        let data = frames
            .data
            .map(|(vaddr, frame)| machine.memory.physical_address(frame, vaddr));
        let data_base = machine.process(pid).data_base;

        log::debug!(
            "CPU {cpu} executing '{text}' for process {pid} at ip va/pa {ip}/{i_paddr}"
        );
        let now = machine.clock.now();
        let outcome = {
            let m = &mut *machine;
            let mut ctx = ExecContext {
                cpu,
                pid,
                regs: &mut m.cpus[cpu].regs,
                data,
                data_base,
                memory: &mut m.memory,
                output: &mut m.output,
            };
            instruction.execute(&mut ctx).map_err(fatal(now))?
        };
        match outcome {
            Outcome::Next(next) => machine.cpus[cpu].regs.ip = next,
            Outcome::Block { next, ticks } => {
                machine.cpus[cpu].regs.ip = next;
                machine.block(cpu, pid, burst, ticks);
                return Ok(machine);
            }
            Outcome::Signal(signal) => {
                match signal {
                    Signal::Exit => {}
                    Signal::InvalidInstruction => log::info!(
                        "Invalid instruction: '{text}' in process {pid} at vaddr {ip}"
                    ),
                    Signal::AllocationFailure => log::info!(
                        "Allocation failure in {} at vaddr {ip}",
                        machine.process(pid)
                    ),
                }
                machine.exit_process(cpu, pid, burst)?;
                return Ok(machine);
            }
        }
    }
}

fn describe(violation: Violation) -> String {
    match violation {
        Violation::IllegalFetch { page } => format!("page {page} is outside the text segment"),
        Violation::OutOfRange { page } => format!("page {page} is beyond the address space"),
        Violation::Unallocated { page } => format!("page {page} was never allocated"),
    }
}

impl Machine {
    fn dispatch(&mut self, cpu: usize, pid: ProcessId) {
        let now = self.clock.now();
        let process = &mut self.processes[pid.as_usize()];
        process.status = ProcessStatus::Running { cpu };
        process.dispatches += 1;
        self.cpus[cpu].regs = process.saved;
        self.cpus[cpu].current = Some(pid);
        self.mmus[cpu].dispatch(pid);
        log::debug!(
            "Dispatching {process} at time {now} with quantum {}.",
            process.quantum()
        );
    }

    /// Saves the CPU state into the process and folds TLB references into the frame
    /// table.
    fn undispatch(&mut self, cpu: usize, pid: ProcessId, burst: u32) {
        let process = &mut self.processes[pid.as_usize()];
        process.saved = self.cpus[cpu].regs;
        process.end_burst(burst);
        self.cpus[cpu].current = None;
        self.memory.flush_references(&self.mmus[cpu]);
    }

    fn expire_quantum(&mut self, cpu: usize, pid: ProcessId, burst: u32) {
        let now = self.clock.now();
        log::debug!(
            "Quantum expired for {} at time {now} after {burst} ticks.",
            self.process(pid)
        );
        self.undispatch(cpu, pid, burst);
        self.process_mut(pid).status = ProcessStatus::Ready;
        self.scheduler.quantum_expired(pid, cpu, burst);
    }

    fn block(&mut self, cpu: usize, pid: ProcessId, burst: u32, ticks: u32) {
        let now = self.clock.now();
        log::debug!(
            "Burst completed for {} at time {now} after {burst} ticks.",
            self.process(pid)
        );
        self.undispatch(cpu, pid, burst);
        self.process_mut(pid).status = ProcessStatus::Blocked;
        self.scheduler.process_blocked(pid, cpu, burst);
        self.events
            .schedule(now + u64::from(ticks), Waiter::Process(pid));
    }

    fn exit_process(&mut self, cpu: usize, pid: ProcessId, burst: u32) -> Result<(), SimError> {
        let now = self.clock.now();
        self.memory.check_page_table(pid);
        self.undispatch(cpu, pid, burst);
        self.memory
            .release_address_space(pid, &mut self.mmus)
            .map_err(fatal(now))?;
        self.scheduler.process_exited(pid);
        self.live -= 1;

        let process = &mut self.processes[pid.as_usize()];
        process.status = ProcessStatus::Exited;
        process.completed_at = Some(now);
        log::info!("{process} completed at time {now}");
        log::debug!(
            "{process} started at time {}, completed at time {now}, used {} ticks, and required {} dispatches.",
            process.started_at.unwrap_or_default(),
            process.executed_ticks,
            process.dispatches
        );
        Ok(())
    }

    /// Translates the instruction pointer and the instruction's data address,
    /// faulting pages in until both are resident together.
    fn resolve(
        &mut self,
        cpu: usize,
        pid: ProcessId,
        instruction: &Instruction,
        burst: u32,
    ) -> Result<Resolve, SimError> {
        let text_pages = self.process(pid).text_pages;
        let data_base = self.process(pid).data_base;
        let ip = self.cpus[cpu].regs.ip;
        let mut restarts = 0;
        loop {
            if restarts > MAX_RESTARTS {
                return Err(SimError::Thrashing {
                    time: self.clock.now(),
                    pid,
                    addr: ip,
                    frames: self.memory.geometry().frame_count(),
                });
            }

            log::debug!("CPU {cpu} translating instruction address {ip} for process {pid}");
            let instruction_frame =
                match self.fetch(cpu, pid, ip, Access::Instruction { text_pages }, burst)? {
                    Fetch::Ready(frame) => frame,
                    Fetch::Restart => {
                        restarts += 1;
                        continue;
                    }
                    Fetch::Terminated => return Ok(Resolve::Terminated),
                };
            log::debug!(
                "CPU {cpu} fetching instruction from physical address {}",
                self.memory.physical_address(instruction_frame, ip)
            );

            let mut data = None;
            if let Some(vaddr) = instruction.data_address(&self.cpus[cpu].regs, data_base) {
                log::debug!("CPU {cpu} translating data address {vaddr} for process {pid}");
                match self.fetch(cpu, pid, vaddr, Access::Data, burst)? {
                    Fetch::Ready(frame) => data = Some((vaddr, frame)),
                    Fetch::Restart => {
                        restarts += 1;
                        continue;
                    }
                    Fetch::Terminated => return Ok(Resolve::Terminated),
                }
            }
            return Ok(Resolve::Ready(Frames {
                instruction: instruction_frame,
                data,
            }));
        }
    }

    /// Whether the frames translated before a tick still hold the process's pages.
    fn still_holds(&self, pid: ProcessId, ip: VirtualAddress, frames: Frames) -> bool {
        self.memory.holds(pid, ip, frames.instruction)
            && frames
                .data
                .is_none_or(|(vaddr, frame)| self.memory.holds(pid, vaddr, frame))
    }

    /// Translates `addr`, handling a miss.
    fn fetch(
        &mut self,
        cpu: usize,
        pid: ProcessId,
        addr: VirtualAddress,
        access: Access,
        burst: u32,
    ) -> Result<Fetch, SimError> {
        if let Some(frame) = self.memory.translate(&mut self.mmus[cpu], pid, addr) {
            return Ok(Fetch::Ready(frame));
        }

        let now = self.clock.now();
        let (kind, page) = (kind(access), self.memory.geometry().page_of(addr));
        let process = &mut self.processes[pid.as_usize()];
        match access {
            Access::Instruction { .. } => process.instruction_faults += 1,
            Access::Data => process.data_faults += 1,
        }
        log::debug!("{kind} page fault at {addr} in {process} (page number {page})");

        let resolution = self
            .memory
            .handle_fault(pid, addr, access, &mut self.mmus)
            .map_err(fatal(now))?;
        match resolution {
            FaultResolution::Resolved(_) => {
                let Some(frame) = self.memory.translate(&mut self.mmus[cpu], pid, addr) else {
                    return Err(SimError::RecursiveTranslation { kind, pid, addr });
                };
                let paddr: PhysicalAddress = self.memory.physical_address(frame, addr);
                let process = self.process(pid);
                match access {
                    Access::Instruction { .. } => log::info!(
                        "Instruction fault for {process} at ip {addr} resolved to physical address {paddr}"
                    ),
                    Access::Data => log::info!(
                        "Data fault for {process} at address {addr} resolved to physical address {paddr}. Refetching instruction."
                    ),
                }
                Ok(Fetch::Restart)
            }
            FaultResolution::Violation(violation) => {
                log::info!(
                    "Invalid {kind} address for {} at {addr}: {}. Segmentation fault.",
                    self.process(pid),
                    describe(violation)
                );
                self.exit_process(cpu, pid, burst)?;
                Ok(Fetch::Terminated)
            }
        }
    }
}

fn kind(access: Access) -> &'static str {
    match access {
        Access::Instruction { .. } => "instruction",
        Access::Data => "data",
    }
}
