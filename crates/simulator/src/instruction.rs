//! The trace instruction set.
//!
//! Every instruction occupies four bytes of text. Register operands and immediates of
//! the register instructions are hexadecimal; branch offsets and block durations are
//! decimal. Indirect loads and stores address data relative to the first data page of
//! the process.
//!
//! | text                   | effect                                                    |
//! |------------------------|-----------------------------------------------------------|
//! | `Syscall_Exit`         | terminates the process                                    |
//! | `NoOp`                 | nothing                                                   |
//! | `branch_uc n`          | jumps `n` instructions from the current one               |
//! | `branch_eq n`          | jumps `n` instructions if reg0 == reg1                    |
//! | `printReg0`            | prints reg0                                               |
//! | `printStr text`        | prints `text`                                             |
//! | `incrReg0 h`           | reg0 += h                                                 |
//! | `loadReg0Immediate h`  | reg0 = h                                                  |
//! | `loadReg0PageAddr h`   | reg0 = virtual address of data-relative page h            |
//! | `loadReg0Indirect r`   | reg0 = word at data address reg r                         |
//! | `storeReg0Indirect r`  | word at data address reg r = reg0                         |
//! | `Syscall_Alloc`        | allocates data pages reg0 up to (not including) reg1      |
//! | `Syscall_Block n`      | gives up the CPU for `n` ticks                            |
//!
//! The `Reg1` forms work the same way on reg1.

use core::fmt;

use vmm::{MemoryError, MemoryManager, PageNumber, PhysicalAddress, ProcessId, VirtualAddress};

use crate::trace::BYTES_PER_INSTRUCTION;

/// One of the two general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    R0,
    R1,
}

impl Register {
    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::R0),
            1 => Some(Self::R1),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::R0 => 0,
            Self::R1 => 1,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Architectural state of a CPU, saved with a process while it is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub ip: VirtualAddress,
    pub reg: [i32; 2],
}

impl Registers {
    pub fn get(&self, register: Register) -> i32 {
        self.reg[register.index()]
    }

    pub fn set(&mut self, register: Register, value: i32) {
        self.reg[register.index()] = value;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Exit,
    NoOp,
    Branch(i32),
    BranchEq(i32),
    PrintReg(Register),
    PrintStr(String),
    Incr(Register, i32),
    LoadImmediate(Register, i32),
    /// Loads the virtual address of a data-relative page.
    LoadPageAddr(Register, i32),
    LoadIndirect { dst: Register, addr: Register },
    StoreIndirect { src: Register, addr: Register },
    Alloc,
    Block(u32),
    Invalid(String),
}

/// A process-fatal event raised by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Exit,
    InvalidInstruction,
    AllocationFailure,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exit => "Exit System Call",
            Self::InvalidInstruction => "Invalid Instruction",
            Self::AllocationFailure => "Allocation Failure",
        })
    }
}

/// What the CPU does after an instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Continue at the given instruction pointer.
    Next(VirtualAddress),
    /// End the burst and block the process for `ticks`, resuming at `next`.
    Block { next: VirtualAddress, ticks: u32 },
    /// Terminate the process.
    Signal(Signal),
}

/// Everything an instruction may read or modify while executing.
pub struct ExecContext<'a> {
    pub cpu: usize,
    pub pid: ProcessId,
    pub regs: &'a mut Registers,
    /// Physical address of the data operand, for instructions that have one.
    pub data: Option<PhysicalAddress>,
    /// Virtual address of the first data page.
    pub data_base: VirtualAddress,
    pub memory: &'a mut MemoryManager,
    /// Lines printed by the program.
    pub output: &'a mut Vec<String>,
}

impl Instruction {
    /// Decodes one trace token. Unknown or malformed text decodes to
    /// [`Instruction::Invalid`].
    pub fn decode(text: &str) -> Self {
        let text = text.trim();
        let (mnemonic, arg) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, arg)) => (mnemonic, Some(arg.trim())),
            None => (text, None),
        };
        let decoded = match (mnemonic, arg) {
            (m, None) if m.eq_ignore_ascii_case("Syscall_Exit") => Some(Self::Exit),
            (m, None) if m.eq_ignore_ascii_case("NoOp") => Some(Self::NoOp),
            (m, None) if m.eq_ignore_ascii_case("Syscall_Alloc") => Some(Self::Alloc),
            (m, None) if m.eq_ignore_ascii_case("printReg0") => Some(Self::PrintReg(Register::R0)),
            (m, None) if m.eq_ignore_ascii_case("printReg1") => Some(Self::PrintReg(Register::R1)),
            ("printStr", arg) => Some(Self::PrintStr(arg.unwrap_or_default().to_owned())),
            ("branch_uc", Some(arg)) => decimal(arg).map(Self::Branch),
            ("branch_eq", Some(arg)) => decimal(arg).map(Self::BranchEq),
            ("Syscall_Block", Some(arg)) => arg
                .parse::<u32>()
                .ok()
                .filter(|ticks| *ticks > 0)
                .map(Self::Block),
            ("incrReg0", Some(arg)) => hex(arg).map(|v| Self::Incr(Register::R0, v)),
            ("incrReg1", Some(arg)) => hex(arg).map(|v| Self::Incr(Register::R1, v)),
            ("loadReg0Immediate", Some(arg)) => {
                hex(arg).map(|v| Self::LoadImmediate(Register::R0, v))
            }
            ("loadReg1Immediate", Some(arg)) => {
                hex(arg).map(|v| Self::LoadImmediate(Register::R1, v))
            }
            ("loadReg0PageAddr", Some(arg)) => {
                hex(arg).map(|v| Self::LoadPageAddr(Register::R0, v))
            }
            ("loadReg1PageAddr", Some(arg)) => {
                hex(arg).map(|v| Self::LoadPageAddr(Register::R1, v))
            }
            ("loadReg0Indirect", Some(arg)) => register(arg).map(|addr| Self::LoadIndirect {
                dst: Register::R0,
                addr,
            }),
            ("loadReg1Indirect", Some(arg)) => register(arg).map(|addr| Self::LoadIndirect {
                dst: Register::R1,
                addr,
            }),
            ("storeReg0Indirect", Some(arg)) => register(arg).map(|addr| Self::StoreIndirect {
                src: Register::R0,
                addr,
            }),
            ("storeReg1Indirect", Some(arg)) => register(arg).map(|addr| Self::StoreIndirect {
                src: Register::R1,
                addr,
            }),
            _ => None,
        };
        decoded.unwrap_or_else(|| Self::Invalid(text.to_owned()))
    }

    /// The virtual address of the data operand, for loads and stores.
    pub fn data_address(&self, regs: &Registers, data_base: VirtualAddress) -> Option<VirtualAddress> {
        let addr = match self {
            Self::LoadIndirect { addr, .. } | Self::StoreIndirect { addr, .. } => *addr,
            _ => return None,
        };
        let base = i64::try_from(data_base.as_u64()).unwrap_or(i64::MAX);
        Some(VirtualAddress::from_signed(
            i64::from(regs.get(addr)).saturating_add(base),
        ))
    }

    pub fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<Outcome, MemoryError> {
        let ip = ctx.regs.ip;
        let next = ip + BYTES_PER_INSTRUCTION;
        let outcome = match self {
            Self::Exit => {
                self.trace("");
                Outcome::Signal(Signal::Exit)
            }
            Self::Invalid(_) => Outcome::Signal(Signal::InvalidInstruction),
            Self::NoOp => {
                self.trace("");
                Outcome::Next(next)
            }
            Self::Branch(offset) => {
                let target = branch_target(ip, *offset);
                self.trace(format_args!(
                    "Branch to instruction offset {offset}. IP was {ip}, now {target}"
                ));
                Outcome::Next(target)
            }
            Self::BranchEq(offset) => {
                let [r0, r1] = ctx.regs.reg;
                let target = if r0 == r1 {
                    branch_target(ip, *offset)
                } else {
                    next
                };
                self.trace(format_args!(
                    "BranchEq Reg0={r0:#X} Reg1={r1:#X} instruction offset {offset}. New ip {target}"
                ));
                Outcome::Next(target)
            }
            Self::PrintReg(register) => {
                self.trace("");
                let line = format!("[PrintReg {register}]  {:#010X}", ctx.regs.get(*register));
                log::info!("{line}");
                ctx.output.push(line);
                Outcome::Next(next)
            }
            Self::PrintStr(text) => {
                self.trace("");
                let line = format!("[PrintString] {text}");
                log::info!("{line}");
                ctx.output.push(line);
                Outcome::Next(next)
            }
            Self::Incr(register, amount) => {
                let old = ctx.regs.get(*register);
                let new = old.wrapping_add(*amount);
                ctx.regs.set(*register, new);
                self.trace(format_args!(
                    "'Reg{register} += {amount:#X}' Reg{register} was {old:#X}, now {new:#X}"
                ));
                Outcome::Next(next)
            }
            Self::LoadImmediate(register, value) => {
                ctx.regs.set(*register, *value);
                self.trace(format_args!("'Reg{register} = {value:#X}'"));
                Outcome::Next(next)
            }
            Self::LoadPageAddr(register, page) => {
                let value = page_address(ctx.memory, *page);
                ctx.regs.set(*register, value);
                self.trace(format_args!("'Reg{register} = {value:#X}'"));
                Outcome::Next(next)
            }
            Self::LoadIndirect { dst, .. } => {
                let Some(paddr) = ctx.data else {
                    return Ok(Outcome::Signal(Signal::InvalidInstruction));
                };
                let old = ctx.regs.get(*dst);
                let value = ctx.memory.load_word(paddr);
                ctx.regs.set(*dst, value);
                self.trace(format_args!(
                    "'Reg{dst} = *(pa){paddr}' Reg{dst} was {old:#X}, now {value:#X}"
                ));
                Outcome::Next(next)
            }
            Self::StoreIndirect { src, .. } => {
                let Some(paddr) = ctx.data else {
                    return Ok(Outcome::Signal(Signal::InvalidInstruction));
                };
                let old = ctx.memory.load_word(paddr);
                let value = ctx.regs.get(*src);
                ctx.memory.store_word(paddr, value);
                self.trace(format_args!(
                    "'*(pa){paddr} = Reg{src}' *(pa){paddr} was {old:#X}, now {value:#X}"
                ));
                Outcome::Next(next)
            }
            Self::Alloc => {
                let [from, until] = ctx.regs.reg;
                self.trace(format_args!(
                    "SyscallAlloc start page {from:#X} for {:#X} pages",
                    until.wrapping_sub(from)
                ));
                if allocate(ctx, from, until)? {
                    Outcome::Next(next)
                } else {
                    Outcome::Signal(Signal::AllocationFailure)
                }
            }
            Self::Block(ticks) => {
                self.trace(format_args!("Blocking for {ticks} ticks"));
                Outcome::Block {
                    next,
                    ticks: *ticks,
                }
            }
        };
        Ok(outcome)
    }

    fn trace(&self, detail: impl fmt::Display) {
        log::debug!("*** ({self}) {detail}");
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit => write!(f, "Syscall_Exit"),
            Self::NoOp => write!(f, "NoOp"),
            Self::Branch(offset) => write!(f, "branch_uc {offset}"),
            Self::BranchEq(offset) => write!(f, "branch_eq {offset}"),
            Self::PrintReg(register) => write!(f, "printReg{register}"),
            Self::PrintStr(text) => write!(f, "printStr {text}"),
            Self::Incr(register, value) => write!(f, "incrReg{register} {}", signed_hex(*value)),
            Self::LoadImmediate(register, value) => {
                write!(f, "loadReg{register}Immediate {}", signed_hex(*value))
            }
            Self::LoadPageAddr(register, page) => {
                write!(f, "loadReg{register}PageAddr {}", signed_hex(*page))
            }
            Self::LoadIndirect { dst, addr } => write!(f, "loadReg{dst}Indirect {addr}"),
            Self::StoreIndirect { src, addr } => write!(f, "storeReg{src}Indirect {addr}"),
            Self::Alloc => write!(f, "Syscall_Alloc"),
            Self::Block(ticks) => write!(f, "Syscall_Block {ticks}"),
            Self::Invalid(text) => f.write_str(text),
        }
    }
}

fn signed_hex(value: i32) -> String {
    if value < 0 {
        format!("-{:x}", value.unsigned_abs())
    } else {
        format!("{value:x}")
    }
}

fn decimal(arg: &str) -> Option<i32> {
    arg.parse().ok()
}

/// Parses a hexadecimal operand with an optional sign and no prefix.
fn hex(arg: &str) -> Option<i32> {
    let (negative, digits) = match arg.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, arg.strip_prefix('+').unwrap_or(arg)),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, 16).ok()?;
    i32::try_from(if negative { -magnitude } else { magnitude }).ok()
}

fn register(arg: &str) -> Option<Register> {
    hex(arg).and_then(|index| Register::from_index(i64::from(index)))
}

fn branch_target(ip: VirtualAddress, offset: i32) -> VirtualAddress {
    ip.offset(i64::from(offset) * BYTES_PER_INSTRUCTION as i64)
}

/// The register value naming the first byte of a page, truncated to 32 bits.
fn page_address(memory: &MemoryManager, page: i32) -> i32 {
    let shift = memory.geometry().page_size_log2();
    (i64::from(page) << shift) as i32
}

/// Allocates data-relative pages `from..until`. Returns `Ok(false)` if the request is
/// malformed or does not fit.
fn allocate(ctx: &mut ExecContext<'_>, from: i32, until: i32) -> Result<bool, MemoryError> {
    let (Ok(start), Ok(end)) = (usize::try_from(from), usize::try_from(until)) else {
        log::info!(
            "Invalid allocation request from process {}: pages {from} to {until}",
            ctx.pid
        );
        return Ok(false);
    };
    let Some(count) = end.checked_sub(start) else {
        log::info!(
            "Invalid allocation request from process {}: pages {from} to {until}",
            ctx.pid
        );
        return Ok(false);
    };
    let first_data_page = ctx.memory.geometry().page_of(ctx.data_base);
    let Some(start) = first_data_page.as_usize().checked_add(start) else {
        return Ok(false);
    };
    ctx.memory
        .allocate_pages(ctx.pid, PageNumber::new(start), count)
}
