//! Architecture-neutral view of a stopped thread's registers.
//!
//! Each supported architecture implements [`SyscallRegisters`] for its raw register set
//! and provides a way to read it. Everything outside this module and the per-arch modules
//! only sees a [`RegisterSnapshot`].

pub use nix::unistd::Pid;

use crate::error::Result;

#[cfg(target_arch = "aarch64")]
use crate::aarch64;

#[cfg(target_arch = "x86_64")]
use crate::x86;

/// System call number, in the numbering of the build architecture.
pub type SyscallNr = u64;

/// Maximum number of arguments to a Linux system call.
pub const MAX_SYSCALL_ARGS: usize = 6;

/// Register state of a tracee, as laid out by the kernel.
#[cfg(target_arch = "x86_64")]
pub type Registers = libc::user_regs_struct;

/// Register state of a tracee, as laid out by the kernel.
#[cfg(target_arch = "aarch64")]
pub type Registers = aarch64::user_pt_regs;

/// Accessors for the syscall-related slots of a raw register set.
pub trait SyscallRegisters {
    /// Number of the in-flight syscall, or `None` if the thread is not in a syscall.
    fn syscall_nr(&self) -> Option<SyscallNr>;

    /// The six argument registers, in ABI order.
    fn syscall_args(&self) -> [u64; MAX_SYSCALL_ARGS];

    /// Return-value register. Only meaningful at a syscall-exit-stop.
    fn return_value(&self) -> i64;

    fn instruction_pointer(&self) -> u64;

    fn frame_pointer(&self) -> u64;
}

/// Which half of a syscall a syscall-stop is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyscallPhase {
    Entry,
    Exit,
}

/// Registers of one thread at one syscall-stop.
///
/// A snapshot describes the instant it was read. The kernel overwrites the underlying
/// state when the thread is resumed, so a snapshot must never outlive the stop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterSnapshot {
    tid: Pid,
    nr: Option<SyscallNr>,
    phase: SyscallPhase,
    args: [u64; MAX_SYSCALL_ARGS],
    return_value: i64,
    instruction_pointer: u64,
    frame_pointer: u64,
}

impl RegisterSnapshot {
    pub fn capture(tid: Pid, regs: &impl SyscallRegisters, phase: SyscallPhase) -> Self {
        Self {
            tid,
            nr: regs.syscall_nr(),
            phase,
            args: regs.syscall_args(),
            return_value: regs.return_value(),
            instruction_pointer: regs.instruction_pointer(),
            frame_pointer: regs.frame_pointer(),
        }
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }

    pub fn syscall_nr(&self) -> Option<SyscallNr> {
        self.nr
    }

    pub fn phase(&self) -> SyscallPhase {
        self.phase
    }

    pub fn is_entry(&self) -> bool {
        self.phase == SyscallPhase::Entry
    }

    /// Raw value of argument register `index`, or `None` past the sixth.
    pub fn arg(&self, index: usize) -> Option<u64> {
        self.args.get(index).copied()
    }

    pub fn return_value(&self) -> i64 {
        self.return_value
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.instruction_pointer
    }

    pub fn frame_pointer(&self) -> u64 {
        self.frame_pointer
    }
}

/// Read the registers of the stopped thread `tid`.
///
/// Fails with [`Error::TraceeDied`](crate::Error::TraceeDied) if the thread no longer
/// exists; callers treat that exactly like a termination event.
pub fn read_registers(tid: Pid) -> Result<RegisterSnapshot> {
    #[cfg(target_arch = "x86_64")]
    {
        x86::read_snapshot(tid)
    }

    #[cfg(target_arch = "aarch64")]
    {
        aarch64::read_snapshot(tid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake;

    impl SyscallRegisters for Fake {
        fn syscall_nr(&self) -> Option<SyscallNr> {
            Some(1)
        }

        fn syscall_args(&self) -> [u64; MAX_SYSCALL_ARGS] {
            [1, 0x1000, 5, 0, 0, 0]
        }

        fn return_value(&self) -> i64 {
            -38
        }

        fn instruction_pointer(&self) -> u64 {
            0x401000
        }

        fn frame_pointer(&self) -> u64 {
            0x7ffd_0000
        }
    }

    #[test]
    fn test_capture_copies_syscall_slots() {
        let tid = Pid::from_raw(42);
        let snapshot = RegisterSnapshot::capture(tid, &Fake, SyscallPhase::Entry);

        assert_eq!(snapshot.tid(), tid);
        assert_eq!(snapshot.syscall_nr(), Some(1));
        assert!(snapshot.is_entry());
        assert_eq!(snapshot.arg(1), Some(0x1000));
        assert_eq!(snapshot.arg(2), Some(5));
        assert_eq!(snapshot.arg(6), None);
        assert_eq!(snapshot.return_value(), -38);
        assert_eq!(snapshot.instruction_pointer(), 0x401000);
    }
}
