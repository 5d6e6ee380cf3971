use nix::sys::ptrace;

use crate::error::{Result, ResultExt};
use crate::registers::{
    Pid,
    RegisterSnapshot,
    Registers,
    SyscallNr,
    SyscallPhase,
    SyscallRegisters,
    MAX_SYSCALL_ARGS,
};

/// `orig_rax` value of a thread that is not inside a syscall.
const NO_SYSCALL: i64 = -1;

/// The kernel loads `-ENOSYS` into `rax` before dispatching a syscall, so it is the
/// value seen at every syscall-entry-stop.
const RAX_AT_ENTRY: i64 = -(libc::ENOSYS as i64);

impl SyscallRegisters for Registers {
    fn syscall_nr(&self) -> Option<SyscallNr> {
        if self.orig_rax as i64 == NO_SYSCALL {
            None
        } else {
            Some(self.orig_rax)
        }
    }

    // Syscall args are passed in `rdi`, `rsi`, `rdx`, `r10`, `r8`, `r9`.
    fn syscall_args(&self) -> [u64; MAX_SYSCALL_ARGS] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    fn return_value(&self) -> i64 {
        self.rax as i64
    }

    fn instruction_pointer(&self) -> u64 {
        self.rip
    }

    fn frame_pointer(&self) -> u64 {
        self.rbp
    }
}

pub(crate) fn phase(regs: &Registers) -> SyscallPhase {
    if regs.rax as i64 == RAX_AT_ENTRY {
        SyscallPhase::Entry
    } else {
        SyscallPhase::Exit
    }
}

pub(crate) fn read_snapshot(tid: Pid) -> Result<RegisterSnapshot> {
    let regs = ptrace::getregs(tid).died_if_esrch(tid)?;

    Ok(RegisterSnapshot::capture(tid, &regs, phase(&regs)))
}
