use nix::errno::Errno;

use crate::error::{Result, ResultExt};
use crate::registers::{
    Pid,
    RegisterSnapshot,
    SyscallNr,
    SyscallPhase,
    SyscallRegisters,
    MAX_SYSCALL_ARGS,
};

#[cfg(all(target_os = "android"))]
pub(crate) const PTRACE_GETREGSET: i32 = 0x4204;

#[cfg(all(not(target_os = "android")))]
pub(crate) const PTRACE_GETREGSET: u32 = 0x4204;

#[cfg(all(target_os = "android"))]
pub(crate) const PTRACE_GET_SYSCALL_INFO: i32 = 0x420e;

#[cfg(all(not(target_os = "android")))]
pub(crate) const PTRACE_GET_SYSCALL_INFO: u32 = 0x420e;

/// Defined in [`include/uapi/linux/elf.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/include/uapi/linux/elf.h#378).
const NT_PRSTATUS: i32 = 0x1;

/// Defined in `include/uapi/linux/ptrace.h`.
const PTRACE_SYSCALL_INFO_NONE: u8 = 0;
const PTRACE_SYSCALL_INFO_ENTRY: u8 = 1;

/// Defined in [`arch/arm64/include/uapi/asm/ptrace.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/arch/arm64/include/uapi/asm/ptrace.h#88).
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct user_pt_regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64
}

/// Defined in `include/uapi/linux/ptrace.h`. Only the header is read; the trailing
/// union is sized for its largest (seccomp) member.
#[allow(non_camel_case_types, dead_code)]
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct ptrace_syscall_info {
    op: u8,
    pad: [u8; 3],
    arch: u32,
    instruction_pointer: u64,
    stack_pointer: u64,
    data: [u64; 8],
}

impl SyscallRegisters for user_pt_regs {
    // The syscall number is passed in `x8`, and left there through the syscall.
    fn syscall_nr(&self) -> Option<SyscallNr> {
        Some(self.regs[8])
    }

    // Syscall args are passed in `x0`-`x5`. `x0` is clobbered by the return value at
    // syscall-exit, which is fine: args are only decoded at syscall-entry.
    fn syscall_args(&self) -> [u64; MAX_SYSCALL_ARGS] {
        let mut args = [0; MAX_SYSCALL_ARGS];
        args.copy_from_slice(&self.regs[..MAX_SYSCALL_ARGS]);
        args
    }

    fn return_value(&self) -> i64 {
        self.regs[0] as i64
    }

    fn instruction_pointer(&self) -> u64 {
        self.pc
    }

    fn frame_pointer(&self) -> u64 {
        self.regs[29]
    }
}

fn registers(tid: Pid) -> Result<user_pt_regs> {
    let mut data = std::mem::MaybeUninit::<user_pt_regs>::uninit();
    let mut rv = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: std::mem::size_of::<user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(PTRACE_GETREGSET, tid.as_raw(), NT_PRSTATUS, &mut rv as *mut _ as *mut libc::c_void)
    };

    Errno::result(res).died_if_esrch(tid)?;

    Ok(unsafe { data.assume_init() })
}

// Unlike x86-64, the register set alone does not tell entry from exit, so ask the kernel.
fn syscall_info_op(tid: Pid) -> Result<u8> {
    let mut info = std::mem::MaybeUninit::<ptrace_syscall_info>::zeroed();

    let res = unsafe {
        libc::ptrace(
            PTRACE_GET_SYSCALL_INFO,
            tid.as_raw(),
            std::mem::size_of::<ptrace_syscall_info>(),
            info.as_mut_ptr() as *mut libc::c_void,
        )
    };

    Errno::result(res).died_if_esrch(tid)?;

    Ok(unsafe { info.assume_init() }.op)
}

pub(crate) fn read_snapshot(tid: Pid) -> Result<RegisterSnapshot> {
    let regs = registers(tid)?;
    let op = syscall_info_op(tid)?;

    let phase = if op == PTRACE_SYSCALL_INFO_ENTRY {
        SyscallPhase::Entry
    } else {
        SyscallPhase::Exit
    };

    let snapshot = if op == PTRACE_SYSCALL_INFO_NONE {
        RegisterSnapshot::capture(tid, &NotInSyscall(regs), phase)
    } else {
        RegisterSnapshot::capture(tid, &regs, phase)
    };

    Ok(snapshot)
}

// Register view of a thread stopped outside any syscall.
struct NotInSyscall(user_pt_regs);

impl SyscallRegisters for NotInSyscall {
    fn syscall_nr(&self) -> Option<SyscallNr> {
        None
    }

    fn syscall_args(&self) -> [u64; MAX_SYSCALL_ARGS] {
        self.0.syscall_args()
    }

    fn return_value(&self) -> i64 {
        self.0.return_value()
    }

    fn instruction_pointer(&self) -> u64 {
        self.0.instruction_pointer()
    }

    fn frame_pointer(&self) -> u64 {
        self.0.frame_pointer()
    }
}
