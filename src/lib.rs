//! A minimal syscall tracer.
//!
//! Launches a program (or attaches to a running process), stops it at every syscall
//! entry and exit, and prints one record per syscall with its decoded arguments and
//! return value.

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("Only x86-64 and AArch64 are supported");

pub mod cmd;
pub mod decode;
pub mod error;
pub mod options;
pub mod printer;
pub mod registers;
pub mod session;
pub mod syscalls;
pub mod trap;
pub mod unwind;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "x86_64")]
pub mod x86;

pub use cmd::Command;
pub use error::{Error, Result};
pub use options::TracerOptions;
pub use registers::{Pid, RegisterSnapshot, SyscallNr};
pub use session::Session;
pub use syscalls::{ArgKind, SyscallDescriptor, SyscallTable};
pub use trap::{ExitStatus, SignalNr, Trap};
