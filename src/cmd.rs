use std::ffi::{CString, NulError};

use nix::{
    errno::Errno,
    sys::{ptrace, signal::{raise, Signal}, wait},
    unistd::{fork, getppid, ForkResult, Pid},
};
use tracing::debug;

use crate::error::{Error, Result};

/// `prctl(PR_SET_PTRACER, PR_SET_PTRACER_ANY)` lets any process attach, not only ancestors.
const PR_SET_PTRACER_ANY: libc::c_ulong = !0;

/// Exit status of a forked child that could not exec its program, as in the shell.
const EXEC_FAILED: libc::c_int = 127;

/// Program to launch under the tracer.
#[derive(Clone, Debug)]
pub struct Command {
    /// Argument vector to pass to `execvp()`. `argv[0]` is resolved via `PATH`.
    argv: Vec<CString>,

    /// Make the tracer a grandchild of the tracee, rather than its parent.
    ///
    /// Defaults to `false`.
    daemonize: bool,
}

impl Command {
    pub fn new(argv: Vec<impl Into<Vec<u8>>>) -> std::result::Result<Self, NulError> {
        if argv.is_empty() {
            panic!("Command exe required");
        }

        // Ensure we own NUL-terminated strings for the foreign exec call.
        //
        // We're heap-allocating, so always do this before forking.
        let argv: std::result::Result<Vec<_>, _> = argv
            .into_iter()
            .map(CString::new)
            .collect();
        let argv = argv?;

        Ok(Self { argv, daemonize: false })
    }

    /// Set the value of the `daemonize` flag.
    pub fn daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }

    pub fn program(&self) -> String {
        self.argv[0].to_string_lossy().into_owned()
    }

    /// Start the program so that it stops before running any of its own code.
    ///
    /// Returns the pid of the tracee, in the process that goes on to be the tracer.
    ///
    /// Without `daemonize`, the tracer is the parent. The child requests `PTRACE_TRACEME`
    /// and stops itself with `SIGSTOP`, so the tracer can set options before the `exec`.
    ///
    /// With `daemonize`, the roles are swapped: the parent becomes the tracee, and the
    /// child goes on to become the tracer (see [`Session`](crate::Session)). The parent
    /// blocks in `wait()` until the child is reaped, then execs. If that exec fails, the
    /// parent returns [`Error::Exec`]. It never returns otherwise.
    pub fn spawn(self) -> Result<Pid> {
        // Heap-allocates, must occur pre-fork.
        let argv = self.argv_ptrs();

        if self.daemonize {
            // Done before forking, so the tracer can never attach too early.
            allow_any_tracer()?;
        }

        match unsafe { fork() }? {
            ForkResult::Child => {
                if self.daemonize {
                    return Ok(getppid());
                }

                exec_traced_child(&argv)
            },
            ForkResult::Parent { child } => {
                if !self.daemonize {
                    debug!(pid = child.as_raw(), "spawned tracee");
                    return Ok(child);
                }

                // Unblocked once the tracer kills our child, its intermediate parent.
                loop {
                    match wait::wait() {
                        Err(Errno::EINTR) => continue,
                        _ => break,
                    }
                }

                unsafe { libc::execvp(argv[0], argv.as_ptr()) };

                Err(Error::Exec { program: self.program(), source: Errno::last() })
            },
        }
    }

    // Construct NUL-terminated arguments for `execvp`. We heap-allocate to return a `Vec`,
    // and so must do this before calling `fork()`.
    fn argv_ptrs(&self) -> Vec<*const libc::c_char> {
        let mut argv: Vec<_> = self.argv
            .iter()
            .map(|s| s.as_ptr())
            .collect();
        argv.push(std::ptr::null());
        argv
    }
}

// Lift the Yama restriction which only lets ancestors attach. Without Yama, there is
// no such restriction, and the request fails with `EINVAL`.
fn allow_any_tracer() -> Result<()> {
    let res = unsafe { libc::prctl(libc::PR_SET_PTRACER, PR_SET_PTRACER_ANY, 0, 0, 0) };

    match Errno::result(res) {
        Ok(_) => Ok(()),
        Err(Errno::EINVAL) => {
            debug!("no Yama ptrace restrictions to lift");
            Ok(())
        },
        Err(errno) => Err(errno.into()),
    }
}

// Runs in the forked child. Nothing here may allocate, so failures are reported with
// `perror()` and `_exit()`.
fn exec_traced_child(argv: &[*const libc::c_char]) -> ! {
    if ptrace::traceme().is_ok() && raise(Signal::SIGSTOP).is_ok() {
        unsafe { libc::execvp(argv[0], argv.as_ptr()) };
    }

    unsafe {
        libc::perror(argv[0]);
        libc::_exit(EXEC_FAILED)
    }
}
