use std::collections::HashSet;
use std::io::{self, BufRead, Write};

use nix::{
    errno::Errno,
    sys::{
        ptrace::{self, Options},
        signal::{self, Signal},
    },
    unistd::{self, fork, getppid, ForkResult},
};
use tracing::{debug, info};

use crate::decode::{self, TraceeMemory};
use crate::error::{Error, Result};
use crate::options::TracerOptions;
use crate::printer::Printer;
use crate::registers::{self, Pid};
use crate::syscalls::SyscallTable;
use crate::trap::{self, ExitStatus, Resume, Trap, WaitEvent};
use crate::unwind::Unwinder;

/// One tracing session, from attaching to the tracee until its thread-group leader
/// terminates.
///
/// Trace records are written to `out`. When pausing, a line is read from `input`.
#[derive(Debug)]
pub struct Session<W: Write, R: BufRead> {
    options: TracerOptions,
    printer: Printer<W>,
    input: R,
    unwinder: Option<Unwinder>,

    /// Threads whose syscall-entry has been printed, but not the matching exit.
    in_syscall: HashSet<Pid>,
}

impl Session<io::Stderr, io::StdinLock<'static>> {
    /// Session printing to stderr and pausing on stdin.
    pub fn new(options: TracerOptions) -> Self {
        Self::with_io(options, io::stderr(), io::stdin().lock())
    }
}

impl<W: Write, R: BufRead> Session<W, R> {
    pub fn with_io(options: TracerOptions, out: W, input: R) -> Self {
        let printer = Printer::new(out, options.follow_fork);

        Self {
            options,
            printer,
            input,
            unwinder: None,
            in_syscall: HashSet::new(),
        }
    }

    pub fn options(&self) -> &TracerOptions {
        &self.options
    }

    /// Trace until the thread-group leader terminates.
    ///
    /// Returns its exit code, or the number of the signal that killed it.
    pub fn run(mut self) -> Result<i32> {
        let leader = self.options.tracee_pid;

        self.setup()?;
        info!(pid = leader.as_raw(), "tracing");

        let status = self.trace()?;

        if let Some(unwinder) = self.unwinder.take() {
            unwinder.finish();
        }

        let code = status.code();
        self.printer.exited(code)?;
        info!(pid = leader.as_raw(), code, "tracee exited");

        Ok(code)
    }

    fn setup(&mut self) -> Result<()> {
        let leader = self.options.tracee_pid;

        let intermediate = if self.options.daemonize {
            Some(daemonize()?)
        } else {
            None
        };

        if self.options.attach_to_tracee || self.options.daemonize {
            ptrace::attach(leader).map_err(|source| Error::Attach { pid: leader, source })?;
            debug!(pid = leader.as_raw(), "attached");
        }

        // Stopped by `PTRACE_ATTACH`, or by itself after `PTRACE_TRACEME`.
        wait_until_stopped(leader)?;

        if let Some(intermediate) = intermediate {
            // Reaping it unblocks the tracee, which then execs.
            signal::kill(intermediate, Signal::SIGKILL)?;
            debug!(pid = intermediate.as_raw(), "killed intermediate process");
        }

        let mut options = Options::PTRACE_O_TRACESYSGOOD;

        if self.options.follow_fork {
            options |= Options::PTRACE_O_TRACECLONE;
            options |= Options::PTRACE_O_TRACEFORK;
            options |= Options::PTRACE_O_TRACEVFORK;
        }

        ptrace::setoptions(leader, options)
            .map_err(|source| Error::SetOptions { pid: leader, source })?;
        debug!(pid = leader.as_raw(), ?options, "set ptrace options");

        if self.options.print_stacktrace {
            self.unwinder = Some(Unwinder::new());
        }

        Ok(())
    }

    fn trace(&mut self) -> Result<ExitStatus> {
        let leader = self.options.tracee_pid;
        let mut resume = Resume::thread(leader);

        loop {
            let printer = &mut self.printer;
            let trap = trap::wait_for_trap(resume, |tid, signal| printer.signal(tid, signal))?;

            resume = match trap {
                Trap::Terminated { tid, status } => {
                    self.in_syscall.remove(&tid);
                    self.printer.terminated(tid, status)?;

                    if tid == leader {
                        return Ok(status);
                    }

                    Resume::none()
                },
                Trap::Syscall { tid } => {
                    match self.on_syscall(tid) {
                        Ok(()) => Resume::thread(tid),
                        Err(err) if err.tracee_died() => {
                            debug!(tid = tid.as_raw(), "tracee died at syscall-stop, probably `SIGKILL`ed");
                            Resume::none()
                        },
                        Err(err) => return Err(err),
                    }
                },
            };
        }
    }

    fn on_syscall(&mut self, tid: Pid) -> Result<()> {
        let regs = registers::read_registers(tid)?;

        // E.g. a stop for a signal raised while not in a syscall.
        let nr = match regs.syscall_nr() {
            Some(nr) => nr,
            None => return Ok(()),
        };

        // The number is unchanged between entry and exit, so this hides both halves.
        if !self.options.traces(nr) {
            return Ok(());
        }

        // Entry and exit stops of one thread alternate, so a thread with an open entry
        // must be at its exit. The register heuristic only decides the first stop.
        let entering = !self.in_syscall.contains(&tid);

        if entering && !regs.is_entry() {
            // The first stop after attaching, or after `PTRACE_TRACEME`, can be the exit
            // of a syscall entered before tracing began.
            debug!(tid = tid.as_raw(), nr, "syscall-exit without entry");
            return Ok(());
        }

        let table = SyscallTable::get();
        let desc = table.lookup(nr);
        let name = table.name(nr);
        let mem = TraceeMemory::new(tid);

        if entering {
            if desc.is_none() {
                debug!(nr, "unknown syscall");
            }

            self.in_syscall.insert(tid);

            let args = decode::format_args(&mem, &regs, desc);
            self.printer.entry(tid, &name, &args)?;

            if self.options.pauses_on(nr) {
                self.pause()?;
            }
        } else {
            self.in_syscall.remove(&tid);

            self.printer.exit(tid, &name, regs.return_value())?;

            if let Some(unwinder) = &mut self.unwinder {
                unwinder.print_backtrace(&mut self.printer, &mem, &regs)?;
            }
        }

        Ok(())
    }

    // Block until a line (or EOF) is read.
    fn pause(&mut self) -> Result<()> {
        let mut line = String::new();
        self.input.read_line(&mut line)?;

        Ok(())
    }
}

// Fork again, so the tracer is a grandchild of the tracee. Returns the pid of the
// intermediate process, which waits to be killed.
fn daemonize() -> Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => {
            unistd::pause();

            unsafe { libc::_exit(0) }
        },
        ForkResult::Child => {
            Ok(getppid())
        },
    }
}

fn wait_until_stopped(pid: Pid) -> Result<()> {
    loop {
        match trap::wait(Some(pid))? {
            WaitEvent::Stopped(..) => {
                return Ok(());
            },
            WaitEvent::Exited(..) | WaitEvent::Signaled(..) => {
                return Err(Error::TraceeDied { pid, source: Errno::ESRCH });
            },
            _ => {
                continue;
            },
        }
    }
}
