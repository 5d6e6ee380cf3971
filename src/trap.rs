//! Waiting for, and classifying, stops of any traced thread.
//!
//! With `PTRACE_O_TRACESYSGOOD` set, `wait(2)` multiplexes several kinds of stop onto one
//! status word:
//!
//! - syscall-enter-stop and syscall-exit-stop, reported as `SIGTRAP | 0x80`
//! - ptrace-event-stops, reported as `SIGTRAP` with an event code in `status >> 16`
//! - group-stops, for which `PTRACE_GETSIGINFO` fails
//! - signal-delivery-stops, for everything else
//!
//! Only syscall-stops and terminations are reported to the caller. Everything else is
//! absorbed here, re-injecting any signal that was about to be delivered.

use std::ptr;

use nix::{errno::Errno, sys::ptrace};
use tracing::{debug, trace};

use crate::error::{internal_error, Error, Result};
use crate::registers::Pid;

/// A signal number.
///
/// Kept raw, since `nix::sys::signal::Signal` can't represent real-time signals.
pub type SignalNr = i32;

/// How a traced thread ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(SignalNr),
}

impl ExitStatus {
    /// Exit code, or the number of the terminating signal.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(signal) => *signal,
        }
    }
}

/// A stop or termination worth reporting to the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trap {
    /// Thread `tid` is in a syscall-enter-stop or syscall-exit-stop.
    Syscall { tid: Pid },

    /// Thread `tid` has exited or was killed, and has been reaped.
    Terminated { tid: Pid, status: ExitStatus },
}

/// Which stopped thread to restart before the next wait, and with which signal.
///
/// This is threaded through successive waits: every absorbed stop produces the `Resume`
/// for the following iteration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Resume {
    pub tid: Option<Pid>,
    pub signal: Option<SignalNr>,
}

impl Resume {
    /// Restart nothing, just wait.
    pub fn none() -> Self {
        Self::default()
    }

    /// Restart `tid` without delivering a signal.
    pub fn thread(tid: Pid) -> Self {
        Self { tid: Some(tid), signal: None }
    }

    /// Restart `tid`, delivering `signal`.
    pub fn with_signal(tid: Pid, signal: SignalNr) -> Self {
        Self { tid: Some(tid), signal: Some(signal) }
    }
}

/// Classification of one `wait(2)` status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Report to the session.
    Report(Trap),

    /// Absorb, restarting as given.
    Absorb(Absorbed),
}

/// A stop the session never sees.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Absorbed {
    /// A ptrace-event-stop, e.g. for `clone()`, `fork()`, or `execve()`.
    Event { tid: Pid },

    Group { tid: Pid, signal: SignalNr },

    /// A signal-delivery-stop. The signal must be passed on at restart.
    Signal { tid: Pid, signal: SignalNr },
}

impl Absorbed {
    pub fn resume(&self) -> Resume {
        match *self {
            Absorbed::Event { tid } => Resume::thread(tid),
            Absorbed::Group { tid, .. } => Resume::thread(tid),
            Absorbed::Signal { tid, signal } => Resume::with_signal(tid, signal),
        }
    }
}

/// A decoded `wait(2)` status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitEvent {
    Exited(Pid, i32),
    Signaled(Pid, SignalNr),
    Stopped(Pid, SignalNr),

    /// Stopped by `SIGTRAP`, with a nonzero `PTRACE_EVENT_*` code.
    PtraceEvent(Pid, i32),

    /// Stopped by `SIGTRAP | 0x80`.
    PtraceSyscall(Pid),
    Continued(Pid),
}

impl WaitEvent {
    /// Decode the status word written by `waitpid()` for `pid`.
    pub fn from_raw(pid: Pid, status: i32) -> Result<Self> {
        let event = if libc::WIFEXITED(status) {
            WaitEvent::Exited(pid, libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            WaitEvent::Signaled(pid, libc::WTERMSIG(status))
        } else if libc::WIFSTOPPED(status) {
            let signal = libc::WSTOPSIG(status);
            let ptrace_event = status >> 16;

            if signal == libc::SIGTRAP | 0x80 {
                WaitEvent::PtraceSyscall(pid)
            } else if signal == libc::SIGTRAP && ptrace_event != 0 {
                WaitEvent::PtraceEvent(pid, ptrace_event)
            } else {
                WaitEvent::Stopped(pid, signal)
            }
        } else if libc::WIFCONTINUED(status) {
            WaitEvent::Continued(pid)
        } else {
            return internal_error!(format!("unknown `wait()` status: {:#x}", status));
        };

        Ok(event)
    }
}

/// Classify a `wait(2)` status.
///
/// `has_siginfo` is asked whether `PTRACE_GETSIGINFO` succeeds for a thread stopped by a
/// stopping signal. If it fails, the stop is a group-stop.
pub fn classify(status: WaitEvent, has_siginfo: impl FnOnce(Pid) -> bool) -> Result<Disposition> {
    let disposition = match status {
        WaitEvent::PtraceSyscall(tid) => {
            Disposition::Report(Trap::Syscall { tid })
        },
        WaitEvent::PtraceEvent(tid, _event) => {
            // Auto-attached children need no bookkeeping: the kernel adds them to the
            // traced set, and the next wait reports their stops.
            Disposition::Absorb(Absorbed::Event { tid })
        },
        WaitEvent::Stopped(tid, libc::SIGTRAP) => {
            // Without `PTRACE_O_TRACEEXEC`, a successful `execve()` is reported this way.
            Disposition::Absorb(Absorbed::Event { tid })
        },
        WaitEvent::Stopped(tid, signal) => {
            if is_stopping_signal(signal) && !has_siginfo(tid) {
                Disposition::Absorb(Absorbed::Group { tid, signal })
            } else {
                Disposition::Absorb(Absorbed::Signal { tid, signal })
            }
        },
        WaitEvent::Exited(tid, code) => {
            let status = ExitStatus::Exited(code);
            Disposition::Report(Trap::Terminated { tid, status })
        },
        WaitEvent::Signaled(tid, signal) => {
            let status = ExitStatus::Signaled(signal);
            Disposition::Report(Trap::Terminated { tid, status })
        },
        // Assume `!WCONTINUED`.
        WaitEvent::Continued(_) =>
            internal_error!("unreachable `wait()` status"),
    };

    Ok(disposition)
}

// Only these four signals are stopping signals. If the tracer sees anything else, it
// can't be a group-stop.
fn is_stopping_signal(signal: SignalNr) -> bool {
    matches!(signal, libc::SIGSTOP | libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU)
}

// From the manual:
//
//     If PTRACE_GETSIGINFO fails with EINVAL, then it is definitely a
//     group-stop.  (Other failure codes are possible, such as ESRCH
//     ("no such process") if a SIGKILL killed the tracee.)
//
// Either way, there is no signal to pass on.
fn query_siginfo(tid: Pid) -> bool {
    match ptrace::getsiginfo(tid) {
        Ok(_) => true,
        Err(errno) => {
            debug!(tid = tid.as_raw(), %errno, "no siginfo, assuming group-stop");
            false
        },
    }
}

/// Restart `resume.tid` (if any) until its next syscall boundary, then block until any
/// traced thread changes state. Loops until a syscall-stop or termination is seen.
///
/// `on_signal` is called for each signal-delivery-stop, before the signal is passed on
/// at the next restart.
pub fn wait_for_trap(
    resume: Resume,
    mut on_signal: impl FnMut(Pid, SignalNr) -> Result<()>,
) -> Result<Trap> {
    let mut resume = resume;

    loop {
        if let Some(tid) = resume.tid {
            restart(tid, resume.signal)?;
        }

        let status = wait(None)?;
        trace!(?status, "wait status");

        resume = match classify(status, query_siginfo)? {
            Disposition::Report(trap) => {
                return Ok(trap);
            },
            Disposition::Absorb(absorbed) => {
                match absorbed {
                    Absorbed::Event { tid } => {
                        debug!(tid = tid.as_raw(), ?status, "ptrace-event-stop");
                    },
                    Absorbed::Group { tid, signal } => {
                        debug!(tid = tid.as_raw(), signal, "group-stop");
                    },
                    Absorbed::Signal { tid, signal } => {
                        on_signal(tid, signal)?;
                    },
                }

                absorbed.resume()
            },
        };
    }
}

// Resume `tid` until the next syscall-stop. A vanished thread is not an error: its
// termination is reported by the next wait.
fn restart(tid: Pid, signal: Option<SignalNr>) -> Result<()> {
    let data = signal.unwrap_or(0) as libc::c_long;

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SYSCALL,
            tid.as_raw(),
            ptr::null_mut::<libc::c_void>(),
            data,
        )
    };

    match Errno::result(res) {
        Ok(_) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(tid = tid.as_raw(), "tracee vanished before restart");
            Ok(())
        },
        Err(source) => Err(Error::Restart { pid: tid, source }),
    }
}

/// Wait for `pid`, or any child if `None`, whether a process or a thread.
pub(crate) fn wait(pid: Option<Pid>) -> Result<WaitEvent> {
    let target = pid.map(Pid::as_raw).unwrap_or(-1);
    let mut status = 0;

    loop {
        let res = unsafe { libc::waitpid(target, &mut status, libc::__WALL) };

        match Errno::result(res) {
            Ok(raw) => return WaitEvent::from_raw(Pid::from_raw(raw), status),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn no_siginfo_query(_: Pid) -> bool {
        panic!("siginfo must not be queried");
    }

    // Status words as encoded by the kernel.
    fn stopped(signal: i32) -> i32 {
        (signal << 8) | 0x7f
    }

    fn exited(code: i32) -> i32 {
        code << 8
    }

    fn decode(raw: i32) -> WaitEvent {
        WaitEvent::from_raw(pid(10), raw).unwrap()
    }

    #[test]
    fn test_decode_raw_status() {
        assert_eq!(decode(exited(7)), WaitEvent::Exited(pid(10), 7));
        assert_eq!(decode(libc::SIGKILL), WaitEvent::Signaled(pid(10), libc::SIGKILL));
        assert_eq!(decode(stopped(libc::SIGTRAP | 0x80)), WaitEvent::PtraceSyscall(pid(10)));
        assert_eq!(decode(stopped(libc::SIGTRAP)), WaitEvent::Stopped(pid(10), libc::SIGTRAP));
        assert_eq!(decode(stopped(libc::SIGUSR1)), WaitEvent::Stopped(pid(10), libc::SIGUSR1));
        assert_eq!(decode(0xffff), WaitEvent::Continued(pid(10)));

        let clone = (libc::PTRACE_EVENT_CLONE << 16) | stopped(libc::SIGTRAP);
        assert_eq!(decode(clone), WaitEvent::PtraceEvent(pid(10), libc::PTRACE_EVENT_CLONE));
    }

    #[test]
    fn test_realtime_signals_are_decoded() {
        let rt = libc::SIGRTMIN() + 1;

        assert_eq!(decode(stopped(rt)), WaitEvent::Stopped(pid(10), rt));
        assert_eq!(decode(rt), WaitEvent::Signaled(pid(10), rt));
    }

    #[test]
    fn test_syscall_stop_is_reported() {
        let d = classify(WaitEvent::PtraceSyscall(pid(10)), no_siginfo_query).unwrap();

        assert_eq!(d, Disposition::Report(Trap::Syscall { tid: pid(10) }));
    }

    #[test]
    fn test_event_stops_are_absorbed_without_signal() {
        let status = WaitEvent::PtraceEvent(pid(10), libc::PTRACE_EVENT_CLONE);
        let d = classify(status, no_siginfo_query).unwrap();

        assert_eq!(d, Disposition::Absorb(Absorbed::Event { tid: pid(10) }));

        if let Disposition::Absorb(absorbed) = d {
            assert_eq!(absorbed.resume(), Resume::thread(pid(10)));
        }
    }

    #[test]
    fn test_plain_sigtrap_is_not_forwarded() {
        let d = classify(WaitEvent::Stopped(pid(10), libc::SIGTRAP), no_siginfo_query).unwrap();

        assert_eq!(d, Disposition::Absorb(Absorbed::Event { tid: pid(10) }));
    }

    #[test]
    fn test_group_stop() {
        let d = classify(WaitEvent::Stopped(pid(10), libc::SIGTSTP), |_| false).unwrap();
        let expected = Absorbed::Group { tid: pid(10), signal: libc::SIGTSTP };

        assert_eq!(d, Disposition::Absorb(expected));
        assert_eq!(expected.resume(), Resume::thread(pid(10)));
    }

    #[test]
    fn test_stopping_signal_with_siginfo_is_delivered() {
        let d = classify(WaitEvent::Stopped(pid(10), libc::SIGSTOP), |_| true).unwrap();
        let expected = Absorbed::Signal { tid: pid(10), signal: libc::SIGSTOP };

        assert_eq!(d, Disposition::Absorb(expected));
        assert_eq!(expected.resume(), Resume::with_signal(pid(10), libc::SIGSTOP));
    }

    #[test]
    fn test_other_signals_skip_siginfo_query() {
        let d = classify(WaitEvent::Stopped(pid(10), libc::SIGCHLD), no_siginfo_query).unwrap();

        assert_eq!(d, Disposition::Absorb(Absorbed::Signal { tid: pid(10), signal: libc::SIGCHLD }));
    }

    #[test]
    fn test_realtime_signal_is_delivered() {
        let rt = libc::SIGRTMIN();
        let d = classify(WaitEvent::Stopped(pid(10), rt), no_siginfo_query).unwrap();
        let expected = Absorbed::Signal { tid: pid(10), signal: rt };

        assert_eq!(d, Disposition::Absorb(expected));
        assert_eq!(expected.resume(), Resume::with_signal(pid(10), rt));
    }

    #[test]
    fn test_exit_and_kill_are_terminations() {
        let exited = classify(WaitEvent::Exited(pid(11), 7), no_siginfo_query).unwrap();
        let status = ExitStatus::Exited(7);
        assert_eq!(exited, Disposition::Report(Trap::Terminated { tid: pid(11), status }));
        assert_eq!(status.code(), 7);

        let killed = classify(WaitEvent::Signaled(pid(12), libc::SIGKILL), no_siginfo_query).unwrap();
        let status = ExitStatus::Signaled(libc::SIGKILL);
        assert_eq!(killed, Disposition::Report(Trap::Terminated { tid: pid(12), status }));
        assert_eq!(status.code(), 9);
    }

    #[test]
    fn test_continued_is_internal_error() {
        let res = classify(WaitEvent::Continued(pid(10)), no_siginfo_query);

        assert!(matches!(res, Err(Error::Internal(_))));
    }
}
