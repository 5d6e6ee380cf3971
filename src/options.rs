use std::collections::BTreeSet;

use crate::registers::{Pid, SyscallNr};

/// Settings for one tracing session. Built once, before the session starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TracerOptions {
    /// Attach to the already-running `tracee_pid` instead of expecting a child that
    /// requested `PTRACE_TRACEME`.
    pub attach_to_tracee: bool,

    /// Automatically trace threads and processes created by the tracee.
    pub follow_fork: bool,

    /// Trace from a grandchild of the tracee, rather than from its parent.
    pub daemonize: bool,

    /// Block on one line of input after printing the entry of this syscall.
    pub pause_on_syscall_nr: Option<SyscallNr>,

    /// Syscalls to show. `None` shows all of them.
    pub syscall_filter: Option<BTreeSet<SyscallNr>>,

    pub print_stacktrace: bool,

    /// The thread-group leader. The session ends when it terminates.
    pub tracee_pid: Pid,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            attach_to_tracee: false,
            follow_fork: false,
            daemonize: false,
            pause_on_syscall_nr: None,
            syscall_filter: None,
            print_stacktrace: false,
            tracee_pid: Pid::from_raw(0),
        }
    }
}

impl TracerOptions {
    /// True if stops for syscall `nr` should be printed.
    pub fn traces(&self, nr: SyscallNr) -> bool {
        match &self.syscall_filter {
            Some(filter) => filter.contains(&nr),
            None => true,
        }
    }

    /// True if the session should wait for input after the entry of syscall `nr`.
    pub fn pauses_on(&self, nr: SyscallNr) -> bool {
        self.pause_on_syscall_nr == Some(nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_filter_traces_everything() {
        let options = TracerOptions::default();

        assert!(options.traces(0));
        assert!(options.traces(100_000));
    }

    #[test]
    fn test_filter_is_exact() {
        let options = TracerOptions {
            syscall_filter: Some(vec![2, 257].into_iter().collect()),
            ..TracerOptions::default()
        };

        assert!(options.traces(2));
        assert!(options.traces(257));
        assert!(!options.traces(0));
    }

    #[test]
    fn test_empty_filter_traces_nothing() {
        let options = TracerOptions {
            syscall_filter: Some(BTreeSet::new()),
            ..TracerOptions::default()
        };

        assert!(!options.traces(1));
    }

    #[test]
    fn test_pause() {
        let options = TracerOptions {
            pause_on_syscall_nr: Some(1),
            ..TracerOptions::default()
        };

        assert!(options.pauses_on(1));
        assert!(!options.pauses_on(2));
        assert!(!TracerOptions::default().pauses_on(0));
    }
}
