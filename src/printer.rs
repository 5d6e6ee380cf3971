//! The trace line protocol.
//!
//! A syscall is printed in two halves: the entry opens a line, the exit closes it. When
//! following forks, both halves are tagged with the thread id, since stops of different
//! threads interleave.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::io::Write;

use nix::sys::signal::Signal;

use crate::error::Result;
use crate::registers::Pid;
use crate::trap::{ExitStatus, SignalNr};

/// Writes trace records, flushing after each one.
#[derive(Debug)]
pub struct Printer<W: Write> {
    out: W,
    tag_threads: bool,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, tag_threads: bool) -> Self {
        Self { out, tag_threads }
    }

    /// Open the line for a syscall-entry: `name(args)`.
    pub fn entry(&mut self, tid: Pid, name: &str, args: &str) -> Result<()> {
        if self.tag_threads {
            write!(self.out, "\n[{}] ", tid)?;
        }

        write!(self.out, "{}({})", name, args)?;

        self.flush()
    }

    /// Close the line of a syscall with its return value.
    pub fn exit(&mut self, tid: Pid, name: &str, return_value: i64) -> Result<()> {
        if self.tag_threads {
            write!(self.out, "\n... [{} - {} ({})]", tid, name, tid)?;
        }

        writeln!(self.out, " = {}", return_value)?;

        self.flush()
    }

    pub fn terminated(&mut self, tid: Pid, status: ExitStatus) -> Result<()> {
        write!(self.out, "\n+++ [{}] terminated w/ {} +++\n", tid, status.code())?;

        self.flush()
    }

    /// Notice of a signal-delivery-stop. The signal is delivered when the thread resumes.
    pub fn signal(&mut self, tid: Pid, signal: SignalNr) -> Result<()> {
        write!(
            self.out,
            "\n+++ [{}] received (not delivered yet) signal \"{}\" +++\n",
            tid,
            signal_name(signal),
        )?;

        self.flush()
    }

    /// One frame of a backtrace.
    pub fn frame(&mut self, addr: u64, location: Option<(&str, u64)>) -> Result<()> {
        match location {
            Some((path, offset)) => writeln!(self.out, "  > 0x{:x} ({}+0x{:x})", addr, path, offset)?,
            None => writeln!(self.out, "  > 0x{:x}", addr)?,
        }

        self.flush()
    }

    /// The last line of a session.
    pub fn exited(&mut self, code: i32) -> Result<()> {
        writeln!(self.out, "+++ exited w/ {} +++", code)?;

        self.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;

        Ok(())
    }
}

// Real-time signals have no name, so they are printed by number.
fn signal_name(signal: SignalNr) -> Cow<'static, str> {
    match Signal::try_from(signal) {
        Ok(signal) => signal.as_str().into(),
        Err(_) => signal.to_string().into(),
    }
}
