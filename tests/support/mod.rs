use std::io::{self, BufRead, Read};

use anyhow::Result;
use ministrace::{Command, Pid, Session, TracerOptions};

/// The output of a finished session.
#[allow(unused)]
#[derive(Debug)]
pub struct Traced {
    /// Pid of the thread-group leader.
    pub pid: Pid,

    /// Exit code returned by the session.
    pub code: i32,

    pub output: String,
}

/// Input which must never be read from.
pub struct NoInput;

impl Read for NoInput {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        panic!("tracer paused for input");
    }
}

impl BufRead for NoInput {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        panic!("tracer paused for input");
    }

    fn consume(&mut self, _amt: usize) {}
}

/// Spawn `argv` and trace it to completion, after letting `configure` adjust the options.
#[allow(unused)]
pub fn trace(argv: &[&str], configure: impl FnOnce(&mut TracerOptions)) -> Result<Traced> {
    let mut options = TracerOptions::default();
    configure(&mut options);

    let cmd = Command::new(argv.to_vec())?;
    options.tracee_pid = cmd.spawn()?;

    run(options)
}

/// Run a session for already-configured options, capturing its output.
pub fn run(options: TracerOptions) -> Result<Traced> {
    let pid = options.tracee_pid;
    let mut out = vec![];

    let code = Session::with_io(options, &mut out, NoInput).run()?;
    let output = String::from_utf8(out)?;

    eprintln!("{}", output);

    Ok(Traced { pid, code, output })
}
