use std::io;

use nix::errno::Errno;

use crate::registers::Pid;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not attach to tracee = {pid}")]
    Attach {
        pid: Pid,
        source: nix::Error,
    },

    #[error("Could not restart tracee = {pid}")]
    Restart { pid: Pid, source: nix::Error },

    #[error("Could not set ptrace options on tracee = {pid}")]
    SetOptions { pid: Pid, source: nix::Error },

    #[error("Tracee died while being inspected: pid = {pid}")]
    TraceeDied { pid: Pid, source: nix::Error },

    #[error("Exec'ing \"{program}\" failed")]
    Exec { program: String, source: nix::Error },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True if the error only means that a tracee vanished (e.g. it was `SIGKILL`ed)
    /// between being reported by `wait()` and being inspected.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::TraceeDied { .. })
    }
}

pub(crate) trait ResultExt<T> {
    /// Map `ESRCH` to [`Error::TraceeDied`], and any other errno to [`Error::OS`].
    fn died_if_esrch(self, pid: Pid) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, Errno> {
    fn died_if_esrch(self, pid: Pid) -> Result<T> {
        self.map_err(|source| match source {
            Errno::ESRCH => Error::TraceeDied { pid, source },
            source => Error::OS(source),
        })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}

pub(crate) use internal_error;
