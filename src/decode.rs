//! Rendering of syscall arguments, including strings read out of the tracee.

use std::fmt::Write;

use nix::errno::Errno;
use nix::sys::ptrace;

use crate::registers::{Pid, RegisterSnapshot, MAX_SYSCALL_ARGS};
use crate::syscalls::{ArgKind, SyscallDescriptor};

/// Size of one `PTRACE_PEEKDATA` transfer.
pub const WORD_SIZE: usize = std::mem::size_of::<libc::c_long>();

/// Starting capacity of a string read from the tracee.
const INITIAL_STRING_CAPACITY: usize = 2048;

/// Upper bound on the length of a string read from the tracee.
const MAX_STRING_LEN: usize = 1 << 20;

/// Word-granular read access to a foreign address space.
pub trait ForeignMemory {
    /// Read the machine word at `addr`, in the tracee's native byte order.
    fn read_word(&self, addr: u64) -> Result<[u8; WORD_SIZE], Errno>;
}

/// Memory of a stopped tracee thread, read via `PTRACE_PEEKDATA`.
#[derive(Clone, Copy, Debug)]
pub struct TraceeMemory {
    tid: Pid,
}

impl TraceeMemory {
    pub fn new(tid: Pid) -> Self {
        Self { tid }
    }
}

impl ForeignMemory for TraceeMemory {
    fn read_word(&self, addr: u64) -> Result<[u8; WORD_SIZE], Errno> {
        let word = ptrace::read(self.tid, addr as ptrace::AddressType)?;
        Ok(word.to_ne_bytes())
    }
}

/// Growable buffer of bytes collected one word at a time, up to a NUL terminator.
#[derive(Debug)]
pub struct CStringBuffer {
    bytes: Vec<u8>,
    terminated: bool,
}

impl CStringBuffer {
    pub fn new() -> Self {
        let bytes = Vec::with_capacity(INITIAL_STRING_CAPACITY);
        let terminated = false;

        Self { bytes, terminated }
    }

    /// Append the bytes of `word` that precede the first NUL, if any.
    ///
    /// Returns `true` once the terminator has been seen. Nothing is appended after that.
    pub fn push_word(&mut self, word: &[u8]) -> bool {
        if self.terminated {
            return true;
        }

        // Double when full.
        if self.bytes.len() + word.len() > self.bytes.capacity() {
            let additional = self.bytes.capacity().max(word.len());
            self.bytes.reserve_exact(additional);
        }

        match word.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.bytes.extend_from_slice(&word[..nul]);
                self.terminated = true;
            },
            None => {
                self.bytes.extend_from_slice(word);
            },
        }

        self.terminated
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for CStringBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the NUL-terminated string at `addr`.
///
/// Reading stops at the first NUL byte. If a word cannot be read, the string read so
/// far is returned: the rest is assumed to be inaccessible.
pub fn read_cstring(mem: &impl ForeignMemory, addr: u64) -> Vec<u8> {
    let mut buf = CStringBuffer::new();

    while buf.len() < MAX_STRING_LEN {
        let word_addr = match addr.checked_add(buf.len() as u64) {
            Some(word_addr) => word_addr,
            None => break,
        };

        let word = match mem.read_word(word_addr) {
            Ok(word) => word,
            Err(_) => break,
        };

        if buf.push_word(&word) {
            break;
        }
    }

    buf.into_bytes()
}

/// Escape bytes for display.
///
/// Printable ASCII other than `\` is copied; every other byte becomes `\xNN`.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());

    for &b in bytes {
        if (b' '..=b'~').contains(&b) && b != b'\\' {
            out.push(b as char);
        } else {
            // Writing to a `String` cannot fail.
            let _ = write!(out, "\\x{:02x}", b);
        }
    }

    out
}

/// Render one argument register according to `kind`.
pub fn format_arg(mem: &impl ForeignMemory, kind: ArgKind, raw: u64) -> String {
    match kind {
        ArgKind::Integer => format!("{}", raw as i64),
        ArgKind::Pointer => format!("0x{:x}", raw),
        ArgKind::CString => format!("\"{}\"", escape(&read_cstring(mem, raw))),
    }
}

/// Render the arguments of the syscall entered at `regs`, comma-separated.
///
/// Without a descriptor, all six argument registers are rendered as pointers.
pub fn format_args(
    mem: &impl ForeignMemory,
    regs: &RegisterSnapshot,
    desc: Option<&SyscallDescriptor>,
) -> String {
    let kinds: Vec<ArgKind> = match desc {
        Some(desc) => desc.arg_kinds.clone(),
        None => vec![ArgKind::Pointer; MAX_SYSCALL_ARGS],
    };

    let args: Vec<String> = kinds
        .iter()
        .enumerate()
        .filter_map(|(i, &kind)| regs.arg(i).map(|raw| format_arg(mem, kind, raw)))
        .collect();

    args.join(", ")
}
