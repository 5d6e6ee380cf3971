//! Backtraces of stopped tracee threads, by walking the frame-pointer chain.
//!
//! Each frame record is a pair of words `[saved fp, return address]` at the address held
//! in the frame pointer (`rbp` on x86-64, `x29` on AArch64). Code built without frame
//! pointers yields short or truncated backtraces.

use std::fs;

use tracing::debug;

use crate::decode::{ForeignMemory, WORD_SIZE};
use crate::error::Result;
use crate::printer::Printer;
use crate::registers::{Pid, RegisterSnapshot};

/// Upper bound on the number of frames in one backtrace.
pub const MAX_FRAMES: usize = 64;

/// One mapped region of a tracee's address space, from `/proc/<pid>/maps`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,

    /// Offset into the mapped file of `start`.
    pub offset: u64,

    /// Backing file or pseudo-path such as `[stack]`. Empty for anonymous mappings.
    pub path: String,
}

impl Mapping {
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// The memory map of a tracee.
#[derive(Clone, Debug, Default)]
pub struct Mappings {
    mappings: Vec<Mapping>,
}

impl Mappings {
    pub fn load(tid: Pid) -> Result<Self> {
        let maps = fs::read_to_string(format!("/proc/{}/maps", tid))?;

        Ok(Self::parse(&maps))
    }

    /// Parse the contents of a `maps` file. Malformed lines are skipped.
    pub fn parse(maps: &str) -> Self {
        let mappings = maps.lines().filter_map(parse_line).collect();

        Self { mappings }
    }

    pub fn find(&self, addr: u64) -> Option<&Mapping> {
        self.mappings.iter().find(|m| m.contains(addr))
    }

    /// `(path, file offset)` of `addr`, if it is in a named mapping.
    pub fn locate(&self, addr: u64) -> Option<(&str, u64)> {
        let mapping = self.find(addr)?;

        if mapping.path.is_empty() {
            return None;
        }

        Some((mapping.path.as_str(), addr - mapping.start + mapping.offset))
    }
}

// `start-end perms offset dev inode [path]`
fn parse_line(line: &str) -> Option<Mapping> {
    let mut fields = line.split_whitespace();

    let range = fields.next()?;
    let _perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;

    // Paths may contain spaces.
    let path = fields.collect::<Vec<_>>().join(" ");

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(offset, 16).ok()?;

    Some(Mapping { start, end, offset, path })
}

fn read_u64(mem: &impl ForeignMemory, addr: u64) -> Option<u64> {
    let word = mem.read_word(addr).ok()?;

    let mut bytes = [0; 8];
    bytes.copy_from_slice(&word[..8]);

    Some(u64::from_ne_bytes(bytes))
}

/// Return addresses of the thread stopped at `regs`, innermost first.
///
/// The first frame is the current instruction pointer. The walk ends at a null frame
/// pointer or return address, at a frame pointer that does not move towards the stack
/// base, at an unreadable word, or after [`MAX_FRAMES`] frames.
pub fn walk_frames(mem: &impl ForeignMemory, regs: &RegisterSnapshot) -> Vec<u64> {
    let mut frames = vec![regs.instruction_pointer()];
    let mut fp = regs.frame_pointer();

    while frames.len() < MAX_FRAMES && fp != 0 {
        let ret = match fp.checked_add(WORD_SIZE as u64).and_then(|addr| read_u64(mem, addr)) {
            Some(ret) if ret != 0 => ret,
            _ => break,
        };

        frames.push(ret);

        match read_u64(mem, fp) {
            Some(next) if next > fp => fp = next,
            _ => break,
        }
    }

    frames
}

/// Prints backtraces for the lifetime of a session.
#[derive(Debug, Default)]
pub struct Unwinder {
    printed: usize,
}

impl Unwinder {
    pub fn new() -> Self {
        debug!("unwinder initialized");

        Self::default()
    }

    /// Print the backtrace of the thread stopped at `regs`.
    pub fn print_backtrace<W: std::io::Write>(
        &mut self,
        printer: &mut Printer<W>,
        mem: &impl ForeignMemory,
        regs: &RegisterSnapshot,
    ) -> Result<()> {
        // A thread can exit between its stop and this read.
        let mappings = match Mappings::load(regs.tid()) {
            Ok(mappings) => mappings,
            Err(err) => {
                debug!(tid = regs.tid().as_raw(), %err, "could not read memory map");
                Mappings::default()
            },
        };

        for addr in walk_frames(mem, regs) {
            printer.frame(addr, mappings.locate(addr))?;
        }

        self.printed += 1;

        Ok(())
    }

    /// Release the unwinder at the end of a session.
    pub fn finish(self) {
        debug!(backtraces = self.printed, "unwinder finished");
    }
}
