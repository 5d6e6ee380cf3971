//! Static syscall metadata: number, name, and how to render each argument.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::error::{internal_error, Result};
use crate::registers::{SyscallNr, MAX_SYSCALL_ARGS};

#[cfg(target_arch = "x86_64")]
const SYSCALLS: &str = include_str!("data/syscalls_x86_64.tsv");

#[cfg(target_arch = "aarch64")]
const SYSCALLS: &str = include_str!("data/syscalls_aarch64.tsv");

lazy_static! {
    static ref TABLE: SyscallTable = SyscallTable::parse(SYSCALLS)
        .expect("built-in syscall table is well-formed");
}

/// How a syscall argument register is rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgKind {
    /// Signed decimal.
    Integer,

    /// `0x`-prefixed hexadecimal.
    Pointer,

    /// Address of a NUL-terminated string in the tracee.
    CString,
}

impl FromStr for ArgKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "i" => Ok(ArgKind::Integer),
            "p" => Ok(ArgKind::Pointer),
            "s" => Ok(ArgKind::CString),
            _ => Err(format!("unknown argument kind `{}`", s)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyscallDescriptor {
    pub name: String,
    pub arg_kinds: Vec<ArgKind>,
}

impl SyscallDescriptor {
    pub fn arg_count(&self) -> usize {
        self.arg_kinds.len()
    }
}

/// Immutable mapping between syscall numbers, names, and argument kinds.
#[derive(Clone, Debug, Default)]
pub struct SyscallTable {
    by_nr: BTreeMap<SyscallNr, SyscallDescriptor>,
    by_name: HashMap<String, SyscallNr>,
}

impl SyscallTable {
    /// The table of the architecture this crate was built for.
    pub fn get() -> &'static SyscallTable {
        &TABLE
    }

    /// Parse tab-separated rows of `<nr>\t<name>\t<kinds>`, where `<kinds>` is a comma
    /// list of `i`, `p`, `s`, or `-` for a syscall without arguments.
    pub fn parse(data: &str) -> Result<Self> {
        let mut table = SyscallTable::default();

        for line in data.split_terminator('\n') {
            let cols: Vec<_> = line.split('\t').collect();

            let (nr, name, kinds) = match cols.as_slice() {
                [nr, name, kinds] => (nr, name, kinds),
                _ => internal_error!(format!("malformed syscall table row: {:?}", line)),
            };

            let nr: SyscallNr = match nr.parse() {
                Ok(nr) => nr,
                Err(_) => internal_error!(format!("bad syscall number in row: {:?}", line)),
            };

            let arg_kinds = if *kinds == "-" {
                vec![]
            } else {
                match kinds.split(',').map(ArgKind::from_str).collect::<std::result::Result<Vec<_>, _>>() {
                    Ok(kinds) => kinds,
                    Err(err) => internal_error!(err),
                }
            };

            if arg_kinds.len() > MAX_SYSCALL_ARGS {
                internal_error!(format!("too many arguments for `{}`", name));
            }

            let name = name.to_string();
            table.by_name.insert(name.clone(), nr);
            table.by_nr.insert(nr, SyscallDescriptor { name, arg_kinds });
        }

        Ok(table)
    }

    pub fn lookup(&self, nr: SyscallNr) -> Option<&SyscallDescriptor> {
        self.by_nr.get(&nr)
    }

    /// Exact, case-sensitive reverse lookup.
    pub fn name_to_nr(&self, name: &str) -> Option<SyscallNr> {
        self.by_name.get(name).copied()
    }

    /// Name of syscall `nr`, or `sys_<nr>` if it is not in the table.
    pub fn name(&self, nr: SyscallNr) -> Cow<'_, str> {
        match self.lookup(nr) {
            Some(desc) => Cow::Borrowed(desc.name.as_str()),
            None => Cow::Owned(format!("sys_{}", nr)),
        }
    }

    /// All known syscalls, in ascending order of number.
    pub fn iter(&self) -> impl Iterator<Item = (SyscallNr, &SyscallDescriptor)> + '_ {
        self.by_nr.iter().map(|(nr, desc)| (*nr, desc))
    }

    pub fn len(&self) -> usize {
        self.by_nr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nr.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = SyscallTable::get();

        assert!(table.len() > 250);
        assert!(table.name_to_nr("write").is_some());
        assert!(table.name_to_nr("exit_group").is_some());
        assert!(table.name_to_nr("openat").is_some());
    }

    #[test]
    fn test_names_round_trip() {
        let table = SyscallTable::get();

        for (nr, desc) in table.iter() {
            assert_eq!(table.name_to_nr(&desc.name), Some(nr), "{}", desc.name);
        }
    }

    #[test]
    fn test_name_lookup_is_exact() {
        let table = SyscallTable::get();

        assert_eq!(table.name_to_nr("WRITE"), None);
        assert_eq!(table.name_to_nr("writ"), None);
        assert_eq!(table.name_to_nr(""), None);
    }

    #[test]
    fn test_unknown_number_is_synthesized() {
        let table = SyscallTable::get();

        assert!(table.lookup(100_000).is_none());
        assert_eq!(table.name(100_000), "sys_100000");
    }

    #[test]
    fn test_write_signature() {
        let table = SyscallTable::get();
        let nr = table.name_to_nr("write").unwrap();
        let desc = table.lookup(nr).unwrap();

        assert_eq!(desc.arg_kinds, [ArgKind::Integer, ArgKind::Pointer, ArgKind::Integer]);
        assert_eq!(table.name(nr), "write");
    }

    #[test]
    fn test_parse_rejects_malformed_rows() {
        assert!(SyscallTable::parse("0\tread\n").is_err());
        assert!(SyscallTable::parse("x\tread\ti\n").is_err());
        assert!(SyscallTable::parse("0\tread\tq\n").is_err());
        assert!(SyscallTable::parse("0\tread\ti,i,i,i,i,i,i\n").is_err());
    }

    #[test]
    fn test_parse_no_args() {
        let table = SyscallTable::parse("39\tgetpid\t-\n").unwrap();

        assert_eq!(table.lookup(39).unwrap().arg_count(), 0);
    }
}
