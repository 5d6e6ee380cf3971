use std::collections::BTreeSet;
use std::io::{self, Write};
use std::process;

use anyhow::{anyhow, bail, Result};
use ministrace::{Command, Pid, Session, SyscallNr, SyscallTable, TracerOptions};
use structopt::clap::{self, AppSettings, ErrorKind};
use structopt::StructOpt;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// A minimal syscall tracer
#[derive(StructOpt, Debug)]
#[structopt(name = "ministrace", setting = AppSettings::TrailingVarArg)]
struct Opt {
    /// List supported system calls
    #[structopt(short = "l", long = "list-syscalls")]
    list_syscalls: bool,

    /// Attach to already running process
    #[structopt(short = "p", long = "attach", value_name = "pid")]
    attach: Option<i32>,

    /// Follow forked child processes and cloned threads
    #[structopt(short = "f", long = "follow-forks")]
    follow_forks: bool,

    /// Pause on specified system call nr
    #[structopt(short = "n", long = "pause-snr", value_name = "nr", parse(try_from_str = parse_syscall_nr))]
    pause_snr: Option<SyscallNr>,

    /// Pause on specified system call name
    #[structopt(short = "a", long = "pause-sname", value_name = "name", parse(try_from_str = parse_syscall_name))]
    pause_sname: Option<SyscallNr>,

    /// Print the stack trace of the traced thread after each system call
    #[structopt(short = "k", long = "stack-traces")]
    stack_traces: bool,

    /// Trace only the specified (comma-separated) set of system calls
    #[structopt(short = "e", long = "trace", value_name = "syscall_set", parse(try_from_str = parse_syscall_set))]
    trace: Option<BTreeSet<SyscallNr>>,

    /// Run tracer process as a grandchild, not as the parent of the tracee
    #[structopt(short = "D", long = "daemonize")]
    daemonize: bool,

    /// Program to trace, followed by its arguments
    #[structopt(name = "program")]
    argv: Vec<String>,
}

impl Opt {
    // Exits with a usage error on invalid combinations.
    fn validate(&self) {
        let conflict = if self.pause_snr.is_some() && self.pause_sname.is_some() {
            Some("--pause-snr and --pause-sname are mutually exclusive")
        } else if self.attach.is_some() && !self.argv.is_empty() {
            Some("--attach cannot be used with a program")
        } else if self.attach.is_some() && self.daemonize {
            Some("--daemonize cannot be used with --attach")
        } else {
            None
        };

        if let Some(msg) = conflict {
            clap::Error::with_description(msg, ErrorKind::ArgumentConflict).exit();
        }

        if !self.list_syscalls && self.attach.is_none() && self.argv.is_empty() {
            let msg = "a program or --attach <pid> is required";
            clap::Error::with_description(msg, ErrorKind::MissingRequiredArgument).exit();
        }
    }

    fn tracer_options(&self) -> TracerOptions {
        TracerOptions {
            attach_to_tracee: self.attach.is_some(),
            follow_fork: self.follow_forks,
            daemonize: self.daemonize,
            pause_on_syscall_nr: self.pause_snr.or(self.pause_sname),
            syscall_filter: self.trace.clone(),
            print_stacktrace: self.stack_traces,
            tracee_pid: Pid::from_raw(self.attach.unwrap_or(0)),
        }
    }
}

fn parse_syscall_nr(s: &str) -> Result<SyscallNr> {
    let nr: SyscallNr = s.parse()?;

    if SyscallTable::get().lookup(nr).is_none() {
        bail!("{} is not a valid syscall", nr);
    }

    Ok(nr)
}

fn parse_syscall_name(s: &str) -> Result<SyscallNr> {
    SyscallTable::get()
        .name_to_nr(s)
        .ok_or_else(|| anyhow!("syscall w/ name \"{}\" doesn't exist", s))
}

fn parse_syscall_set(s: &str) -> Result<BTreeSet<SyscallNr>> {
    s.split(',').map(parse_syscall_name).collect()
}

fn list_syscalls() -> io::Result<()> {
    let mut out = io::stdout().lock();

    for (nr, desc) in SyscallTable::get().iter() {
        writeln!(out, "{}\t{}({})", nr, desc.name, desc.arg_count())?;
    }

    out.flush()
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    opt.validate();

    init_logging();

    if opt.list_syscalls {
        return match list_syscalls() {
            // E.g. piped into `head`.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            res => Ok(res?),
        };
    }

    let mut options = opt.tracer_options();

    if !options.attach_to_tracee {
        let cmd = Command::new(opt.argv.clone())?.daemonize(opt.daemonize);
        options.tracee_pid = cmd.spawn()?;
    }

    let code = Session::new(options).run()?;

    process::exit(code);
}
