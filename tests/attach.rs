use std::process::Command;

use anyhow::Result;
use ministrace::{Pid, TracerOptions};
use ntest::timeout;

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_attach_to_running_process() -> Result<()> {
    let child = Command::new("sleep").arg("1").spawn()?;
    let pid = Pid::from_raw(child.id() as i32);

    let options = TracerOptions {
        attach_to_tracee: true,
        tracee_pid: pid,
        ..TracerOptions::default()
    };

    // The session reaps the child, so `child` must not be waited on.
    let traced = run(options)?;

    assert_eq!(traced.code, 0);
    assert!(traced.output.contains("exit_group(0)"));
    assert!(traced.output.ends_with("+++ exited w/ 0 +++\n"));

    // Attaching interrupts a syscall in progress. Its exit is not printed.
    assert!(!traced.output.starts_with(" = "));

    Ok(())
}
