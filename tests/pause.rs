use anyhow::Result;
use ministrace::SyscallTable;
use ntest::timeout;

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_pause_on_absent_syscall_never_blocks() -> Result<()> {
    let reboot = SyscallTable::get().name_to_nr("reboot");
    assert!(reboot.is_some());

    // `NoInput` panics if the session ever pauses.
    let traced = trace(&["true"], |options| {
        options.pause_on_syscall_nr = reboot;
    })?;

    assert_eq!(traced.code, 0);
    assert!(!traced.output.contains("reboot("));
    assert!(traced.output.ends_with("+++ exited w/ 0 +++\n"));

    Ok(())
}
