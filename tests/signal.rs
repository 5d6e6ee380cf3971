use anyhow::Result;
use ntest::timeout;

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_signal_is_reported_then_delivered() -> Result<()> {
    let traced = trace(&["bash", "-c", "trap 'exit 5' USR1; kill -s USR1 $$; sleep 1"], |_| {})?;

    let notice = format!("+++ [{}] received (not delivered yet) signal \"SIGUSR1\" +++\n", traced.pid);
    assert!(traced.output.contains(&notice));

    // Only reached if the handler ran.
    assert_eq!(traced.code, 5);

    Ok(())
}
