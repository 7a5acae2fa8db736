mod cases;

pub(crate) use cases::*;

/// Routes `log` output of the code under test to the test harness.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
