//! Helpers shared by the unit tests of this crate.
//!
use std::time::Duration;

/// Poll `condition` until it holds, yielding to the runtime in between. Panics after a couple of
/// seconds so a broken test fails instead of hanging.
pub(crate) async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was not met in time");
}
