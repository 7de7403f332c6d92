// src/utils/test_support.rs
//! Helpers shared by unit tests

use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
