/*++

Licensed under the Apache-2.0 license.

File Name:

    wait.rs

Abstract:

    File contains the clock abstraction and the bounded wait routine used for
    every hardware poll.

--*/

use crate::{SeError, SeResult};
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic time source for hardware waits.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock that advances by a fixed step on every reading.
#[derive(Debug)]
pub struct FakeClock {
    now_ns: AtomicU64,
    step_ns: u64,
}

impl FakeClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now_ns: AtomicU64::new(0),
            step_ns: step.as_nanos() as u64,
        }
    }

    /// Number of readings taken so far.
    pub fn readings(&self) -> u64 {
        match self.step_ns {
            0 => 0,
            step => self.now_ns.load(Ordering::Relaxed) / step,
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.fetch_add(self.step_ns, Ordering::Relaxed))
    }
}

impl<K: Clock + ?Sized> Clock for &K {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Poll `predicate` until it returns true or `budget` has elapsed on `clock`.
///
/// The predicate is always evaluated at least once, and once more after the
/// budget expires so a completion racing the deadline is not reported as a
/// timeout.
///
/// # Arguments
///
/// * `clock` - Time source
/// * `budget` - Maximum time to wait
/// * `predicate` - Condition to wait for
/// * `err` - Error returned on timeout
pub fn until_timeout<K, F>(clock: &K, budget: Duration, mut predicate: F, err: SeError) -> SeResult<()>
where
    K: Clock + ?Sized,
    F: FnMut() -> bool,
{
    let start = clock.now();
    loop {
        if predicate() {
            return Ok(());
        }
        if clock.now().saturating_sub(start) >= budget {
            break;
        }
        std::hint::spin_loop();
    }
    if predicate() {
        Ok(())
    } else {
        Err(err)
    }
}
