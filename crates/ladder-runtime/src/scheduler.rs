//! Clocks, absolute-deadline sleeps and real-time thread setup.
//!
//! The scan engine needs a monotonic clock whose sleep primitive takes an
//! absolute deadline so repeated cycles do not drift, plus best-effort
//! elevation to a `SCHED_FIFO` priority with locked memory pages. None of
//! these primitives fail visibly; they return the best-available time and
//! log when the platform refuses the real-time knobs.

use std::sync::{Condvar, Mutex};

use tracing::{error, info};

/// Monotonic microseconds since an arbitrary epoch.
pub type Micros = i64;

/// Clock interface for the scan scheduler.
pub trait Clock: Send + Sync + 'static {
    /// Current monotonic time in microseconds.
    fn now_us(&self) -> Micros;

    /// Block until the absolute deadline on the same clock.
    fn sleep_until_us(&self, deadline: Micros);

    /// Wake any sleepers (best-effort).
    fn wake(&self) {}
}

#[cfg(target_os = "linux")]
const MONOTONIC_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;
#[cfg(not(target_os = "linux"))]
const MONOTONIC_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Raw-monotonic clock with absolute-deadline sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a clock handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> Micros {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // Only fails for an invalid clock id.
        unsafe { libc::clock_gettime(MONOTONIC_CLOCK, &mut ts) };
        ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
    }

    #[cfg(target_os = "linux")]
    fn sleep_until_us(&self, deadline: Micros) {
        if deadline <= 0 {
            return;
        }
        // CLOCK_MONOTONIC_RAW is not a valid clock_nanosleep id; the RAW/
        // MONOTONIC drift over one cycle is far below the scheduler jitter.
        let ts = libc::timespec {
            tv_sec: deadline / 1_000_000,
            tv_nsec: (deadline % 1_000_000) * 1_000,
        };
        unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut(),
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep_until_us(&self, deadline: Micros) {
        let remaining = deadline - self.now_us();
        if remaining > 0 {
            std::thread::sleep(std::time::Duration::from_micros(remaining as u64));
        }
    }
}

#[derive(Debug)]
struct ManualClockState {
    now_us: Micros,
    sleep_calls: u64,
    interrupted: bool,
}

/// Deterministic clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    inner: std::sync::Arc<(Mutex<ManualClockState>, Condvar)>,
}

impl Clone for ManualClock {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ManualClock {
    /// Create a manual clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: std::sync::Arc::new((
                Mutex::new(ManualClockState {
                    now_us: 0,
                    sleep_calls: 0,
                    interrupted: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Advance time by the given number of microseconds.
    pub fn advance_us(&self, delta: Micros) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("manual clock lock poisoned");
        state.now_us = state.now_us.saturating_add(delta);
        cvar.notify_all();
    }

    /// Number of sleep calls issued against this clock.
    #[must_use]
    pub fn sleep_calls(&self) -> u64 {
        let (lock, _) = &*self.inner;
        lock.lock().expect("manual clock lock poisoned").sleep_calls
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> Micros {
        let (lock, _) = &*self.inner;
        lock.lock().expect("manual clock lock poisoned").now_us
    }

    fn sleep_until_us(&self, deadline: Micros) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("manual clock lock poisoned");
        state.sleep_calls = state.sleep_calls.saturating_add(1);
        while !state.interrupted && state.now_us < deadline {
            state = cvar.wait(state).expect("manual clock wait poisoned");
        }
    }

    fn wake(&self) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().expect("manual clock lock poisoned");
        state.interrupted = true;
        cvar.notify_all();
    }
}

/// Carry nanoseconds over into seconds until `tv_nsec < 1e9`.
pub fn timespec_normalize(ts: &mut libc::timespec) {
    while ts.tv_nsec >= 1_000_000_000 {
        ts.tv_nsec -= 1_000_000_000;
        ts.tv_sec += 1;
    }
}

/// `a - b` with borrow handling when `b > a` in the nanosecond field.
#[must_use]
pub fn timespec_diff(a: &libc::timespec, b: &libc::timespec) -> libc::timespec {
    let mut out = libc::timespec {
        tv_sec: a.tv_sec - b.tv_sec,
        tv_nsec: a.tv_nsec - b.tv_nsec,
    };
    if out.tv_nsec < 0 {
        out.tv_sec -= 1;
        out.tv_nsec += 1_000_000_000;
    }
    out
}

/// Scan thread `SCHED_FIFO` priority, mid-range of 1..=99.
pub const SCAN_THREAD_PRIORITY: libc::c_int = 20;

/// Elevate the calling thread to a FIFO real-time priority. Refusal (no
/// privilege, no RT scheduler) is logged, not fatal.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority() {
    let param = libc::sched_param {
        sched_priority: SCAN_THREAD_PRIORITY,
    };
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        error!(
            "sched_setscheduler failed: {}",
            std::io::Error::last_os_error()
        );
    } else {
        info!(
            "scheduler set to SCHED_FIFO, priority {}",
            SCAN_THREAD_PRIORITY
        );
    }
}

/// Real-time scheduling is a Linux feature; elsewhere this only logs.
#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority() {
    info!("real-time scheduling not available on this platform");
}

/// Lock current and future memory pages so the scan loop never page-faults.
#[cfg(target_os = "linux")]
pub fn lock_memory() {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        error!("mlockall failed: {}", std::io::Error::last_os_error());
    } else {
        info!("memory locked (MCL_CURRENT | MCL_FUTURE)");
    }
}

/// Memory locking is a Linux feature; elsewhere this only logs.
#[cfg(not(target_os = "linux"))]
pub fn lock_memory() {
    info!("memory locking not available on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn normalize_carries_whole_seconds() {
        let mut ts = libc::timespec {
            tv_sec: 1,
            tv_nsec: 2_500_000_000,
        };
        timespec_normalize(&mut ts);
        assert_eq!(ts.tv_sec, 3);
        assert_eq!(ts.tv_nsec, 500_000_000);
    }

    #[test]
    fn diff_borrows_from_seconds() {
        let a = libc::timespec {
            tv_sec: 5,
            tv_nsec: 100,
        };
        let b = libc::timespec {
            tv_sec: 3,
            tv_nsec: 200,
        };
        let d = timespec_diff(&a, &b);
        assert_eq!(d.tv_sec, 1);
        assert_eq!(d.tv_nsec, 999_999_900);
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_us() > a);
    }

    #[test]
    fn monotonic_sleep_hits_absolute_deadline() {
        let clock = MonotonicClock::new();
        let deadline = clock.now_us() + 3_000;
        clock.sleep_until_us(deadline);
        assert!(clock.now_us() >= deadline);
    }

    #[test]
    fn manual_clock_wakes_sleepers_on_advance() {
        let clock = ManualClock::new();
        let sleeper = clock.clone();
        let handle = std::thread::spawn(move || sleeper.sleep_until_us(500));
        while clock.sleep_calls() == 0 {
            std::thread::yield_now();
        }
        clock.advance_us(500);
        handle.join().unwrap();
        assert_eq!(clock.now_us(), 500);
    }
}
