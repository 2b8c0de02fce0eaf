//! Heartbeat watchdog.
//!
//! The scan thread stores the wall-clock second into an atomic every cycle;
//! an independent thread checks it every two seconds and terminates the
//! process when the value stalls while the lifecycle says `RUNNING`, so a
//! supervisor can restart a frozen runtime. Recovering a stuck real-time
//! loop in-process is not reliably safe.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::RuntimeError;
use crate::lifecycle::{PlcState, StateCell};

/// How often the watchdog samples the heartbeat.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// Wall-clock-second heartbeat cell; a torn read is impossible (single
/// 64-bit atomic).
#[derive(Debug, Default)]
pub struct Heartbeat(AtomicI64);

impl Heartbeat {
    /// Fresh heartbeat at zero.
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Store the current wall-clock second.
    pub fn beat(&self) {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.0.store(seconds, Ordering::SeqCst);
    }

    /// Last stored wall-clock second.
    #[must_use]
    pub fn read(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawn the watchdog thread.
pub fn spawn(
    heartbeat: Arc<Heartbeat>,
    state: Arc<StateCell>,
    keep_running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, RuntimeError> {
    std::thread::Builder::new()
        .name("watchdog".into())
        .spawn(move || {
            let mut last = heartbeat.read();
            loop {
                std::thread::sleep(WATCHDOG_INTERVAL);
                if !keep_running.load(Ordering::SeqCst) {
                    return;
                }
                let now = heartbeat.read();
                let stalled = now == last;
                last = now;
                if stalled && state.get() == PlcState::Running {
                    // Straight to stderr: the structured logger may be the
                    // thing that is stuck.
                    eprintln!("[watchdog] no heartbeat, scan thread unresponsive");
                    std::process::exit(1);
                }
            }
        })
        .map_err(|err| RuntimeError::ThreadSpawn(err.to_string().into()))
}
