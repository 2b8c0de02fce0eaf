//! Lifecycle state machine.
//!
//! The authoritative program state, guarded by a mutex; transitions bind the
//! loader, the scan engine and the image tables into coherent start/stop
//! sequences. Starting discovers and opens the newest artifact, spawns the
//! scan thread and waits for it to report `RUNNING`; stopping signals the
//! scan loop, joins it, drops the program handle and clears the image
//! tables.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::cycle::{self, ScanContext};
use crate::image::ImageTables;
use crate::plugins::PluginDriver;
use crate::program::{self, ProgramHandle};
use crate::stats::{TimingStats, TimingStatsSnapshot};
use crate::sync::PiMutex;
use crate::watchdog::Heartbeat;

/// The five lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcState {
    /// No artifact available to run.
    Empty,
    /// Artifact opened, scan thread initializing.
    Init,
    /// Scan loop executing.
    Running,
    /// No program running; the resting state.
    Stopped,
    /// The last start attempt failed.
    Error,
}

impl std::fmt::Display for PlcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Empty => "EMPTY",
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Mutex-guarded lifecycle state; every change is logged at INFO.
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<PlcState>,
}

impl StateCell {
    fn new(initial: PlcState) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> PlcState {
        *self.inner.lock().expect("state lock poisoned")
    }

    pub(crate) fn set(&self, next: PlcState) {
        let mut state = self.inner.lock().expect("state lock poisoned");
        if *state != next {
            *state = next;
            info!("PLC state: {next}");
        }
    }

    /// Transition `from -> to` atomically; `false` when the state moved on.
    pub(crate) fn compare_set(&self, from: PlcState, to: PlcState) -> bool {
        let mut state = self.inner.lock().expect("state lock poisoned");
        if *state != from {
            return false;
        }
        *state = to;
        info!("PLC state: {to}");
        true
    }
}

struct ScanThread {
    handle: JoinHandle<()>,
    program: Arc<ProgramHandle>,
}

/// Binds loader, scan engine and plugin host into start/stop transitions.
pub struct LifecycleManager {
    state: Arc<StateCell>,
    scan: Mutex<Option<ScanThread>>,
    build_dir: PathBuf,
    tables: Arc<PiMutex<ImageTables>>,
    plugins: Arc<PluginDriver>,
    stats: Arc<Mutex<TimingStats>>,
    heartbeat: Arc<Heartbeat>,
    tick: Arc<AtomicU32>,
}

impl LifecycleManager {
    /// Create a manager in the `STOPPED` state.
    #[must_use]
    pub fn new(
        build_dir: PathBuf,
        tables: Arc<PiMutex<ImageTables>>,
        plugins: Arc<PluginDriver>,
    ) -> Self {
        Self {
            state: Arc::new(StateCell::new(PlcState::Stopped)),
            scan: Mutex::new(None),
            build_dir,
            tables,
            plugins,
            stats: Arc::new(Mutex::new(TimingStats::new())),
            heartbeat: Arc::new(Heartbeat::new()),
            tick: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PlcState {
        self.state.get()
    }

    /// Shared state cell (watchdog, scan loop).
    #[must_use]
    pub fn state_cell(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    /// Shared heartbeat the scan thread signs every cycle.
    #[must_use]
    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        self.heartbeat.clone()
    }

    /// The shared image tables.
    #[must_use]
    pub fn tables(&self) -> Arc<PiMutex<ImageTables>> {
        self.tables.clone()
    }

    /// Current cycle counter value.
    #[must_use]
    pub fn tick(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Snapshot of the timing statistics.
    #[must_use]
    pub fn stats_snapshot(&self) -> TimingStatsSnapshot {
        self.stats.lock().expect("stats lock poisoned").snapshot()
    }

    /// The loaded program, while one is loaded.
    #[must_use]
    pub fn debug_program(&self) -> Option<Arc<ProgramHandle>> {
        self.scan
            .lock()
            .expect("scan slot poisoned")
            .as_ref()
            .map(|scan| scan.program.clone())
    }

    /// Request a state transition. Re-entering the current state is a no-op
    /// returning `false`; otherwise `true` means the transition completed.
    pub fn set_state(&self, target: PlcState) -> bool {
        if self.state.get() == target {
            return false;
        }
        match target {
            PlcState::Running => self.start_program(),
            PlcState::Stopped => self.stop_program(),
            other => {
                self.state.set(other);
                true
            }
        }
    }

    /// Stop a running program if one is active; called at shutdown.
    pub fn cleanup(&self) {
        if self.scan.lock().expect("scan slot poisoned").is_some() {
            self.stop_program();
        }
    }

    fn start_program(&self) -> bool {
        match self.state.get() {
            PlcState::Stopped | PlcState::Error | PlcState::Empty => {}
            // A start is already in flight.
            _ => return false,
        }

        let Some(path) = program::discover_latest(&self.build_dir) else {
            error!(
                "no program artifact found in {}",
                self.build_dir.display()
            );
            self.state.set(PlcState::Empty);
            return false;
        };
        let program = match ProgramHandle::open(&path) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                error!("failed to open program artifact: {err}");
                self.state.set(PlcState::Error);
                return false;
            }
        };
        info!(
            "loaded control program '{}' (md5 {})",
            path.display(),
            program.md5()
        );
        self.state.set(PlcState::Init);

        let (ready_tx, ready_rx) = mpsc::channel();
        let context = ScanContext {
            program: program.clone(),
            tables: self.tables.clone(),
            plugins: self.plugins.clone(),
            stats: self.stats.clone(),
            heartbeat: self.heartbeat.clone(),
            tick: self.tick.clone(),
            state: self.state.clone(),
            ready: ready_tx,
        };
        let handle = match std::thread::Builder::new()
            .name("plc-scan".into())
            .spawn(move || cycle::run(context))
        {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to spawn scan thread: {err}");
                self.state.set(PlcState::Error);
                return false;
            }
        };
        *self.scan.lock().expect("scan slot poisoned") = Some(ScanThread { handle, program });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(()) => true,
            Err(_) => {
                error!("scan thread did not reach RUNNING");
                self.state.set(PlcState::Error);
                false
            }
        }
    }

    fn stop_program(&self) -> bool {
        self.state.set(PlcState::Stopped);
        let scan = self.scan.lock().expect("scan slot poisoned").take();
        if let Some(scan) = scan {
            if scan.handle.join().is_err() {
                error!("scan thread panicked");
            }
            drop(scan.program);
            info!("control program unloaded");
        }
        self.tables.lock().clear();
        true
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state.get())
            .field("build_dir", &self.build_dir)
            .finish_non_exhaustive()
    }
}
