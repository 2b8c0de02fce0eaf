//! Scan cycle engine.
//!
//! The real-time hot path: one thread, elevated to `SCHED_FIFO` with locked
//! pages, ticking the control program at the period the program itself
//! publishes. Per cycle it updates the timing statistics, runs the native
//! plugins' cycle hooks and the program logic inside the image-table
//! critical section, signs the heartbeat, counts overruns, and sleeps to
//! the absolute next deadline. The hot path performs no allocation and
//! surfaces no errors; everything it has to say becomes a statistic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tracing::info;

use crate::image::ImageTables;
use crate::lifecycle::{PlcState, StateCell};
use crate::plugins::PluginDriver;
use crate::program::ProgramHandle;
use crate::scheduler::{self, Clock, Micros, MonotonicClock};
use crate::stats::TimingStats;
use crate::sync::PiMutex;
use crate::watchdog::Heartbeat;

/// Fallback period when the program publishes a zero ticktime.
const DEFAULT_TICKTIME_NS: u64 = 20_000_000;

/// Everything the scan thread needs, cloned out of the lifecycle manager.
pub(crate) struct ScanContext {
    pub program: Arc<ProgramHandle>,
    pub tables: Arc<PiMutex<ImageTables>>,
    pub plugins: Arc<PluginDriver>,
    pub stats: Arc<Mutex<TimingStats>>,
    pub heartbeat: Arc<Heartbeat>,
    pub tick: Arc<AtomicU32>,
    pub state: Arc<StateCell>,
    pub ready: mpsc::Sender<()>,
}

/// Scan thread entry point. Initializes the program, publishes `RUNNING`,
/// then loops until the lifecycle state moves on.
pub(crate) fn run(context: ScanContext) {
    scheduler::set_realtime_priority();
    scheduler::lock_memory();

    {
        let mut tables = context.tables.lock();
        context.program.install_buffers(&tables);
        context.program.config_init();
        context.program.glue_vars();
        tables.fill_null_with_scratch();
    }

    if !context.state.compare_set(PlcState::Init, PlcState::Running) {
        // Stopped while initializing.
        return;
    }
    context
        .stats
        .lock()
        .expect("stats lock poisoned")
        .reset();
    let _ = context.ready.send(());
    info!("starting scan loop");

    let clock = MonotonicClock::new();
    let mut last_start_us: Micros = 0;
    let mut expected_start_us: Micros = 0;

    while context.state.get() == PlcState::Running {
        // Re-read each cycle: a running program may retune its own period.
        let mut period_ns = context.program.ticktime_ns();
        if period_ns == 0 {
            period_ns = DEFAULT_TICKTIME_NS;
        }
        let period_us = (period_ns / 1_000) as Micros;

        let now_us = clock.now_us();
        {
            let mut stats = context.stats.lock().expect("stats lock poisoned");
            if stats.scan_count() == 0 {
                expected_start_us = now_us + period_us;
                last_start_us = now_us;
                stats.seed_first_cycle();
            } else {
                stats.record_cycle(now_us - last_start_us, now_us - expected_start_us);
                last_start_us = now_us;
                expected_start_us += period_us;
            }
        }

        let scan_begin_us = clock.now_us();
        {
            let _tables = context.tables.lock();
            context.plugins.cycle_start();
            let tick = context.tick.fetch_add(1, Ordering::Relaxed);
            context.program.config_run(tick);
            context.program.update_time();
            context.heartbeat.beat();
            context.plugins.cycle_end();
        }
        let scan_end_us = clock.now_us();
        {
            let mut stats = context.stats.lock().expect("stats lock poisoned");
            stats.record_scan(scan_end_us - scan_begin_us, scan_end_us > expected_start_us);
        }

        clock.sleep_until_us(expected_start_us);
    }

    info!("scan loop stopped");
}
