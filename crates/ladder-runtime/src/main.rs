//! `ladder-runtime` binary: wires logging, watchdog, control socket,
//! lifecycle and plugin driver together, then parks until SIGINT.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use smol_str::SmolStr;
use tracing::{error, info};

use ladder_runtime::control::{ControlContext, ControlServer};
use ladder_runtime::image::ImageTables;
use ladder_runtime::lifecycle::LifecycleManager;
use ladder_runtime::logging::{self, LogOptions};
use ladder_runtime::plugins::PluginDriver;
use ladder_runtime::settings::{
    RuntimeSettings, DEFAULT_CONTROL_SOCKET_PATH, DEFAULT_LOG_SOCKET_PATH,
};
use ladder_runtime::sync::PiMutex;
use ladder_runtime::watchdog;
use ladder_runtime::PlcState;

#[derive(Debug, Parser)]
#[command(name = "ladder-runtime", version, about = "Real-time PLC execution core")]
struct Cli {
    /// Directory scanned for compiled program artifacts.
    #[arg(long, default_value = "./build")]
    build_dir: PathBuf,

    /// Plugin configuration file.
    #[arg(long, default_value = "./plugins.conf")]
    plugins_conf: PathBuf,

    /// Control socket path.
    #[arg(long, default_value = DEFAULT_CONTROL_SOCKET_PATH)]
    control_socket: PathBuf,

    /// Log collector socket path.
    #[arg(long, default_value = DEFAULT_LOG_SOCKET_PATH)]
    log_socket: PathBuf,

    /// Concurrent control clients accepted.
    #[arg(long, default_value_t = 1)]
    max_clients: usize,

    /// Mirror log records to stderr.
    #[arg(long)]
    print_logs: bool,

    /// Minimum log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log a timing statistics snapshot every N seconds.
    #[arg(long)]
    stats_report_secs: Option<u64>,
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn handle_sigint(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() -> anyhow::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        let handler: unsafe extern "C" fn(libc::c_int) = handle_sigint;
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut()) != 0 {
            anyhow::bail!("sigaction failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = RuntimeSettings {
        build_dir: cli.build_dir,
        plugins_conf: cli.plugins_conf,
        control_socket: cli.control_socket,
        log_socket: cli.log_socket,
        max_clients: cli.max_clients,
        print_logs: cli.print_logs,
        log_level: SmolStr::new(&cli.log_level),
        stats_report_interval: cli.stats_report_secs.map(Duration::from_secs),
    };

    let keep_running = Arc::new(AtomicBool::new(true));
    let _log_transport = logging::init(
        &LogOptions {
            socket_path: settings.log_socket.clone(),
            print_logs: settings.print_logs,
            level: settings.log_level(),
        },
        keep_running.clone(),
    );
    install_sigint_handler()?;

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let plugins = Arc::new(PluginDriver::new(tables.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        settings.build_dir.clone(),
        tables,
        plugins.clone(),
    ));

    let _watchdog = watchdog::spawn(
        lifecycle.heartbeat(),
        lifecycle.state_cell(),
        keep_running.clone(),
    )?;
    ControlServer::spawn(
        &settings,
        ControlContext {
            lifecycle: lifecycle.clone(),
        },
        keep_running.clone(),
    )?;

    if !lifecycle.set_state(PlcState::Running) {
        error!("failed to start control program");
    }

    match plugins.load_config(&settings.plugins_conf) {
        Ok(count) => {
            info!("plugin driver loaded {count} plugin(s)");
            if let Err(err) = plugins.init() {
                error!("plugin init failed: {err}");
            } else {
                plugins.start();
                info!("plugin driver started");
            }
        }
        Err(err) => error!("failed to load plugin configuration: {err}"),
    }

    if let Some(interval) = settings.stats_report_interval {
        spawn_stats_reporter(lifecycle.clone(), keep_running.clone(), interval);
    }

    while !STOP_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
    }

    info!("shutting down");
    keep_running.store(false, Ordering::SeqCst);
    plugins.destroy();
    lifecycle.cleanup();
    Ok(())
}

fn spawn_stats_reporter(
    lifecycle: Arc<LifecycleManager>,
    keep_running: Arc<AtomicBool>,
    interval: Duration,
) {
    let _ = std::thread::Builder::new()
        .name("stats-reporter".into())
        .spawn(move || {
            while keep_running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                let snapshot = lifecycle.stats_snapshot();
                info!(
                    "timing: scans={} overruns={} scan_avg_us={:?} cycle_avg_us={:?} latency_avg_us={:?}",
                    snapshot.scan_count,
                    snapshot.overruns,
                    snapshot.scan_time_avg,
                    snapshot.cycle_time_avg,
                    snapshot.cycle_latency_avg,
                );
            }
        });
}
