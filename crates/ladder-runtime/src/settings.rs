//! Runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use smol_str::SmolStr;
use tracing::Level;

/// Well-known control socket path.
pub const DEFAULT_CONTROL_SOCKET_PATH: &str = "/run/runtime/plc_runtime.socket";
/// Well-known log collector socket path.
pub const DEFAULT_LOG_SOCKET_PATH: &str = "/run/runtime/plc_logger.socket";

/// Everything configurable at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Directory scanned for `libplc_*` artifacts.
    pub build_dir: PathBuf,
    /// Plugin configuration file.
    pub plugins_conf: PathBuf,
    /// Control socket path.
    pub control_socket: PathBuf,
    /// Log collector socket path.
    pub log_socket: PathBuf,
    /// Concurrent control clients accepted.
    pub max_clients: usize,
    /// Mirror log records to stderr.
    pub print_logs: bool,
    /// Minimum log level.
    pub log_level: SmolStr,
    /// Period of the statistics reporter thread, off when `None`.
    pub stats_report_interval: Option<Duration>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("./build"),
            plugins_conf: PathBuf::from("./plugins.conf"),
            control_socket: PathBuf::from(DEFAULT_CONTROL_SOCKET_PATH),
            log_socket: PathBuf::from(DEFAULT_LOG_SOCKET_PATH),
            max_clients: 1,
            print_logs: false,
            log_level: SmolStr::new("info"),
            stats_report_interval: None,
        }
    }
}

impl RuntimeSettings {
    /// Parse the configured log level, falling back to INFO.
    #[must_use]
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}
