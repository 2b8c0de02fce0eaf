//! Structured logging to the local log socket.
//!
//! A `tracing` layer turns every event into a timestamped record; a
//! transport thread drains the records to the log socket as one JSON object
//! per line. While the peer is unreachable the records collect in a
//! bounded ring (oldest overwritten) and flush on reconnect, so an absent
//! log collector never stalls or kills the runtime.

use std::collections::VecDeque;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Pending records kept while the log socket peer is away.
pub const LOG_RING_CAPACITY: usize = 1024;

/// Delay between reconnect attempts to the log socket.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Epoch seconds at emission.
    pub timestamp: i64,
    /// Record severity.
    pub level: Level,
    /// Rendered message text.
    pub message: String,
}

#[derive(Serialize)]
struct LogLine<'a> {
    timestamp: String,
    level: String,
    message: &'a str,
}

impl LogRecord {
    /// Render the newline-terminated JSON wire form.
    #[must_use]
    pub fn to_line(&self) -> String {
        let line = LogLine {
            timestamp: self.timestamp.to_string(),
            level: self.level.to_string(),
            message: &self.message,
        };
        let mut text = serde_json::to_string(&line).expect("log record serializes");
        text.push('\n');
        text
    }
}

/// Bounded FIFO of pending records; pushing past capacity drops the oldest.
#[derive(Debug, Default)]
pub struct RecordRing {
    records: VecDeque<LogRecord>,
}

impl RecordRing {
    /// Empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(LOG_RING_CAPACITY),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&mut self, record: LogRecord) {
        if self.records.len() == LOG_RING_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Re-queue a record that failed to send.
    pub fn push_front(&mut self, record: LogRecord) {
        if self.records.len() == LOG_RING_CAPACITY {
            self.records.pop_back();
        }
        self.records.push_front(record);
    }

    /// Take the oldest pending record.
    pub fn pop(&mut self) -> Option<LogRecord> {
        self.records.pop_front()
    }

    /// Pending record count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct TransportShared {
    ring: Mutex<RecordRing>,
    available: Condvar,
}

impl TransportShared {
    fn push(&self, record: LogRecord) {
        self.ring.lock().expect("log ring poisoned").push(record);
        self.available.notify_one();
    }
}

/// `tracing` layer feeding the socket transport.
pub struct SocketLayer {
    shared: Arc<TransportShared>,
}

impl<S: Subscriber> Layer<S> for SocketLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        self.shared.push(LogRecord {
            timestamp,
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Where the out-of-process collector listens.
    pub socket_path: PathBuf,
    /// Mirror records to stderr.
    pub print_logs: bool,
    /// Minimum level that reaches any sink.
    pub level: Level,
}

/// Install the global subscriber and start the transport thread.
pub fn init(options: &LogOptions, keep_running: Arc<AtomicBool>) -> JoinHandle<()> {
    let shared = Arc::new(TransportShared {
        ring: Mutex::new(RecordRing::new()),
        available: Condvar::new(),
    });
    tracing_subscriber::registry()
        .with(LevelFilter::from_level(options.level))
        .with(SocketLayer {
            shared: shared.clone(),
        })
        .with(
            options
                .print_logs
                .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();
    spawn_transport(options.socket_path.clone(), shared, keep_running)
}

fn spawn_transport(
    path: PathBuf,
    shared: Arc<TransportShared>,
    keep_running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("log-transport".into())
        .spawn(move || {
            let mut stream: Option<UnixStream> = None;
            loop {
                let record = {
                    let mut ring = shared.ring.lock().expect("log ring poisoned");
                    while ring.is_empty() {
                        if !keep_running.load(Ordering::SeqCst) {
                            return;
                        }
                        let (next, _) = shared
                            .available
                            .wait_timeout(ring, Duration::from_millis(500))
                            .expect("log ring wait poisoned");
                        ring = next;
                    }
                    match ring.pop() {
                        Some(record) => record,
                        None => continue,
                    }
                };

                if stream.is_none() {
                    match UnixStream::connect(&path) {
                        Ok(connected) => stream = Some(connected),
                        Err(_) => {
                            // Peer away; requeue and retry after the delay.
                            shared
                                .ring
                                .lock()
                                .expect("log ring poisoned")
                                .push_front(record);
                            std::thread::sleep(RECONNECT_DELAY);
                            continue;
                        }
                    }
                }

                let line = record.to_line();
                if let Some(connected) = stream.as_mut() {
                    if connected.write_all(line.as_bytes()).is_err() {
                        stream = None;
                        shared
                            .ring
                            .lock()
                            .expect("log ring poisoned")
                            .push_front(record);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        })
        .expect("log transport thread spawns")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: 1_700_000_000,
            level: Level::INFO,
            message: message.to_string(),
        }
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let mut ring = RecordRing::new();
        for i in 0..LOG_RING_CAPACITY + 5 {
            ring.push(record(&format!("m{i}")));
        }
        assert_eq!(ring.len(), LOG_RING_CAPACITY);
        assert_eq!(ring.pop().unwrap().message, "m5");
    }

    #[test]
    fn wire_form_is_one_json_object_per_line() {
        let line = record("plugin started").to_line();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["timestamp"], "1700000000");
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["message"], "plugin started");
    }
}
