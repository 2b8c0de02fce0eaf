//! Control socket server and text command protocol.
//!
//! A local stream socket at a well-known path accepts newline-terminated
//! text commands and answers with text lines; `DEBUG:` commands carry the
//! binary sub-protocol as hex. The socket file is removed and re-created at
//! startup and serves a bounded number of clients (the reference
//! configuration accepts one).

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::debug::{self, MAX_DEBUG_FRAME};
use crate::error::RuntimeError;
use crate::lifecycle::{LifecycleManager, PlcState};
use crate::settings::RuntimeSettings;

/// Largest accepted command line, terminator included.
pub const MAX_COMMAND_SIZE: usize = 8 * 1024;
/// Largest response line the server will emit.
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024;

/// Shared state the command handlers operate on.
#[derive(Clone)]
pub struct ControlContext {
    /// The lifecycle manager commands act upon.
    pub lifecycle: Arc<LifecycleManager>,
}

/// Execute one text command and produce the LF-terminated response line.
#[must_use]
pub fn handle_command(command: &str, context: &ControlContext) -> String {
    match command {
        "PING" => {
            debug!("received PING command");
            "PING:OK\n".to_string()
        }
        "STATUS" => {
            debug!("received STATUS command");
            format!("STATUS:{}\n", context.lifecycle.state())
        }
        "START" => {
            debug!("received START command");
            if context.lifecycle.state() == PlcState::Running {
                error!("received START command but PLC is already RUNNING");
                "START:ERROR_ALREADY_RUNNING\n".to_string()
            } else if context.lifecycle.set_state(PlcState::Running) {
                "START:OK\n".to_string()
            } else {
                "START:ERROR\n".to_string()
            }
        }
        "STOP" => {
            debug!("received STOP command");
            if context.lifecycle.set_state(PlcState::Stopped) {
                "STOP:OK\n".to_string()
            } else {
                "STOP:ERROR\n".to_string()
            }
        }
        "STATS" => {
            debug!("received STATS command");
            context.lifecycle.stats_snapshot().to_response()
        }
        _ if command.starts_with("DEBUG:") => {
            debug!("received DEBUG command");
            handle_debug(&command["DEBUG:".len()..], context)
        }
        other => {
            error!("unknown command received: {other}");
            "COMMAND:ERROR\n".to_string()
        }
    }
}

fn handle_debug(hex: &str, context: &ControlContext) -> String {
    let request = debug::parse_hex(hex);
    if request.is_empty() || request.len() > MAX_DEBUG_FRAME {
        return "DEBUG:ERROR_PARSING\n".to_string();
    }
    let Some(program) = context.lifecycle.debug_program() else {
        error!("DEBUG command received with no program loaded");
        return "DEBUG:ERROR_PROCESSING\n".to_string();
    };

    let mut frame = vec![0u8; MAX_DEBUG_FRAME];
    frame[..request.len()].copy_from_slice(&request);
    let tick = context.lifecycle.tick();
    let tables = context.lifecycle.tables();
    let response_len = {
        // Hold the image-table mutex so variable reads cannot race the scan.
        let _guard = tables.lock();
        debug::process_frame(&*program, tick, &mut frame, request.len())
    };
    if response_len == 0 {
        return "DEBUG:ERROR_PROCESSING\n".to_string();
    }
    let mut response = debug::format_hex(&frame[..response_len], "DEBUG:");
    response.push('\n');
    response
}

/// The control socket server; accepts clients on its own thread.
pub struct ControlServer;

impl ControlServer {
    /// Bind the socket (unlinking any stale file) and spawn the accept
    /// thread.
    pub fn spawn(
        settings: &RuntimeSettings,
        context: ControlContext,
        keep_running: Arc<AtomicBool>,
    ) -> Result<(), RuntimeError> {
        let path = settings.control_socket.clone();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        let listener = UnixListener::bind(&path).map_err(|err| {
            RuntimeError::Control(format!("bind {}: {err}", path.display()).into())
        })?;
        set_socket_permissions(&path)?;
        info!("control socket listening at {}", path.display());

        let max_clients = settings.max_clients.max(1);
        std::thread::Builder::new()
            .name("control".into())
            .spawn(move || accept_loop(listener, path, context, keep_running, max_clients))
            .map_err(|err| RuntimeError::ThreadSpawn(err.to_string().into()))?;
        Ok(())
    }
}

fn accept_loop(
    listener: UnixListener,
    path: PathBuf,
    context: ControlContext,
    keep_running: Arc<AtomicBool>,
    max_clients: usize,
) {
    let active = Arc::new(AtomicUsize::new(0));
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if active.load(Ordering::SeqCst) >= max_clients {
                    warn!("rejecting control client, {max_clients} already connected");
                    continue;
                }
                info!("control client connected");
                active.fetch_add(1, Ordering::SeqCst);
                let context = context.clone();
                let keep_running = keep_running.clone();
                let active_for_thread = active.clone();
                let spawned = std::thread::Builder::new()
                    .name("control-client".into())
                    .spawn(move || {
                        serve_client(stream, &context, &keep_running);
                        active_for_thread.fetch_sub(1, Ordering::SeqCst);
                    });
                if spawned.is_err() {
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                error!("control socket accept failed: {err}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
    let _ = std::fs::remove_file(&path);
    info!("control socket closed");
}

fn serve_client(stream: UnixStream, context: &ControlContext, keep_running: &AtomicBool) {
    let mut reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(err) => {
            error!("control client clone failed: {err}");
            return;
        }
    };
    let mut writer = stream;
    let mut line = String::new();

    while keep_running.load(Ordering::SeqCst) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                info!("control client disconnected");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!("control socket read failed: {err}");
                return;
            }
        }
        if line.len() > MAX_COMMAND_SIZE {
            error!("control command exceeds {MAX_COMMAND_SIZE} bytes");
            if writer.write_all(b"COMMAND:ERROR\n").is_err() {
                return;
            }
            continue;
        }
        let command = line.trim_end_matches(['\r', '\n']);
        debug!("received command: {command}");
        let response = handle_command(command, context);
        debug_assert!(response.len() <= MAX_RESPONSE_SIZE);
        if let Err(err) = writer.write_all(response.as_bytes()) {
            error!("error writing on control socket: {err}");
            return;
        }
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), RuntimeError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|err| RuntimeError::Control(format!("socket metadata: {err}").into()))?
        .permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)
        .map_err(|err| RuntimeError::Control(format!("socket chmod: {err}").into()))
}
