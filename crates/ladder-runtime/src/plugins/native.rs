//! Native plugin binding.
//!
//! A native plugin is a shared library exporting `init` plus any of the
//! optional hooks. At init time the host synthesizes a
//! [`PluginRuntimeArgs`] record; the pointer is valid only for the duration
//! of the call, so plugins copy what they need.

use std::ffi::{c_char, CStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::image::ImageTables;
use crate::sync::{pi_mutex_give, pi_mutex_take, PiMutex};
use ladder_plugin_api::{
    PluginHookFn, PluginInitFn, PluginRuntimeArgs, BITS_PER_CELL, BUFFER_SIZE,
    CONFIG_PATH_CAPACITY,
};

use super::config::PluginConfig;

/// Entry points bound from one native plugin library.
pub struct NativeBinding {
    name: SmolStr,
    init: PluginInitFn,
    start: Option<PluginHookFn>,
    stop: Option<PluginHookFn>,
    cycle_start: Option<PluginHookFn>,
    cycle_end: Option<PluginHookFn>,
    cleanup: Option<PluginHookFn>,
    _library: Library,
}

impl NativeBinding {
    /// Load the library and resolve its entry points; `init` is mandatory,
    /// the rest are recorded as absent when missing.
    pub fn load(config: &PluginConfig) -> Result<Self, RuntimeError> {
        let library = unsafe { Library::new(&config.path) }.map_err(|err| {
            RuntimeError::PluginLoad {
                name: config.name.clone(),
                detail: format!("load {}: {err}", config.path.display()).into(),
            }
        })?;
        let init: PluginInitFn = unsafe { library.get::<PluginInitFn>(b"init") }
            .map(|symbol| *symbol)
            .map_err(|_| RuntimeError::PluginLoad {
                name: config.name.clone(),
                detail: "required entry point 'init' not found".into(),
            })?;
        let hook = |name: &[u8]| -> Option<PluginHookFn> {
            unsafe { library.get::<PluginHookFn>(name) }
                .map(|symbol| *symbol)
                .ok()
        };
        let binding = Self {
            name: config.name.clone(),
            init,
            start: hook(b"start_loop"),
            stop: hook(b"stop_loop"),
            cycle_start: hook(b"cycle_start"),
            cycle_end: hook(b"cycle_end"),
            cleanup: hook(b"cleanup"),
            _library: library,
        };
        debug!(
            "native plugin '{}' bound (start_loop={} stop_loop={} cycle_start={} cycle_end={} cleanup={})",
            binding.name,
            binding.start.is_some(),
            binding.stop.is_some(),
            binding.cycle_start.is_some(),
            binding.cycle_end.is_some(),
            binding.cleanup.is_some(),
        );
        Ok(binding)
    }

    /// Call `init` with a freshly synthesized args record; nonzero return
    /// fails the plugin.
    pub fn init(
        &self,
        tables: &Arc<PiMutex<ImageTables>>,
        config_path: &Path,
    ) -> Result<(), RuntimeError> {
        let args = build_runtime_args(tables, config_path);
        let code = unsafe { (self.init)(&*args) };
        if code != 0 {
            return Err(RuntimeError::PluginInit {
                name: self.name.clone(),
                detail: format!("init returned {code}").into(),
            });
        }
        Ok(())
    }

    /// Invoke `start_loop` if bound.
    pub fn start(&self) {
        match self.start {
            Some(f) => {
                unsafe { f() };
                info!("native plugin '{}' started", self.name);
            }
            None => warn!("native plugin '{}' has no start_loop", self.name),
        }
    }

    /// Invoke `stop_loop` if bound.
    pub fn stop(&self) {
        if let Some(f) = self.stop {
            unsafe { f() };
            info!("native plugin '{}' stopped", self.name);
        }
    }

    /// Invoke `cleanup` if bound.
    pub fn cleanup(&self) {
        if let Some(f) = self.cleanup {
            unsafe { f() };
            info!("native plugin '{}' cleaned up", self.name);
        }
    }

    pub(crate) fn cycle_start(&self) {
        if let Some(f) = self.cycle_start {
            unsafe { f() };
        }
    }

    pub(crate) fn cycle_end(&self) {
        if let Some(f) = self.cycle_end {
            unsafe { f() };
        }
    }
}

impl std::fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBinding")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Synthesize the runtime-arguments record for one plugin. The table base
/// addresses are stable for the life of the shared tables; the record
/// itself lives only as long as the caller keeps the box.
pub(crate) fn build_runtime_args(
    tables: &Arc<PiMutex<ImageTables>>,
    config_path: &Path,
) -> Box<PluginRuntimeArgs> {
    let bases = unsafe { (*tables.data_ptr()).bases() };

    let mut path_buf = [0u8; CONFIG_PATH_CAPACITY];
    let path_bytes = config_path.as_os_str().as_bytes();
    let len = path_bytes.len().min(CONFIG_PATH_CAPACITY - 1);
    path_buf[..len].copy_from_slice(&path_bytes[..len]);

    Box::new(PluginRuntimeArgs {
        bool_in: bases.bool_in,
        bool_out: bases.bool_out,
        byte_in: bases.byte_in,
        byte_out: bases.byte_out,
        int_in: bases.int_in,
        int_out: bases.int_out,
        dint_in: bases.dint_in,
        dint_out: bases.dint_out,
        lint_in: bases.lint_in,
        lint_out: bases.lint_out,
        int_mem: bases.int_mem,
        dint_mem: bases.dint_mem,
        lint_mem: bases.lint_mem,
        mutex_take: pi_mutex_take,
        mutex_give: pi_mutex_give,
        buffer_mutex: tables.raw_handle(),
        config_path: path_buf,
        buffer_size: BUFFER_SIZE as u32,
        bits_per_cell: BITS_PER_CELL as u32,
        log_info: plugin_log_info,
        log_debug: plugin_log_debug,
        log_warn: plugin_log_warn,
        log_error: plugin_log_error,
    })
}

unsafe extern "C" fn plugin_log_info(message: *const c_char) {
    if let Some(text) = message_text(message) {
        info!(target: "plugin", "{text}");
    }
}

unsafe extern "C" fn plugin_log_debug(message: *const c_char) {
    if let Some(text) = message_text(message) {
        debug!(target: "plugin", "{text}");
    }
}

unsafe extern "C" fn plugin_log_warn(message: *const c_char) {
    if let Some(text) = message_text(message) {
        warn!(target: "plugin", "{text}");
    }
}

unsafe extern "C" fn plugin_log_error(message: *const c_char) {
    if let Some(text) = message_text(message) {
        error!(target: "plugin", "{text}");
    }
}

unsafe fn message_text(message: *const c_char) -> Option<String> {
    if message.is_null() {
        return None;
    }
    Some(CStr::from_ptr(message).to_string_lossy().into_owned())
}
