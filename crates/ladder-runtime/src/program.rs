//! Compiled program loading and symbol binding.
//!
//! A control program is a shared library produced by the external compiler,
//! discovered as the newest `libplc_*` artifact in the build directory. The
//! handle owns the open library plus plain function pointers copied out of
//! it; the pointers stay valid exactly as long as the handle lives, and the
//! handle never runs program code itself - that is the lifecycle manager's
//! job.

use std::ffi::{c_char, c_void, CStr};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use libloading::Library;
use smol_str::SmolStr;
use tracing::debug;

use crate::debug::{ByteOrder, DebugTarget};
use crate::error::LoadError;
use crate::image::ImageTables;
use ladder_plugin_api::{IecBool, IecByte, IecUdint, IecUint, IecUlint, BITS_PER_CELL};

#[cfg(target_os = "macos")]
const ARTIFACT_SUFFIX: &str = ".dylib";
#[cfg(not(target_os = "macos"))]
const ARTIFACT_SUFFIX: &str = ".so";

type VoidFn = unsafe extern "C" fn();
type ConfigRunFn = unsafe extern "C" fn(u32);
type SetBufferPointersFn = unsafe extern "C" fn(
    *mut [*mut IecBool; BITS_PER_CELL],
    *mut [*mut IecBool; BITS_PER_CELL],
    *mut *mut IecByte,
    *mut *mut IecByte,
    *mut *mut IecUint,
    *mut *mut IecUint,
    *mut *mut IecUdint,
    *mut *mut IecUdint,
    *mut *mut IecUlint,
    *mut *mut IecUlint,
    *mut *mut IecUint,
    *mut *mut IecUdint,
    *mut *mut IecUlint,
);
type SetEndiannessFn = unsafe extern "C" fn(u8);
type GetVarCountFn = unsafe extern "C" fn() -> u16;
type GetVarSizeFn = unsafe extern "C" fn(usize) -> usize;
type GetVarAddrFn = unsafe extern "C" fn(usize) -> *mut c_void;
type SetTraceFn = unsafe extern "C" fn(usize, bool, *const c_void);

/// Optional debug symbols; absent bindings make the debug sub-protocol
/// report a processing error instead of failing the load.
#[derive(Default, Clone, Copy)]
struct DebugSymbols {
    set_endianness: Option<SetEndiannessFn>,
    get_var_count: Option<GetVarCountFn>,
    get_var_size: Option<GetVarSizeFn>,
    get_var_addr: Option<GetVarAddrFn>,
    set_trace: Option<SetTraceFn>,
}

/// A loaded control program with its bound symbol table.
pub struct ProgramHandle {
    path: PathBuf,
    md5: String,
    common_ticktime: *const u64,
    config_init: VoidFn,
    config_run: ConfigRunFn,
    glue_vars: VoidFn,
    update_time: VoidFn,
    set_buffer_pointers: SetBufferPointersFn,
    debug: DebugSymbols,
    // Dropped last; every pointer above derives from it.
    _library: Library,
}

// The bound pointers target the owned library. Program entry points are only
// invoked from the scan thread, debug symbols only under the image-table
// mutex.
unsafe impl Send for ProgramHandle {}
unsafe impl Sync for ProgramHandle {}

impl ProgramHandle {
    /// Open an artifact with immediate binding and local symbol visibility,
    /// resolving the whole symbol contract.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string().into()));
        }
        // libloading uses RTLD_NOW | RTLD_LOCAL on unix.
        let library = unsafe { Library::new(path) }.map_err(|err| LoadError::Malformed {
            path: path.display().to_string().into(),
            detail: err.to_string().into(),
        })?;

        let config_init: VoidFn = required(&library, "config_init", path)?;
        let config_run: ConfigRunFn = required(&library, "config_run", path)?;
        let glue_vars: VoidFn = required(&library, "glue_vars", path)?;
        let update_time: VoidFn = required(&library, "update_time", path)?;
        let set_buffer_pointers: SetBufferPointersFn =
            required(&library, "set_buffer_pointers", path)?;
        let common_ticktime: *const u64 = required(&library, "common_ticktime_ns", path)?;
        let md5_ptr: *const c_char = required(&library, "program_md5", path)?;
        let md5 = unsafe { CStr::from_ptr(md5_ptr) }
            .to_string_lossy()
            .into_owned();

        let debug = DebugSymbols {
            set_endianness: optional(&library, "set_endianness"),
            get_var_count: optional(&library, "get_var_count"),
            get_var_size: optional(&library, "get_var_size"),
            get_var_addr: optional(&library, "get_var_addr"),
            set_trace: optional(&library, "set_trace"),
        };
        let debug_symbols_status = if debug.get_var_count.is_some() {
            "present"
        } else {
            "absent"
        };
        debug!(
            "bound program '{}' (debug symbols: {})",
            path.display(),
            debug_symbols_status
        );

        Ok(Self {
            path: path.to_path_buf(),
            md5,
            common_ticktime,
            config_init,
            config_run,
            glue_vars,
            update_time,
            set_buffer_pointers,
            debug,
            _library: library,
        })
    }

    /// Path of the opened artifact.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ASCII MD5 the compiler stamped into the artifact.
    #[must_use]
    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Current scan period in nanoseconds, re-read every cycle so a running
    /// program can retune itself.
    #[must_use]
    pub fn ticktime_ns(&self) -> u64 {
        unsafe { self.common_ticktime.read_volatile() }
    }

    /// Hand the image-table base addresses to the program.
    pub fn install_buffers(&self, tables: &ImageTables) {
        let b = tables.bases();
        unsafe {
            (self.set_buffer_pointers)(
                b.bool_in, b.bool_out, b.byte_in, b.byte_out, b.int_in, b.int_out, b.dint_in,
                b.dint_out, b.lint_in, b.lint_out, b.int_mem, b.dint_mem, b.lint_mem,
            );
        }
    }

    /// Run the program's one-time initialization.
    pub fn config_init(&self) {
        unsafe { (self.config_init)() }
    }

    /// Let the program write its variable addresses into the image tables.
    pub fn glue_vars(&self) {
        unsafe { (self.glue_vars)() }
    }

    /// Execute one scan of the program logic.
    pub fn config_run(&self, tick: u32) {
        unsafe { (self.config_run)(tick) }
    }

    /// Advance the program's internal timekeeping.
    pub fn update_time(&self) {
        unsafe { (self.update_time)() }
    }
}

impl std::fmt::Debug for ProgramHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramHandle")
            .field("path", &self.path)
            .field("md5", &self.md5)
            .finish_non_exhaustive()
    }
}

impl DebugTarget for ProgramHandle {
    fn variable_count(&self) -> Option<u16> {
        self.debug.get_var_count.map(|f| unsafe { f() })
    }

    fn variable_bytes(&self, index: u16) -> Option<Vec<u8>> {
        let get_size = self.debug.get_var_size?;
        let get_addr = self.debug.get_var_addr?;
        let size = unsafe { get_size(index as usize) };
        let addr = unsafe { get_addr(index as usize) };
        if addr.is_null() {
            return None;
        }
        let mut bytes = vec![0u8; size];
        unsafe { std::ptr::copy_nonoverlapping(addr.cast::<u8>(), bytes.as_mut_ptr(), size) };
        Some(bytes)
    }

    fn set_trace(&self, index: u16, force: bool, value: Option<&[u8]>) -> bool {
        let Some(f) = self.debug.set_trace else {
            return false;
        };
        let ptr = value.map_or(std::ptr::null(), |v| v.as_ptr().cast());
        unsafe { f(index as usize, force, ptr) };
        true
    }

    fn set_endianness(&self, order: ByteOrder) -> bool {
        let Some(f) = self.debug.set_endianness else {
            return false;
        };
        unsafe { f(order.code()) };
        true
    }

    fn md5(&self) -> Option<String> {
        Some(self.md5.clone())
    }
}

fn required<T: Copy>(library: &Library, name: &str, path: &Path) -> Result<T, LoadError> {
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|_| LoadError::SymbolMissing {
            symbol: SmolStr::new(name),
            path: path.display().to_string().into(),
        })
}

fn optional<T: Copy>(library: &Library, name: &str) -> Option<T> {
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .ok()
}

/// Find the newest `libplc_*` artifact in `dir`, if any. The compile step
/// stamps artifacts with a nanosecond timestamp, so newest-wins matches the
/// upload order.
#[must_use]
pub fn discover_latest(dir: &Path) -> Option<PathBuf> {
    let pattern = dir.join(format!("libplc_*{ARTIFACT_SUFFIX}"));
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in glob::glob(pattern.to_str()?).ok()? {
        let Ok(path) = entry else { continue };
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(when, _)| modified > *when) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}
