//! `ladder-plugin-api` - the stable C ABI between the ladder runtime and
//! native plugins.
//!
//! A native plugin is a shared library exporting `init` (required) and any of
//! `start_loop`, `stop_loop`, `cycle_start`, `cycle_end`, `cleanup`
//! (optional). At initialization the host passes a [`PluginRuntimeArgs`]
//! record; the pointer is valid only for the duration of the `init` call, so
//! plugins copy the fields they need.
//!
//! Everything in this crate is `#[repr(C)]` or a plain alias. The field order
//! of [`PluginRuntimeArgs`] is part of the ABI and must not change between
//! minor releases.

#![no_std]
#![warn(missing_docs)]

use core::ffi::{c_char, c_int, c_void};

/// IEC `BOOL` storage cell (one byte, zero or nonzero).
pub type IecBool = u8;
/// IEC `BYTE` storage cell.
pub type IecByte = u8;
/// IEC `UINT` storage cell (16-bit).
pub type IecUint = u16;
/// IEC `UDINT` storage cell (32-bit).
pub type IecUdint = u32;
/// IEC `ULINT` storage cell (64-bit).
pub type IecUlint = u64;

/// Slot count of every image table.
pub const BUFFER_SIZE: usize = 1024;
/// Bit positions per boolean table slot.
pub const BITS_PER_CELL: usize = 8;
/// Capacity of the per-plugin config path field, trailing NUL included.
pub const CONFIG_PATH_CAPACITY: usize = 256;

/// Plugin `init` entry point. Returns zero on success.
pub type PluginInitFn = unsafe extern "C" fn(*const PluginRuntimeArgs) -> c_int;
/// Optional parameterless plugin hooks (`start_loop`, `stop_loop`,
/// `cycle_start`, `cycle_end`, `cleanup`).
pub type PluginHookFn = unsafe extern "C" fn();

/// Image-table mutex lock/unlock shim. The operand is the opaque mutex
/// handle from [`PluginRuntimeArgs::buffer_mutex`]; returns zero on success.
pub type PluginMutexFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// Host logging shim taking a NUL-terminated message.
pub type PluginLogFn = unsafe extern "C" fn(*const c_char);

/// Everything a native plugin receives at `init` time.
///
/// The thirteen table pointers address the image tables the scan cycle
/// exchanges with the control program. Each table is an array of
/// `BUFFER_SIZE` cell pointers (the boolean tables an array of
/// `BITS_PER_CELL`-wide pointer rows); a cell pointer is never NULL while
/// the runtime is between `start_loop` and `stop_loop`. Any access to a cell
/// must happen between `mutex_take(buffer_mutex)` and
/// `mutex_give(buffer_mutex)`, and the critical section must stay short:
/// the scan thread shares this mutex.
#[repr(C)]
pub struct PluginRuntimeArgs {
    /// `bool_in[BUFFER_SIZE][BITS_PER_CELL]` base.
    pub bool_in: *mut [*mut IecBool; BITS_PER_CELL],
    /// `bool_out[BUFFER_SIZE][BITS_PER_CELL]` base.
    pub bool_out: *mut [*mut IecBool; BITS_PER_CELL],
    /// `byte_in[BUFFER_SIZE]` base.
    pub byte_in: *mut *mut IecByte,
    /// `byte_out[BUFFER_SIZE]` base.
    pub byte_out: *mut *mut IecByte,
    /// `int_in[BUFFER_SIZE]` base.
    pub int_in: *mut *mut IecUint,
    /// `int_out[BUFFER_SIZE]` base.
    pub int_out: *mut *mut IecUint,
    /// `dint_in[BUFFER_SIZE]` base.
    pub dint_in: *mut *mut IecUdint,
    /// `dint_out[BUFFER_SIZE]` base.
    pub dint_out: *mut *mut IecUdint,
    /// `lint_in[BUFFER_SIZE]` base.
    pub lint_in: *mut *mut IecUlint,
    /// `lint_out[BUFFER_SIZE]` base.
    pub lint_out: *mut *mut IecUlint,
    /// `int_mem[BUFFER_SIZE]` base.
    pub int_mem: *mut *mut IecUint,
    /// `dint_mem[BUFFER_SIZE]` base.
    pub dint_mem: *mut *mut IecUdint,
    /// `lint_mem[BUFFER_SIZE]` base.
    pub lint_mem: *mut *mut IecUlint,

    /// Lock the shared image-table mutex.
    pub mutex_take: PluginMutexFn,
    /// Unlock the shared image-table mutex.
    pub mutex_give: PluginMutexFn,
    /// Opaque handle of the priority-inheriting image-table mutex.
    pub buffer_mutex: *mut c_void,

    /// NUL-terminated path of this plugin's own configuration file.
    pub config_path: [u8; CONFIG_PATH_CAPACITY],

    /// Slot count of every table (`BUFFER_SIZE`).
    pub buffer_size: u32,
    /// Bit positions per boolean slot (`BITS_PER_CELL`).
    pub bits_per_cell: u32,

    /// Log at INFO through the host.
    pub log_info: PluginLogFn,
    /// Log at DEBUG through the host.
    pub log_debug: PluginLogFn,
    /// Log at WARN through the host.
    pub log_warn: PluginLogFn,
    /// Log at ERROR through the host.
    pub log_error: PluginLogFn,
}
