//! `ladder-runtime` - real-time PLC execution core.
//!
//! Loads a compiled control program (a `libplc_*.so` artifact), drives it
//! through fixed-period scan cycles, hosts native and scripted field-I/O
//! plugins around a shared priority-inheriting image-table mutex, serves the
//! line-oriented control protocol on a local socket, and watches its own
//! heartbeat.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Control socket server and text command protocol.
pub mod control;
/// Scan cycle engine.
pub mod cycle;
/// Binary debug sub-protocol and hex codec.
pub mod debug;
/// Runtime errors.
pub mod error;
/// I/O image tables.
pub mod image;
/// Lifecycle state machine.
pub mod lifecycle;
/// Structured logging to the local log socket.
pub mod logging;
/// Plugin driver host.
pub mod plugins;
/// Compiled program loading and symbol binding.
pub mod program;
/// Clocks, deadline sleeps and real-time thread setup.
pub mod scheduler;
/// Runtime settings.
pub mod settings;
/// Scan timing statistics.
pub mod stats;
/// Priority-inheriting mutex.
pub mod sync;
/// Heartbeat watchdog.
pub mod watchdog;

pub use error::{LoadError, RuntimeError};
pub use lifecycle::{LifecycleManager, PlcState};
pub use settings::RuntimeSettings;
