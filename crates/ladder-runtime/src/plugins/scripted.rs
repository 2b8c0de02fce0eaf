//! Scripted plugin binding.
//!
//! A scripted plugin is a rhai script with a script-level `init` function
//! (required) and optional `start_loop`, `stop_loop`, `cleanup`. The host
//! compiles the script once, registers the runtime API on the engine
//! (image-table access under the shared mutex, logging at four levels, the
//! plugin config path and a `plugin_running` predicate), and runs
//! `start_loop` on a dedicated thread. Scripted plugins never execute on
//! the scan hot path; they synchronize with it solely through the
//! image-table mutex.
//!
//! A typical plugin:
//!
//! ```rhai
//! fn init() { log_info("ready, config at " + config_path()); }
//! fn start_loop() {
//!     while plugin_running() {
//!         let raw = read_int_input(0);
//!         write_int_output(0, raw * 2);
//!         sleep_ms(100);
//!     }
//! }
//! fn stop_loop() { log_info("bye"); }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rhai::module_resolvers::FileModuleResolver;
use rhai::{Dynamic, Engine, Scope, AST};
use smol_str::SmolStr;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::image::ImageTables;
use crate::sync::PiMutex;

use super::config::PluginConfig;

/// A compiled scripted plugin.
pub struct ScriptedBinding {
    name: SmolStr,
    engine: Arc<Engine>,
    ast: Arc<AST>,
    scope: Arc<Mutex<Scope<'static>>>,
    run_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    has_start: bool,
    has_stop: bool,
    has_cleanup: bool,
}

impl ScriptedBinding {
    /// Compile the script and check its lifecycle functions; `init` is
    /// mandatory.
    pub fn load(
        config: &PluginConfig,
        tables: Arc<PiMutex<ImageTables>>,
    ) -> Result<Self, RuntimeError> {
        let source = std::fs::read_to_string(&config.path).map_err(|err| {
            RuntimeError::PluginLoad {
                name: config.name.clone(),
                detail: format!("read {}: {err}", config.path.display()).into(),
            }
        })?;
        let run_flag = Arc::new(AtomicBool::new(false));
        let engine = build_engine(config, tables, run_flag.clone());
        let ast = engine
            .compile(&source)
            .map_err(|err| RuntimeError::PluginLoad {
                name: config.name.clone(),
                detail: format!("compile: {err}").into(),
            })?;

        let has_fn = |name: &str| ast.iter_functions().any(|f| f.name == name);
        if !has_fn("init") {
            return Err(RuntimeError::PluginLoad {
                name: config.name.clone(),
                detail: "script does not define 'init'".into(),
            });
        }
        let binding = Self {
            name: config.name.clone(),
            has_start: has_fn("start_loop"),
            has_stop: has_fn("stop_loop"),
            has_cleanup: has_fn("cleanup"),
            engine: Arc::new(engine),
            ast: Arc::new(ast),
            scope: Arc::new(Mutex::new(Scope::new())),
            run_flag,
            worker: Mutex::new(None),
        };
        debug!(
            "scripted plugin '{}' compiled (start_loop={} stop_loop={} cleanup={})",
            binding.name, binding.has_start, binding.has_stop, binding.has_cleanup,
        );
        Ok(binding)
    }

    /// Run the script's `init`.
    pub fn init(&self) -> Result<(), RuntimeError> {
        self.call("init").map_err(|detail| RuntimeError::PluginInit {
            name: self.name.clone(),
            detail: detail.into(),
        })
    }

    /// Mark the plugin running and launch `start_loop` on its own thread.
    /// Returns immediately; long-running work belongs to the worker.
    pub fn start(&self) {
        self.run_flag.store(true, Ordering::SeqCst);
        if !self.has_start {
            warn!("scripted plugin '{}' has no start_loop", self.name);
            return;
        }
        let engine = self.engine.clone();
        let ast = self.ast.clone();
        let scope = self.scope.clone();
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("plugin-{name}"))
            .spawn(move || {
                let mut scope = scope.lock().expect("plugin scope poisoned");
                if let Err(err) = engine.call_fn::<Dynamic>(&mut scope, &ast, "start_loop", ()) {
                    error!("scripted plugin '{name}' start_loop failed: {err}");
                }
            });
        match spawned {
            Ok(handle) => {
                *self.worker.lock().expect("plugin worker poisoned") = Some(handle);
                info!("scripted plugin '{}' started", self.name);
            }
            Err(err) => error!("scripted plugin '{}' worker spawn failed: {err}", self.name),
        }
    }

    /// Signal the worker to exit, join it, then run `stop_loop`. After this
    /// returns no script code executes again until the next `start`.
    pub fn stop(&self) {
        self.run_flag.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().expect("plugin worker poisoned").take() {
            if worker.join().is_err() {
                error!("scripted plugin '{}' worker panicked", self.name);
            }
        }
        if self.has_stop {
            if let Err(detail) = self.call("stop_loop") {
                error!("scripted plugin '{}' stop_loop failed: {detail}", self.name);
            } else {
                info!("scripted plugin '{}' stopped", self.name);
            }
        }
    }

    /// Run the script's `cleanup` if it defines one.
    pub fn cleanup(&self) {
        if self.has_cleanup {
            if let Err(detail) = self.call("cleanup") {
                error!("scripted plugin '{}' cleanup failed: {detail}", self.name);
            }
        }
    }

    fn call(&self, function: &str) -> Result<(), String> {
        let mut scope = self.scope.lock().expect("plugin scope poisoned");
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, function, ())
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

impl std::fmt::Debug for ScriptedBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBinding")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

macro_rules! register_scalar_table {
    ($engine:expr, $tables:expr, $read_name:literal, $read:ident, $write_name:literal, $write:ident, $ty:ty) => {{
        let tables = $tables.clone();
        $engine.register_fn($read_name, move |index: i64| -> i64 {
            usize::try_from(index)
                .ok()
                .and_then(|i| tables.lock().$read(i))
                .map_or(0, |value| value as i64)
        });
        let tables = $tables.clone();
        $engine.register_fn($write_name, move |index: i64, value: i64| -> bool {
            usize::try_from(index)
                .ok()
                .map_or(false, |i| tables.lock().$write(i, value as $ty))
        });
    }};
}

/// The host API every scripted plugin sees. Table reads return zero for
/// unbound slots; writes report whether the slot was bound.
fn build_engine(
    config: &PluginConfig,
    tables: Arc<PiMutex<ImageTables>>,
    run_flag: Arc<AtomicBool>,
) -> Engine {
    let mut engine = Engine::new();
    if let Some(dir) = &config.module_path {
        engine.set_module_resolver(FileModuleResolver::new_with_path(dir.clone()));
    }

    {
        let flag = run_flag;
        engine.register_fn("plugin_running", move || flag.load(Ordering::SeqCst));
    }
    {
        let path = config.config_path.display().to_string();
        engine.register_fn("config_path", move || path.clone());
    }
    engine.register_fn("sleep_ms", |millis: i64| {
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis as u64));
        }
    });

    let name = config.name.clone();
    {
        let name = name.clone();
        engine.register_fn("log_info", move |message: &str| {
            info!(target: "plugin", "[{name}] {message}");
        });
    }
    {
        let name = name.clone();
        engine.register_fn("log_debug", move |message: &str| {
            debug!(target: "plugin", "[{name}] {message}");
        });
    }
    {
        let name = name.clone();
        engine.register_fn("log_warn", move |message: &str| {
            warn!(target: "plugin", "[{name}] {message}");
        });
    }
    {
        let name = name.clone();
        engine.register_fn("log_error", move |message: &str| {
            error!(target: "plugin", "[{name}] {message}");
        });
    }

    {
        let t = tables.clone();
        engine.register_fn("read_bool_input", move |index: i64, bit: i64| -> bool {
            to_index(index, bit)
                .and_then(|(i, b)| t.lock().read_bool_in(i, b))
                .unwrap_or(false)
        });
        let t = tables.clone();
        engine.register_fn(
            "write_bool_input",
            move |index: i64, bit: i64, value: bool| -> bool {
                to_index(index, bit).map_or(false, |(i, b)| t.lock().write_bool_in(i, b, value))
            },
        );
        let t = tables.clone();
        engine.register_fn("read_bool_output", move |index: i64, bit: i64| -> bool {
            to_index(index, bit)
                .and_then(|(i, b)| t.lock().read_bool_out(i, b))
                .unwrap_or(false)
        });
        let t = tables.clone();
        engine.register_fn(
            "write_bool_output",
            move |index: i64, bit: i64, value: bool| -> bool {
                to_index(index, bit).map_or(false, |(i, b)| t.lock().write_bool_out(i, b, value))
            },
        );
    }

    register_scalar_table!(engine, tables, "read_byte_input", read_byte_in, "write_byte_input", write_byte_in, u8);
    register_scalar_table!(engine, tables, "read_byte_output", read_byte_out, "write_byte_output", write_byte_out, u8);
    register_scalar_table!(engine, tables, "read_int_input", read_int_in, "write_int_input", write_int_in, u16);
    register_scalar_table!(engine, tables, "read_int_output", read_int_out, "write_int_output", write_int_out, u16);
    register_scalar_table!(engine, tables, "read_dint_input", read_dint_in, "write_dint_input", write_dint_in, u32);
    register_scalar_table!(engine, tables, "read_dint_output", read_dint_out, "write_dint_output", write_dint_out, u32);
    register_scalar_table!(engine, tables, "read_lint_input", read_lint_in, "write_lint_input", write_lint_in, u64);
    register_scalar_table!(engine, tables, "read_lint_output", read_lint_out, "write_lint_output", write_lint_out, u64);
    register_scalar_table!(engine, tables, "read_int_memory", read_int_mem, "write_int_memory", write_int_mem, u16);
    register_scalar_table!(engine, tables, "read_dint_memory", read_dint_mem, "write_dint_memory", write_dint_mem, u32);
    register_scalar_table!(engine, tables, "read_lint_memory", read_lint_mem, "write_lint_memory", write_lint_mem, u64);

    engine
}

fn to_index(index: i64, bit: i64) -> Option<(usize, usize)> {
    Some((usize::try_from(index).ok()?, usize::try_from(bit).ok()?))
}
