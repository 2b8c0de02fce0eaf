//! Plugin driver host.
//!
//! Loads the plugin configuration, binds native and scripted plugins, and
//! sweeps their lifecycle hooks in configuration order. All plugins share
//! one priority-inheriting mutex over the image tables; native plugins may
//! additionally hook the scan cycle (`cycle_start`/`cycle_end`), scripted
//! plugins run on their own threads and never touch the hot path.

mod config;
mod native;
mod scripted;

pub use config::{load_plugin_config, parse_plugin_config, PluginConfig, PluginKind, MAX_PLUGINS};
pub use native::NativeBinding;
pub use scripted::ScriptedBinding;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::image::ImageTables;
use crate::sync::PiMutex;

/// One hosted plugin: configuration, binding and run state.
#[derive(Debug)]
pub struct PluginInstance {
    config: PluginConfig,
    binding: PluginBinding,
    running: AtomicBool,
}

#[derive(Debug)]
enum PluginBinding {
    Native(NativeBinding),
    Scripted(ScriptedBinding),
}

impl PluginInstance {
    /// The plugin's parsed configuration.
    #[must_use]
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Whether the plugin is between `start` and `stop`.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Hosts every configured plugin around the shared image-table mutex.
pub struct PluginDriver {
    tables: Arc<PiMutex<ImageTables>>,
    plugins: RwLock<Vec<PluginInstance>>,
}

impl PluginDriver {
    /// Create an empty driver over the shared tables.
    #[must_use]
    pub fn new(tables: Arc<PiMutex<ImageTables>>) -> Self {
        Self {
            tables,
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Parse a configuration file and bind every listed plugin (disabled
    /// ones included; they are skipped at init/start time). Any binding
    /// failure fails the whole load and leaves the driver empty.
    pub fn load_config(&self, path: &Path) -> Result<usize, RuntimeError> {
        let configs = config::load_plugin_config(path)?;
        let mut plugins = Vec::with_capacity(configs.len());
        for cfg in configs {
            let binding = match cfg.kind {
                PluginKind::Native => PluginBinding::Native(NativeBinding::load(&cfg)?),
                PluginKind::Scripted => {
                    PluginBinding::Scripted(ScriptedBinding::load(&cfg, self.tables.clone())?)
                }
            };
            plugins.push(PluginInstance {
                config: cfg,
                binding,
                running: AtomicBool::new(false),
            });
        }
        let count = plugins.len();
        *self.plugins.write().expect("plugin registry poisoned") = plugins;
        Ok(count)
    }

    /// Number of bound plugins.
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().expect("plugin registry poisoned").len()
    }

    /// Initialize enabled plugins in configuration order. The first failure
    /// aborts the sweep.
    pub fn init(&self) -> Result<(), RuntimeError> {
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            if !plugin.config.enabled {
                debug!("skipping disabled plugin '{}'", plugin.config.name);
                continue;
            }
            match &plugin.binding {
                PluginBinding::Native(native) => {
                    native.init(&self.tables, &plugin.config.config_path)?;
                }
                PluginBinding::Scripted(scripted) => scripted.init()?,
            }
            info!("plugin '{}' initialized", plugin.config.name);
        }
        Ok(())
    }

    /// Start enabled plugins and mark them running. Scripted start returns
    /// immediately; its work lives on the plugin's own thread.
    pub fn start(&self) {
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            if !plugin.config.enabled {
                debug!("skipping disabled plugin during start: '{}'", plugin.config.name);
                continue;
            }
            match &plugin.binding {
                PluginBinding::Native(native) => native.start(),
                PluginBinding::Scripted(scripted) => scripted.start(),
            }
            plugin.running.store(true, Ordering::SeqCst);
        }
    }

    /// Stop enabled running plugins, clearing the running flag. Per-plugin
    /// failures are logged and the sweep continues; after this returns no
    /// scripted code executes.
    pub fn stop(&self) {
        info!("stopping all plugins");
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            if !plugin.config.enabled || !plugin.running() {
                continue;
            }
            match &plugin.binding {
                PluginBinding::Native(native) => native.stop(),
                PluginBinding::Scripted(scripted) => scripted.stop(),
            }
            plugin.running.store(false, Ordering::SeqCst);
        }
    }

    /// Stop, clean up, reload the configuration, then init and start again.
    /// If the reload fails the driver is left stopped and empty.
    pub fn restart(&self, config_path: &Path) -> Result<(), RuntimeError> {
        info!("restarting all plugins");
        self.stop();
        self.cleanup_all();
        self.plugins.write().expect("plugin registry poisoned").clear();
        self.load_config(config_path)?;
        self.init()?;
        self.start();
        Ok(())
    }

    /// Stop everything, run every plugin's cleanup and drop the bindings
    /// (closing native libraries). The driver ends up empty.
    pub fn destroy(&self) {
        self.stop();
        self.cleanup_all();
        self.plugins.write().expect("plugin registry poisoned").clear();
    }

    fn cleanup_all(&self) {
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            match &plugin.binding {
                PluginBinding::Native(native) => native.cleanup(),
                PluginBinding::Scripted(scripted) => scripted.cleanup(),
            }
        }
    }

    /// Scan-cycle entry hook: enabled, running native plugins in
    /// configuration order. Called with the image-table mutex held.
    pub(crate) fn cycle_start(&self) {
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            if !plugin.config.enabled || !plugin.running() {
                continue;
            }
            if let PluginBinding::Native(native) = &plugin.binding {
                native.cycle_start();
            }
        }
    }

    /// Scan-cycle exit hook; same iteration rules as [`Self::cycle_start`].
    pub(crate) fn cycle_end(&self) {
        let plugins = self.plugins.read().expect("plugin registry poisoned");
        for plugin in plugins.iter() {
            if !plugin.config.enabled || !plugin.running() {
                continue;
            }
            if let PluginBinding::Native(native) = &plugin.binding {
                native.cycle_end();
            }
        }
    }
}

impl std::fmt::Debug for PluginDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDriver")
            .field("plugins", &self.plugin_count())
            .finish_non_exhaustive()
    }
}
