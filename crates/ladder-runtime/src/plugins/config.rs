//! Plugin configuration file parsing.
//!
//! Plain text, one plugin per line: `name, path, enabled, kind,
//! config_path[, module_path]`. Lines starting with `#` and blank lines are
//! ignored, lines with fewer than five fields are skipped, fields past the
//! sixth are ignored, and at most [`MAX_PLUGINS`] entries are read.

use std::path::{Path, PathBuf};

use smol_str::SmolStr;
use tracing::warn;

use crate::error::RuntimeError;

/// Most plugins one driver hosts.
pub const MAX_PLUGINS: usize = 16;

/// How a plugin is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Shared library with C entry points; may hook the scan cycle.
    Native,
    /// Script run by the embedded engine on its own thread.
    Scripted,
}

impl PluginKind {
    fn from_field(field: &str) -> Option<Self> {
        match field.trim().parse::<i64>().unwrap_or(0) {
            0 => Some(Self::Native),
            1 => Some(Self::Scripted),
            _ => None,
        }
    }
}

/// One parsed plugin entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Display name.
    pub name: SmolStr,
    /// Shared library or script path.
    pub path: PathBuf,
    /// Disabled plugins stay bound but are never initialized or started.
    pub enabled: bool,
    /// Native or scripted.
    pub kind: PluginKind,
    /// The plugin's own configuration file; opaque to the host.
    pub config_path: PathBuf,
    /// Module-resolution directory for scripted plugins.
    pub module_path: Option<PathBuf>,
}

/// Parse plugin configuration text.
#[must_use]
pub fn parse_plugin_config(text: &str) -> Vec<PluginConfig> {
    let mut configs = Vec::new();
    for line in text.lines() {
        if configs.len() == MAX_PLUGINS {
            warn!("plugin config truncated to {MAX_PLUGINS} entries");
            break;
        }
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            warn!("skipping malformed plugin line: {line}");
            continue;
        }
        let Some(kind) = PluginKind::from_field(fields[3]) else {
            warn!("skipping plugin '{}' with unknown kind '{}'", fields[0], fields[3]);
            continue;
        };
        let module_path = fields
            .get(5)
            .map(|field| field.trim())
            .filter(|field| !field.is_empty())
            .map(PathBuf::from);
        configs.push(PluginConfig {
            name: SmolStr::new(fields[0]),
            path: PathBuf::from(fields[1]),
            enabled: fields[2].parse::<i64>().unwrap_or(0) != 0,
            kind,
            config_path: PathBuf::from(fields[4]),
            module_path,
        });
    }
    configs
}

/// Read and parse a plugin configuration file.
pub fn load_plugin_config(path: &Path) -> Result<Vec<PluginConfig>, RuntimeError> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        RuntimeError::PluginConfig(format!("read {}: {err}", path.display()).into())
    })?;
    Ok(parse_plugin_config(&text))
}
