//! Runtime errors.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised while opening a compiled program artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No artifact at the given path (or none discoverable).
    #[error("program artifact not found '{0}'")]
    NotFound(SmolStr),

    /// The artifact exists but the loader rejected it.
    #[error("malformed program artifact '{path}': {detail}")]
    Malformed { path: SmolStr, detail: SmolStr },

    /// A required symbol is absent from the artifact.
    #[error("missing symbol '{symbol}' in '{path}'")]
    SymbolMissing { symbol: SmolStr, path: SmolStr },
}

/// Errors for everything outside the scan hot path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Program artifact load failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Plugin configuration file error.
    #[error("plugin config error '{0}'")]
    PluginConfig(SmolStr),

    /// Plugin binding failure (missing entry point, bad script).
    #[error("plugin '{name}' load error: {detail}")]
    PluginLoad { name: SmolStr, detail: SmolStr },

    /// Plugin `init` failure; aborts the whole init sweep.
    #[error("plugin '{name}' init failed: {detail}")]
    PluginInit { name: SmolStr, detail: SmolStr },

    /// Control socket setup or protocol failure.
    #[error("control error '{0}'")]
    Control(SmolStr),

    /// Thread spawn error.
    #[error("thread spawn error '{0}'")]
    ThreadSpawn(SmolStr),
}
