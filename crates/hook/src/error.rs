//! Error types for the hook crate

use std::path::PathBuf;
use thiserror::Error;

/// Hook errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("failed to load library at {path}: {reason}")]
    LoadError { path: PathBuf, reason: String },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("runtime module is missing required symbols: {}", symbols.join(", "))]
    MissingSymbols { symbols: Vec<String> },

    #[error("failed to patch code at {address:#x}: {reason}")]
    Patch { address: usize, reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("extension name {name:?} is not a valid C string")]
    InvalidExtensionName { name: String },

    #[error("hooks are already installed in this process")]
    AlreadyInstalled,

    #[error("{cause}; detours still active at {}", hex_list(active))]
    RollbackFailed { cause: Box<HookError>, active: Vec<usize> },
}

fn hex_list(addresses: &[usize]) -> String {
    addresses
        .iter()
        .map(|a| format!("{a:#x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for hook operations
pub type HookResult<T> = Result<T, HookError>;
