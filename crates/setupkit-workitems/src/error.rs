use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::KeyValue;

/// Failure of the hierarchical key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid key path '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("key '{key}' does not exist")]
    MissingKey { key: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt value file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a single mutation's apply or rollback.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("source does not exist: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("I/O error while {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "value '{name}' under '{key}' already holds a {} value, refusing to write a {} value",
        existing.kind(),
        requested.kind()
    )]
    IncompatibleValue {
        key: String,
        name: String,
        existing: KeyValue,
        requested: KeyValue,
    },

    #[error("{} was removed without a backup and cannot be restored", path.display())]
    Irreversible { path: PathBuf },
}

impl MutationError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
