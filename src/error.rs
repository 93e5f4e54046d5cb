//! Engine-wide error taxonomy.
//!
//! Every logical request completes with `Result<_, RespackError>`. The type is
//! `Clone` because one outcome is fanned out to every merged waiter.

use thiserror::Error;

use crate::registry::StorageLocation;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RespackError {
    #[error("Manifest load failed ({origin}): {message}")]
    ManifestLoad {
        origin: StorageLocation,
        message: String,
    },

    #[error("Integrity check failed for {path}: {reason}")]
    Integrity { path: String, reason: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Double release of resource {0}")]
    DoubleRelease(String),

    #[error("Task {task} faulted: {message}")]
    TaskFault { task: String, message: String },

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown pack: {0}")]
    UnknownPack(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Load failed for {name}: {message}")]
    LoadFailed { name: String, message: String },

    #[error("No version check has completed yet")]
    NotChecked,

    #[error("Request cancelled")]
    Cancelled,

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

impl RespackError {
    /// Returns true for failures a download attempt may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Integrity { .. })
    }

    /// Returns true if the error aborts a whole version check.
    pub fn is_fatal_for_check(&self) -> bool {
        matches!(
            self,
            Self::ManifestLoad {
                origin: StorageLocation::Remote,
                ..
            }
        )
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}
