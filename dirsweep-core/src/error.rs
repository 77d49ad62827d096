use std::path::PathBuf;
use thiserror::Error;

/// Fatal scan failures. Per-directory faults never surface here, they become
/// `ClassificationStatus::Error` events instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(
        "possible infinite loop detected below {root:?} ({faults} path-too-long faults, symbolic links can cause this)"
    )]
    LoopDetected { root: PathBuf, faults: usize },

    #[error("invalid scan root {path:?}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Why a single entry of the deletion batch could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeleteFault {
    /// The filesystem or OS refused access (locked file, no write access).
    #[error("{0}")]
    PermissionDenied(String),

    /// Something appeared in the directory between scan and deletion.
    #[error(
        "aborted deletion of {0:?} because it is no longer empty, this can happen if a trash file could not be deleted"
    )]
    NoLongerEmpty(PathBuf),

    /// The directory disappeared since the scan.
    #[error("{0:?} does not exist anymore")]
    Missing(PathBuf),

    #[error("{0}")]
    Generic(String),
}

impl DeleteFault {
    /// Wraps a failure to delete a disposable file, keeping its class.
    pub(crate) fn trash_file(path: &std::path::Path, cause: DeleteFault) -> Self {
        let msg = format!("could not delete trash file {path:?}: {cause}");
        match cause {
            DeleteFault::PermissionDenied(_) => DeleteFault::PermissionDenied(msg),
            _ => DeleteFault::Generic(msg),
        }
    }
}

/// Errors from the session orchestration layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("cannot {action} while the session is {step}")]
    WrongStep {
        action: &'static str,
        step: &'static str,
    },

    #[error("{0} worker thread panicked")]
    WorkerPanicked(&'static str),
}
