use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error};

/// How the recycle bin should behave for a single removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecyclePolicy {
    /// Report failures to the caller only.
    Silent,
    /// Report failures loudly as well.
    ShowErrors,
    /// Ask before every removal.
    AskEach,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecycleError {
    #[error("removal of {0:?} was declined")]
    Declined(std::path::PathBuf),

    #[error("could not move to recycle bin: {0}")]
    Failed(String),
}

/// Recoverable deletion.
pub trait RecycleBin: Send + Sync {
    fn recycle(&self, path: &Path, policy: RecyclePolicy) -> Result<(), RecycleError>;
}

pub type ConfirmHook = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// [`RecycleBin`] backed by the platform trash.
///
/// Without a confirmation hook, [`RecyclePolicy::AskEach`] declines every
/// removal.
#[derive(Default)]
pub struct SystemRecycleBin {
    confirm: Option<ConfirmHook>,
}

impl SystemRecycleBin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirmation<F>(confirm: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        Self {
            confirm: Some(Box::new(confirm)),
        }
    }
}

impl fmt::Debug for SystemRecycleBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemRecycleBin")
            .field("confirm", &self.confirm.is_some())
            .finish()
    }
}

impl RecycleBin for SystemRecycleBin {
    fn recycle(&self, path: &Path, policy: RecyclePolicy) -> Result<(), RecycleError> {
        if policy == RecyclePolicy::AskEach {
            let accepted = self.confirm.as_ref().is_some_and(|confirm| confirm(path));
            if !accepted {
                debug!("用户拒绝移至回收站: {:?}", path);
                return Err(RecycleError::Declined(path.to_path_buf()));
            }
        }

        trash::delete(path).map_err(|e| {
            if policy == RecyclePolicy::ShowErrors {
                error!("移至回收站失败 {:?}: {}", path, e);
            }
            RecycleError::Failed(e.to_string())
        })
    }
}
