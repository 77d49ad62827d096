use serde::{Deserialize, Serialize};

pub mod classifier;
pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod matcher;
pub mod protection;
pub mod recycle;
pub mod scheduler;
pub mod session;

pub use classifier::{ClassificationStatus, DirectoryClassifier, ScanEvent, ScanMessage, ScanReport};
pub use config::{DeleteConfig, DeleteMode, ScanConfig, SessionConfig};
pub use error::{DeleteFault, ScanError, SessionError};
pub use fs::{FileSystem, RealFileSystem};
pub use log::SessionLog;
pub use matcher::IgnorePatternMatcher;
pub use protection::ProtectionSet;
pub use recycle::{RecycleBin, RecycleError, RecyclePolicy, SystemRecycleBin};
pub use scheduler::{
    Decision, DeletionFailure, DeletionOutcome, DeletionScheduler, DeletionUpdate, SchedulerState,
};
pub use session::{RuntimeSession, SessionEvent, Task, WorkflowStep};

/// 扫描结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub empty_folder_count: usize,
    pub folders_scanned: usize,
}

/// 删除结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub deleted: usize,
    pub failed: usize,
    pub protected: usize,
    pub total: usize,
}

impl DeletionSummary {
    /// Entries that vanished before deletion or were never reached.
    pub fn skipped(&self) -> usize {
        self.total
            .saturating_sub(self.deleted + self.failed + self.protected)
    }
}
