use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::DeletionSummary;
use crate::config::{DeleteConfig, DeleteMode};
use crate::error::{DeleteFault, SessionError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::log::SessionLog;
use crate::matcher::IgnorePatternMatcher;
use crate::protection::ProtectionSet;
use crate::recycle::{RecycleBin, RecycleError, RecyclePolicy, SystemRecycleBin};

/// What happened to one entry of the deletion batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionOutcome {
    Deleted,
    Warning { message: String },
    /// The directory was gone before it could be deleted.
    Ignored,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionUpdate {
    pub path: PathBuf,
    pub outcome: DeletionOutcome,
    pub index: usize,
    pub total: usize,
}

/// The entry that halted the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub message: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Suspended(DeletionFailure),
    Cancelled,
    Completed,
}

impl SchedulerState {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Suspended(_) => "suspended",
            SchedulerState::Cancelled => "cancelled",
            SchedulerState::Completed => "completed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SchedulerState::Cancelled | SchedulerState::Completed)
    }
}

/// Answer to a suspended batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Abort,
    Continue { ignore_all_errors: bool },
}

/// Sequentially deletes the directories of a scan result.
///
/// The scheduler never walks backwards: the cursor only grows, and a failed
/// entry is reported and skipped once the caller decides to continue.
pub struct DeletionScheduler {
    queue: Vec<PathBuf>,
    cursor: usize,
    state: SchedulerState,
    config: DeleteConfig,
    matcher: IgnorePatternMatcher,
    fs: Arc<dyn FileSystem>,
    recycle_bin: Arc<dyn RecycleBin>,
    cancel: Arc<AtomicBool>,
    pending: Option<DeletionFailure>,
    deleted: usize,
    failed: usize,
    protected: usize,
}

impl DeletionScheduler {
    /// Creates a scheduler on the real filesystem and the system recycle bin.
    pub fn new(queue: Vec<PathBuf>, config: DeleteConfig, matcher: IgnorePatternMatcher) -> Self {
        Self::with_backends(
            queue,
            config,
            matcher,
            Arc::new(RealFileSystem),
            Arc::new(SystemRecycleBin::new()),
        )
    }

    pub fn with_backends(
        queue: Vec<PathBuf>,
        config: DeleteConfig,
        matcher: IgnorePatternMatcher,
        fs: Arc<dyn FileSystem>,
        recycle_bin: Arc<dyn RecycleBin>,
    ) -> Self {
        Self {
            queue,
            cursor: 0,
            state: SchedulerState::Idle,
            config,
            matcher,
            fs,
            recycle_bin,
            cancel: Arc::new(AtomicBool::new(false)),
            pending: None,
            deleted: 0,
            failed: 0,
            protected: 0,
        }
    }

    /// Replaces the flag polled before each entry.
    pub fn set_cancel_flag(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = cancel;
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn queue(&self) -> &[PathBuf] {
        &self.queue
    }

    pub fn ignore_all_errors(&self) -> bool {
        self.config.ignore_all_errors
    }

    pub fn summary(&self) -> DeletionSummary {
        DeletionSummary {
            deleted: self.deleted,
            failed: self.failed,
            protected: self.protected,
            total: self.queue.len(),
        }
    }

    /// Processes at most one entry.
    ///
    /// Returns `None` once the scheduler stops running; [`state`](Self::state)
    /// then tells whether it completed, was cancelled or is suspended.
    pub fn step(
        &mut self,
        protection: &ProtectionSet,
        log: &mut SessionLog,
    ) -> Option<DeletionUpdate> {
        match self.state {
            SchedulerState::Idle => {
                info!("开始删除 {} 个空目录 ({:?})", self.queue.len(), self.config.mode);
                self.state = SchedulerState::Running;
            }
            SchedulerState::Running => {}
            _ => return None,
        }

        if self.cursor >= self.queue.len() {
            self.complete(log);
            return None;
        }

        if self.cancel.load(Ordering::Relaxed) {
            match self.pending.clone() {
                Some(failure) => self.state = SchedulerState::Suspended(failure),
                None => {
                    log.add("Deletion process was cancelled");
                    info!("删除已取消，已处理 {}/{}", self.cursor, self.queue.len());
                    self.state = SchedulerState::Cancelled;
                }
            }
            return None;
        }

        let total = self.queue.len();

        // the warning for an entry the caller chose to skip
        if let Some(update) = self.take_pending() {
            self.complete_if_exhausted(log);
            return Some(update);
        }

        let index = self.cursor;
        let path = self.queue[index].clone();

        if protection.contains(&path) {
            debug!("跳过受保护目录: {:?}", path);
            log.add(format!("Skipped protected dir {path:?}"));
            self.protected += 1;
            self.cursor += 1;
            self.complete_if_exhausted(log);
            return Some(DeletionUpdate {
                path,
                outcome: DeletionOutcome::Protected,
                index,
                total,
            });
        }

        let outcome = match self.delete_entry(&path) {
            Ok(()) => {
                debug!("已删除: {:?}", path);
                log.add(format!("Deleted dir {path:?}"));
                self.deleted += 1;
                DeletionOutcome::Deleted
            }
            Err(DeleteFault::PermissionDenied(message)) => {
                warn!("无法删除 {:?}: {}", path, message);
                log.add(format!("Failed to delete dir {path:?}: {message}"));
                self.protected += 1;
                DeletionOutcome::Protected
            }
            Err(fault) => {
                let message = fault.to_string();
                warn!("删除失败 {:?}: {}", path, message);
                log.add(format!("Failed to delete dir {path:?} - Error message: {message}"));
                self.failed += 1;

                if !self.config.ignore_all_errors {
                    let failure = DeletionFailure {
                        path,
                        message,
                        index,
                    };
                    self.pending = Some(failure.clone());
                    self.state = SchedulerState::Suspended(failure);
                    return None;
                }

                DeletionOutcome::Warning { message }
            }
        };

        self.cursor += 1;

        if self.config.mode != DeleteMode::Simulate && self.config.pause_time_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.pause_time_ms));
        }

        self.complete_if_exhausted(log);
        Some(DeletionUpdate {
            path,
            outcome,
            index,
            total,
        })
    }

    /// Steps until the scheduler completes, is cancelled or suspends.
    pub fn run<F>(
        &mut self,
        protection: &ProtectionSet,
        log: &mut SessionLog,
        mut on_update: F,
    ) -> &SchedulerState
    where
        F: FnMut(&DeletionUpdate),
    {
        while let Some(update) = self.step(protection, log) {
            on_update(&update);
        }
        &self.state
    }

    /// Answers a suspension. The failed entry is never retried.
    ///
    /// On abort the failed entry's warning is returned, since no further
    /// [`step`](Self::step) will report it.
    pub fn resume(&mut self, decision: Decision) -> Result<Option<DeletionUpdate>, SessionError> {
        if !matches!(self.state, SchedulerState::Suspended(_)) {
            return Err(SessionError::WrongStep {
                action: "resume deletion",
                step: self.state.name(),
            });
        }

        match decision {
            Decision::Abort => {
                info!("用户中止删除");
                self.state = SchedulerState::Cancelled;
                Ok(self.take_pending())
            }
            Decision::Continue { ignore_all_errors } => {
                if ignore_all_errors {
                    self.config.ignore_all_errors = true;
                }
                self.state = SchedulerState::Running;
                Ok(None)
            }
        }
    }

    fn take_pending(&mut self) -> Option<DeletionUpdate> {
        let failure = self.pending.take()?;
        self.cursor += 1;
        Some(DeletionUpdate {
            path: failure.path,
            outcome: DeletionOutcome::Warning {
                message: failure.message,
            },
            index: failure.index,
            total: self.queue.len(),
        })
    }

    fn complete_if_exhausted(&mut self, log: &mut SessionLog) {
        if self.cursor >= self.queue.len() {
            self.complete(log);
        }
    }

    fn complete(&mut self, log: &mut SessionLog) {
        let summary = self.summary();
        log.add(format!(
            "Deletion finished: {} deleted, {} failed, {} protected of {}",
            summary.deleted, summary.failed, summary.protected, summary.total
        ));
        info!(
            "删除完成: 成功 {} 个，失败 {} 个，受保护 {} 个",
            summary.deleted, summary.failed, summary.protected
        );
        self.state = SchedulerState::Completed;
    }

    fn delete_entry(&self, path: &Path) -> Result<(), DeleteFault> {
        if self.config.mode == DeleteMode::Simulate {
            return Ok(());
        }

        if !self.fs.is_dir(path) {
            return Err(DeleteFault::Missing(path.to_path_buf()));
        }

        let files = self
            .fs
            .files(path)
            .map_err(|e| DeleteFault::Generic(e.to_string()))?;
        for file in &files {
            if let Some(pattern) = self.matcher.matches(&file.name, file.len) {
                debug!("删除垃圾文件 {:?} (匹配 {})", file.path, pattern);
                self.remove(&file.path)
                    .map_err(|cause| DeleteFault::trash_file(&file.path, cause))?;
            }
        }

        let remaining_files = self
            .fs
            .files(path)
            .map_err(|e| DeleteFault::Generic(e.to_string()))?;
        let subdirectories = self
            .fs
            .subdirectories(path)
            .map_err(|e| DeleteFault::Generic(e.to_string()))?;
        if !remaining_files.is_empty() || !subdirectories.is_empty() {
            return Err(DeleteFault::NoLongerEmpty(path.to_path_buf()));
        }

        self.remove(path)
    }

    fn remove(&self, path: &Path) -> Result<(), DeleteFault> {
        match self.config.mode {
            DeleteMode::Simulate => Ok(()),
            DeleteMode::Direct => {
                let result = if self.fs.is_dir(path) {
                    self.fs.remove_dir(path)
                } else {
                    self.fs.remove_file(path)
                };
                result.map_err(|e| DeleteFault::Generic(e.to_string()))
            }
            DeleteMode::RecycleBin => {
                if self.fs.is_locked(path) {
                    return Err(DeleteFault::PermissionDenied(format!(
                        "{path:?} is in use or not writable"
                    )));
                }
                self.recycle(path, RecyclePolicy::Silent)
            }
            DeleteMode::RecycleBinShowErrors => self.recycle(path, RecyclePolicy::ShowErrors),
            DeleteMode::RecycleBinWithQuestion => self.recycle(path, RecyclePolicy::AskEach),
        }
    }

    fn recycle(&self, path: &Path, policy: RecyclePolicy) -> Result<(), DeleteFault> {
        self.recycle_bin
            .recycle(path, policy)
            .map_err(|e| match e {
                // a declined entry is kept, like a protected one
                RecycleError::Declined(_) => DeleteFault::PermissionDenied(e.to_string()),
                RecycleError::Failed(message) => DeleteFault::Generic(message),
            })
    }
}
