//! Orchestrates a scan followed by a deletion batch.
//!
//! A [`RuntimeSession`] can be driven synchronously, or moved into a worker
//! thread with [`RuntimeSession::start_scan`] / [`RuntimeSession::start_delete`]
//! and handed back by [`Task::join`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use crate::classifier::{DirectoryClassifier, ScanMessage};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::log::SessionLog;
use crate::matcher::IgnorePatternMatcher;
use crate::protection::ProtectionSet;
use crate::recycle::{RecycleBin, SystemRecycleBin};
use crate::scheduler::{
    Decision, DeletionFailure, DeletionScheduler, DeletionUpdate, SchedulerState,
};
use crate::{DeletionSummary, ScanSummary};

/// Phase the session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    Idle,
    Scanning,
    Deleting,
    /// A deletion failed and the batch waits for a [`Decision`].
    AwaitingDecision,
}

impl WorkflowStep {
    fn name(self) -> &'static str {
        match self {
            WorkflowStep::Idle => "idle",
            WorkflowStep::Scanning => "scanning",
            WorkflowStep::Deleting => "deleting",
            WorkflowStep::AwaitingDecision => "awaiting a decision",
        }
    }
}

/// Everything a session reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Scan(ScanMessage),
    ScanFinished(ScanSummary),
    ScanCancelled(ScanSummary),
    ScanAborted(String),
    Deletion(DeletionUpdate),
    DeletionSuspended(DeletionFailure),
    DeletionCancelled(DeletionSummary),
    DeletionFinished(DeletionSummary),
    /// The requested phase could not start.
    Rejected(String),
}

pub struct RuntimeSession {
    config: SessionConfig,
    empty_folders: Vec<PathBuf>,
    protection: ProtectionSet,
    scheduler: Option<DeletionScheduler>,
    log: SessionLog,
    step: WorkflowStep,
    fs: Arc<dyn FileSystem>,
    recycle_bin: Arc<dyn RecycleBin>,
}

impl RuntimeSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backends(
            config,
            Arc::new(RealFileSystem),
            Arc::new(SystemRecycleBin::new()),
        )
    }

    pub fn with_backends(
        config: SessionConfig,
        fs: Arc<dyn FileSystem>,
        recycle_bin: Arc<dyn RecycleBin>,
    ) -> Self {
        let log = SessionLog::new(config.disable_logging);
        Self {
            config,
            empty_folders: Vec::new(),
            protection: ProtectionSet::new(),
            scheduler: None,
            log,
            step: WorkflowStep::Idle,
            fs,
            recycle_bin,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Changes take effect at the next scan or deletion batch.
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    /// Empty directories of the last scan, root last.
    pub fn empty_folders(&self) -> &[PathBuf] {
        &self.empty_folders
    }

    pub fn protection(&self) -> &ProtectionSet {
        &self.protection
    }

    pub fn protection_mut(&mut self) -> &mut ProtectionSet {
        &mut self.protection
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Counters of the current or last deletion batch.
    pub fn deletion_summary(&self) -> Option<DeletionSummary> {
        self.scheduler.as_ref().map(DeletionScheduler::summary)
    }

    /// Position of the deletion batch in the empty folder list.
    pub fn deletion_cursor(&self) -> usize {
        self.scheduler.as_ref().map_or(0, DeletionScheduler::cursor)
    }

    fn ensure_step(&self, expected: WorkflowStep, action: &'static str) -> Result<(), SessionError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(SessionError::WrongStep {
                action,
                step: self.step.name(),
            })
        }
    }

    /// Scans the configured root on the calling thread.
    pub fn scan(&mut self) -> Result<ScanSummary, SessionError> {
        self.scan_with_events(&AtomicBool::new(false), |_| {})
    }

    pub fn scan_with_events<F>(
        &mut self,
        cancel: &AtomicBool,
        mut on_event: F,
    ) -> Result<ScanSummary, SessionError>
    where
        F: FnMut(SessionEvent),
    {
        self.ensure_step(WorkflowStep::Idle, "scan")?;
        self.step = WorkflowStep::Scanning;

        self.empty_folders.clear();
        self.protection.clear();
        self.scheduler = None;
        self.log.set_disabled(self.config.disable_logging);
        self.log.add_spacer();
        self.log
            .add(format!("Started scan of {:?}", self.config.scan.root));

        let hide_errors = self.config.hide_scan_errors;
        let result = DirectoryClassifier::with_file_system(
            self.config.scan.clone(),
            Arc::clone(&self.fs),
        )
        .and_then(|classifier| {
            classifier.classify_with_progress(Some(cancel), &mut self.log, |message| {
                if hide_errors
                    && matches!(message, ScanMessage::Found(event) if event.status.is_error())
                {
                    return;
                }
                on_event(SessionEvent::Scan(message.clone()));
            })
        });

        self.step = WorkflowStep::Idle;

        match result {
            Ok(report) => {
                let summary = report.summary();
                self.empty_folders = report.empty_folders;
                if report.cancelled {
                    on_event(SessionEvent::ScanCancelled(summary));
                } else {
                    self.log.add(format!(
                        "Finished scan: {} empty directories found, {} directories checked",
                        summary.empty_folder_count, summary.folders_scanned
                    ));
                    on_event(SessionEvent::ScanFinished(summary));
                }
                Ok(summary)
            }
            Err(err) => {
                self.log.add(format!("Scan aborted: {err}"));
                on_event(SessionEvent::ScanAborted(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Deletes the empty folders of the last scan on the calling thread.
    pub fn delete(&mut self) -> Result<DeletionSummary, SessionError> {
        self.delete_with_events(Arc::new(AtomicBool::new(false)), |_| {})
    }

    pub fn delete_with_events<F>(
        &mut self,
        cancel: Arc<AtomicBool>,
        on_event: F,
    ) -> Result<DeletionSummary, SessionError>
    where
        F: FnMut(SessionEvent),
    {
        self.ensure_step(WorkflowStep::Idle, "delete")?;

        let matcher = IgnorePatternMatcher::new(
            &self.config.scan.ignore_file_patterns,
            self.config.scan.ignore_zero_byte_files,
        )?;
        self.scheduler = Some(DeletionScheduler::with_backends(
            self.empty_folders.clone(),
            self.config.delete.clone(),
            matcher,
            Arc::clone(&self.fs),
            Arc::clone(&self.recycle_bin),
        ));

        self.log.set_disabled(self.config.disable_logging);
        self.log.add_spacer();
        self.log.add(format!(
            "Started deletion of {} directories ({:?})",
            self.empty_folders.len(),
            self.config.delete.mode
        ));

        self.drive(cancel, on_event)
    }

    /// Answers a suspended deletion on the calling thread.
    pub fn resume_with_events<F>(
        &mut self,
        decision: Decision,
        cancel: Arc<AtomicBool>,
        mut on_event: F,
    ) -> Result<DeletionSummary, SessionError>
    where
        F: FnMut(SessionEvent),
    {
        self.ensure_step(WorkflowStep::AwaitingDecision, "resume deletion")?;
        let Some(scheduler) = self.scheduler.as_mut() else {
            return Err(SessionError::WrongStep {
                action: "resume deletion",
                step: self.step.name(),
            });
        };

        let aborted = scheduler.resume(decision)?;
        match decision {
            Decision::Abort => {
                if let Some(update) = aborted {
                    on_event(SessionEvent::Deletion(update));
                }
                let summary = scheduler.summary();
                self.log.add("Deletion process was aborted after an error");
                self.step = WorkflowStep::Idle;
                on_event(SessionEvent::DeletionCancelled(summary));
                Ok(summary)
            }
            Decision::Continue { ignore_all_errors } => {
                if ignore_all_errors {
                    self.log.add("Ignoring all further deletion errors");
                }
                self.drive(cancel, on_event)
            }
        }
    }

    fn drive<F>(
        &mut self,
        cancel: Arc<AtomicBool>,
        mut on_event: F,
    ) -> Result<DeletionSummary, SessionError>
    where
        F: FnMut(SessionEvent),
    {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return Err(SessionError::WrongStep {
                action: "delete",
                step: self.step.name(),
            });
        };

        scheduler.set_cancel_flag(cancel);
        self.step = WorkflowStep::Deleting;

        let state = scheduler
            .run(&self.protection, &mut self.log, |update| {
                on_event(SessionEvent::Deletion(update.clone()));
            })
            .clone();
        let summary = scheduler.summary();

        match state {
            SchedulerState::Suspended(failure) => {
                debug!("删除暂停，等待用户决定: {:?}", failure.path);
                self.step = WorkflowStep::AwaitingDecision;
                on_event(SessionEvent::DeletionSuspended(failure));
            }
            SchedulerState::Cancelled => {
                self.step = WorkflowStep::Idle;
                on_event(SessionEvent::DeletionCancelled(summary));
            }
            SchedulerState::Completed | SchedulerState::Idle | SchedulerState::Running => {
                self.step = WorkflowStep::Idle;
                on_event(SessionEvent::DeletionFinished(summary));
            }
        }

        Ok(summary)
    }

    /// Moves the session into a worker thread that runs a scan.
    pub fn start_scan(self) -> Task {
        self.spawn("scan", |session, cancel, sender| {
            session.scan_with_events(&cancel, |event| {
                let _ = sender.send(event);
            })?;
            Ok(())
        })
    }

    /// Moves the session into a worker thread that runs a deletion batch.
    pub fn start_delete(self) -> Task {
        self.spawn("delete", |session, cancel, sender| {
            session.delete_with_events(cancel, |event| {
                let _ = sender.send(event);
            })?;
            Ok(())
        })
    }

    /// Moves the session into a worker thread that answers a suspension.
    pub fn resume_deletion(self, decision: Decision) -> Task {
        self.spawn("delete", move |session, cancel, sender| {
            session.resume_with_events(decision, cancel, |event| {
                let _ = sender.send(event);
            })?;
            Ok(())
        })
    }

    fn spawn<F>(mut self, phase: &'static str, work: F) -> Task
    where
        F: FnOnce(&mut RuntimeSession, Arc<AtomicBool>, &mpsc::Sender<SessionEvent>) -> Result<(), SessionError>
            + Send
            + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);

        let handle = thread::spawn(move || {
            info!("启动{}线程", phase);
            match work(&mut self, worker_cancel, &sender) {
                // already reported as ScanAborted
                Err(SessionError::Scan(_)) | Ok(()) => {}
                Err(err) => {
                    let _ = sender.send(SessionEvent::Rejected(err.to_string()));
                }
            }
            self
        });

        Task {
            phase,
            events: receiver,
            cancel,
            handle,
        }
    }
}

/// A phase running on a worker thread.
///
/// Events arrive until the worker finishes; [`join`](Self::join) then hands
/// the session back.
pub struct Task {
    phase: &'static str,
    events: mpsc::Receiver<SessionEvent>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<RuntimeSession>,
}

impl Task {
    /// Asks the worker to stop at the next directory or list entry.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn events(&self) -> &mpsc::Receiver<SessionEvent> {
        &self.events
    }

    /// Next event, blocking until one arrives or the worker finishes.
    pub fn next_event(&self) -> Option<SessionEvent> {
        self.events.recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<RuntimeSession, SessionError> {
        self.handle
            .join()
            .map_err(|_| SessionError::WorkerPanicked(self.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeleteMode;
    use crate::scheduler::DeletionOutcome;
    use std::fs;
    use tempfile::TempDir;

    fn direct_config(root: &std::path::Path) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.scan.root = root.to_path_buf();
        config.delete.mode = DeleteMode::Direct;
        config
    }

    #[test]
    fn test_scan_then_delete() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("a").join("b"))?;
        fs::create_dir_all(root.join("keep"))?;
        fs::write(root.join("keep").join("data.txt"), "1")?;

        let mut session = RuntimeSession::new(direct_config(&root));
        let scan = session.scan()?;
        assert_eq!(scan.empty_folder_count, 2);
        assert_eq!(session.empty_folders()[0], root.join("a").join("b"));

        let summary = session.delete()?;
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(session.deletion_cursor(), 2);
        assert_eq!(session.step(), WorkflowStep::Idle);
        assert!(!root.join("a").exists());
        assert!(root.join("keep").join("data.txt").exists());
        Ok(())
    }

    #[test]
    fn test_protected_entry_survives() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("x"))?;
        fs::create_dir_all(root.join("y"))?;
        fs::write(root.join("file.txt"), "1")?;

        let mut session = RuntimeSession::new(direct_config(&root));
        session.scan()?;
        session.protection_mut().add(root.join("x"));

        let mut events = Vec::new();
        let summary =
            session.delete_with_events(Arc::new(AtomicBool::new(false)), |e| events.push(e))?;

        assert_eq!((summary.deleted, summary.protected), (1, 1));
        assert!(root.join("x").exists());
        assert!(!root.join("y").exists());
        assert!(matches!(events.last(), Some(SessionEvent::DeletionFinished(_))));
        Ok(())
    }

    #[test]
    fn test_new_scan_resets_list_and_protection() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("x"))?;
        fs::write(root.join("file.txt"), "1")?;

        let mut session = RuntimeSession::new(direct_config(&root));
        session.scan()?;
        session.protection_mut().add(root.join("x"));
        fs::create_dir(root.join("z"))?;

        session.scan()?;
        assert!(session.protection().is_empty());
        assert_eq!(session.empty_folders(), &[root.join("x"), root.join("z")]);
        Ok(())
    }

    #[test]
    fn test_failed_scan_reports_abort() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut session = RuntimeSession::new(direct_config(&temp_dir.path().join("missing")));

        let mut events = Vec::new();
        let result = session.scan_with_events(&AtomicBool::new(false), |e| events.push(e));

        assert!(matches!(result, Err(SessionError::Scan(_))));
        assert!(matches!(events.as_slice(), [SessionEvent::ScanAborted(_)]));
        assert_eq!(session.step(), WorkflowStep::Idle);
        assert!(session.log().as_str().contains("Scan aborted"));
        Ok(())
    }

    #[test]
    fn test_abort_reports_failed_entry_before_cancel() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("a"))?;
        fs::write(root.join("file.txt"), "1")?;

        let mut session = RuntimeSession::new(direct_config(&root));
        session.scan()?;
        fs::write(root.join("a").join("new.txt"), "late")?;

        let cancel = Arc::new(AtomicBool::new(false));
        let mut events = Vec::new();
        session.delete_with_events(Arc::clone(&cancel), |e| events.push(e))?;
        assert!(matches!(events.last(), Some(SessionEvent::DeletionSuspended(_))));
        assert_eq!(session.step(), WorkflowStep::AwaitingDecision);

        events.clear();
        let summary = session.resume_with_events(Decision::Abort, cancel, |e| events.push(e))?;

        assert_eq!(summary.failed, 1);
        match events.as_slice() {
            [SessionEvent::Deletion(update), SessionEvent::DeletionCancelled(_)] => {
                assert_eq!(update.path, root.join("a"));
                assert!(matches!(update.outcome, DeletionOutcome::Warning { .. }));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(session.deletion_cursor(), 1);
        assert!(root.join("a").join("new.txt").exists());
        Ok(())
    }

    #[test]
    fn test_resume_outside_suspension_is_rejected() {
        let mut session = RuntimeSession::new(SessionConfig::default());
        let result = session.resume_with_events(
            Decision::Abort,
            Arc::new(AtomicBool::new(false)),
            |_| {},
        );
        assert!(matches!(result, Err(SessionError::WrongStep { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_hidden_scan_errors_are_still_logged() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root)?;
        let target = TempDir::new()?;
        std::os::unix::fs::symlink(target.path(), root.join("link"))?;

        let mut config = direct_config(&root);
        config.hide_scan_errors = true;
        let mut session = RuntimeSession::new(config);

        let mut events = Vec::new();
        session.scan_with_events(&AtomicBool::new(false), |e| events.push(e))?;

        assert!(!events.iter().any(|e| matches!(
            e,
            SessionEvent::Scan(ScanMessage::Found(found)) if found.status.is_error()
        )));
        assert!(session.log().as_str().contains("symbolic link"));
        Ok(())
    }

    #[test]
    fn test_background_scan_hands_session_back() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("a"))?;
        fs::write(root.join("file.txt"), "1")?;

        let task = RuntimeSession::new(direct_config(&root)).start_scan();
        let events: Vec<SessionEvent> = task.events().iter().collect();
        let session = task.join()?;

        assert!(matches!(
            events.last(),
            Some(SessionEvent::ScanFinished(ScanSummary {
                empty_folder_count: 1,
                ..
            }))
        ));
        assert_eq!(session.empty_folders(), &[root.join("a")]);

        let task = session.start_delete();
        while let Some(event) = task.next_event() {
            if let SessionEvent::DeletionFinished(summary) = event {
                assert_eq!(summary.deleted, 1);
            }
        }
        let session = task.join()?;
        assert_eq!(session.step(), WorkflowStep::Idle);
        assert!(!root.join("a").exists());
        Ok(())
    }

    #[test]
    fn test_background_resume_without_suspension_is_rejected() -> anyhow::Result<()> {
        let session = RuntimeSession::new(SessionConfig::default());
        let task = session.resume_deletion(Decision::Continue {
            ignore_all_errors: false,
        });
        let events: Vec<SessionEvent> = task.events().iter().collect();
        task.join()?;
        assert!(matches!(events.as_slice(), [SessionEvent::Rejected(_)]));
        Ok(())
    }
}
