use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::fs::{DirAttributes, FileSystem, RealFileSystem, is_path_too_long};
use crate::log::SessionLog;
use crate::matcher::IgnorePatternMatcher;

/// A progress text event is emitted every this many directories.
pub const PROGRESS_INTERVAL: usize = 100;

/// Verdict for a single directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationStatus {
    Empty,
    NotEmpty,
    Error { message: String },
    Ignored,
}

impl ClassificationStatus {
    pub fn is_empty(&self) -> bool {
        matches!(self, ClassificationStatus::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ClassificationStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub path: PathBuf,
    pub status: ClassificationStatus,
    pub message: Option<String>,
}

impl ScanEvent {
    pub fn new(path: PathBuf, status: ClassificationStatus) -> Self {
        Self {
            path,
            status,
            message: None,
        }
    }

    pub fn error(path: PathBuf, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            path,
            status: ClassificationStatus::Error {
                message: message.clone(),
            },
            message: Some(message),
        }
    }
}

/// What the classifier streams while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMessage {
    Found(ScanEvent),
    Progress { folders_scanned: usize, text: String },
}

/// Result of a complete (or cancelled) scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub root: PathBuf,
    pub root_status: Option<ClassificationStatus>,
    /// Empty directories in the order they were found, root last.
    pub empty_folders: Vec<PathBuf>,
    pub events: Vec<ScanEvent>,
    pub folders_scanned: usize,
    pub cancelled: bool,
}

impl ScanReport {
    pub fn summary(&self) -> crate::ScanSummary {
        crate::ScanSummary {
            empty_folder_count: self.empty_folders.len(),
            folders_scanned: self.folders_scanned,
        }
    }
}

/// Walks a tree and decides which directories are empty.
pub struct DirectoryClassifier {
    config: ScanConfig,
    matcher: IgnorePatternMatcher,
    ignore_substrings: Vec<String>,
    fs: Arc<dyn FileSystem>,
}

impl DirectoryClassifier {
    /// Creates a classifier on the real filesystem.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        Self::with_file_system(config, Arc::new(RealFileSystem))
    }

    pub fn with_file_system(config: ScanConfig, fs: Arc<dyn FileSystem>) -> Result<Self, ScanError> {
        let matcher =
            IgnorePatternMatcher::new(&config.ignore_file_patterns, config.ignore_zero_byte_files)?;
        let ignore_substrings = config
            .ignore_directory_substrings
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();

        Ok(Self {
            config,
            matcher,
            ignore_substrings,
            fs,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans the configured root.
    pub fn classify(&self) -> Result<ScanReport, ScanError> {
        let mut log = SessionLog::new(true);
        self.classify_with_progress(None, &mut log, |_| {})
    }

    /// Scans the configured root, streaming events to `on_message`.
    pub fn classify_with_progress<F>(
        &self,
        cancel: Option<&AtomicBool>,
        log: &mut SessionLog,
        on_message: F,
    ) -> Result<ScanReport, ScanError>
    where
        F: FnMut(&ScanMessage),
    {
        let root = self.resolve_root()?;
        info!("开始扫描空目录: {:?}", root);

        let mut walk = Walk {
            classifier: self,
            cancel,
            log,
            on_message,
            loop_faults: 0,
            report: ScanReport {
                root: root.clone(),
                ..Default::default()
            },
        };

        let root_status = walk.run(root.clone());

        // Error statuses have already been reported with their message.
        if !root_status.is_error() {
            walk.emit(ScanEvent::new(root.clone(), root_status.clone()));
        }
        walk.report.root_status = Some(root_status);

        if walk.loop_faults > self.config.infinite_loop_threshold {
            walk.log.add(format!(
                "Detected possible infinite-loop somewhere in the target path {root:?} (symbolic links can cause this)"
            ));
            warn!("扫描中止: 检测到可能的无限循环 {:?}", root);
            return Err(ScanError::LoopDetected {
                root,
                faults: walk.loop_faults,
            });
        }

        if walk.is_cancelled() {
            walk.log.add("Scan process was cancelled");
            walk.report.cancelled = true;
        }

        info!(
            "扫描完成: 检查了 {} 个目录，找到 {} 个空目录",
            walk.report.folders_scanned,
            walk.report.empty_folders.len()
        );

        Ok(walk.report)
    }

    fn resolve_root(&self) -> Result<PathBuf, ScanError> {
        let root = std::path::absolute(&self.config.root).map_err(|e| ScanError::InvalidRoot {
            path: self.config.root.clone(),
            reason: e.to_string(),
        })?;

        if !self.fs.is_dir(&root) {
            return Err(ScanError::InvalidRoot {
                path: root,
                reason: "not an existing directory".to_string(),
            });
        }

        Ok(root)
    }

    fn on_ignore_list(&self, path: &Path) -> bool {
        if self.ignore_substrings.is_empty() {
            return false;
        }
        let path = path.to_string_lossy().to_lowercase();
        self.ignore_substrings.iter().any(|s| path.contains(s.as_str()))
    }

    fn is_too_young(&self, attributes: &DirAttributes) -> bool {
        if self.config.min_folder_age_hours == 0 {
            return false;
        }
        let min_age = Duration::from_secs(u64::from(self.config.min_folder_age_hours) * 3600);
        // a creation time too close to the end of the platform's range never ages
        attributes.created.is_some_and(|created| {
            created
                .checked_add(min_age)
                .is_none_or(|ready| ready > SystemTime::now())
        })
    }
}

/// RFC 2822 local time, empty when chrono cannot represent it.
fn format_created(created: SystemTime) -> String {
    let seconds = match created.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).ok(),
        Err(before) => i64::try_from(before.duration().as_secs()).ok().map(|s| -s),
    };
    seconds
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.with_timezone(&Local).to_rfc2822())
        .unwrap_or_default()
}

/// A directory whose subdirectories are still being visited.
struct Frame {
    path: PathBuf,
    depth: usize,
    contains_files: bool,
    all_subdirectories_empty: bool,
    pending: std::vec::IntoIter<PathBuf>,
}

enum Entered {
    Done(ClassificationStatus),
    Descend(Frame),
}

enum NextChild {
    Visit(PathBuf),
    Fault(io::Error),
    Exhausted,
}

struct Walk<'a, F> {
    classifier: &'a DirectoryClassifier,
    cancel: Option<&'a AtomicBool>,
    log: &'a mut SessionLog,
    on_message: F,
    loop_faults: usize,
    report: ScanReport,
}

impl<F> Walk<'_, F>
where
    F: FnMut(&ScanMessage),
{
    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn emit(&mut self, event: ScanEvent) {
        if event.status.is_empty() {
            debug!("发现空目录: {:?}", event.path);
            self.report.empty_folders.push(event.path.clone());
        }
        let message = ScanMessage::Found(event);
        (self.on_message)(&message);
        if let ScanMessage::Found(event) = message {
            self.report.events.push(event);
        }
    }

    fn count_fault(&mut self, err: &io::Error) {
        if is_path_too_long(err) {
            self.loop_faults += 1;
        }
    }

    /// Classifies `root` depth-first with an explicit stack, children before parents.
    fn run(&mut self, root: PathBuf) -> ClassificationStatus {
        let mut stack = match self.enter(root, 1) {
            Entered::Done(status) => return status,
            Entered::Descend(frame) => vec![frame],
        };
        let mut completed: Option<(PathBuf, ClassificationStatus)> = None;

        while let Some(frame) = stack.last_mut() {
            if let Some((child, status)) = completed.take() {
                if status.is_empty() {
                    self.emit(ScanEvent::new(child, status));
                } else {
                    frame.all_subdirectories_empty = false;
                }
            }

            let status = match self.next_child(frame) {
                NextChild::Visit(child) => {
                    let depth = frame.depth + 1;
                    match self.enter(child.clone(), depth) {
                        Entered::Done(status) => completed = Some((child, status)),
                        Entered::Descend(next) => stack.push(next),
                    }
                    continue;
                }
                NextChild::Fault(err) => {
                    self.count_fault(&err);
                    let message = err.to_string();
                    self.log.add(format!(
                        "An unknown error occurred while trying to scan this directory: {:?} - Error message: {}",
                        frame.path, message
                    ));
                    warn!("扫描目录失败 {:?}: {}", frame.path, message);
                    self.emit(ScanEvent::error(frame.path.clone(), message.clone()));
                    ClassificationStatus::Error { message }
                }
                NextChild::Exhausted => {
                    if frame.all_subdirectories_empty && !frame.contains_files {
                        ClassificationStatus::Empty
                    } else {
                        ClassificationStatus::NotEmpty
                    }
                }
            };

            if let Some(done) = stack.pop() {
                if stack.is_empty() {
                    return status;
                }
                completed = Some((done.path, status));
            }
        }

        ClassificationStatus::NotEmpty
    }

    fn enter(&mut self, path: PathBuf, depth: usize) -> Entered {
        let classifier = self.classifier;
        let config = &classifier.config;

        if self.loop_faults > config.infinite_loop_threshold {
            let message = "Aborted - possible infinite-loop detected";
            self.emit(ScanEvent::error(path, message));
            return Entered::Done(ClassificationStatus::Error {
                message: message.to_string(),
            });
        }

        if config.max_depth.is_some_and(|max| depth > max) {
            return Entered::Done(ClassificationStatus::NotEmpty);
        }

        if self.is_cancelled() {
            return Entered::Done(ClassificationStatus::NotEmpty);
        }

        self.report.folders_scanned += 1;
        if self.report.folders_scanned % PROGRESS_INTERVAL == 0 {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (self.on_message)(&ScanMessage::Progress {
                folders_scanned: self.report.folders_scanned,
                text: format!("Checking directory: {name}"),
            });
        }

        let fs = &classifier.fs;
        let matcher = &classifier.matcher;

        let contains_files = match fs.files(&path) {
            Ok(files) => files.iter().any(|f| matcher.matches(&f.name, f.len).is_none()),
            Err(err) => {
                // unknown content is never treated as empty
                self.count_fault(&err);
                self.log
                    .add(format!("Failed to access files in {path:?}: {err}"));
                self.emit(ScanEvent::error(path.clone(), "Failed to access files"));
                true
            }
        };

        let subdirectories = match fs.subdirectories(&path) {
            Ok(dirs) => dirs,
            Err(err) => {
                self.count_fault(&err);
                self.log
                    .add(format!("Failed to access subdirectories in {path:?}: {err}"));
                let message = "Failed to access subdirectories";
                self.emit(ScanEvent::error(path, message));
                return Entered::Done(ClassificationStatus::Error {
                    message: message.to_string(),
                });
            }
        };

        if !contains_files && subdirectories.is_empty() {
            return Entered::Done(ClassificationStatus::Empty);
        }

        Entered::Descend(Frame {
            path,
            depth,
            contains_files,
            all_subdirectories_empty: true,
            pending: subdirectories.into_iter(),
        })
    }

    /// Picks the next subdirectory worth descending into, marking the frame
    /// non-empty for every child that is skipped.
    fn next_child(&mut self, frame: &mut Frame) -> NextChild {
        while let Some(child) = frame.pending.next() {
            if self.is_cancelled() {
                frame.all_subdirectories_empty = false;
                return NextChild::Exhausted;
            }

            let attributes = match self.classifier.fs.attributes(&child) {
                Ok(attributes) => attributes,
                Err(err) => return NextChild::Fault(err),
            };

            if self.is_ignored(&child, &attributes) {
                frame.all_subdirectories_empty = false;
                continue;
            }

            if self.classifier.is_too_young(&attributes) {
                let created = attributes.created.map(format_created).unwrap_or_default();
                let message = format!(
                    "Skipped young folder {:?}: created {} which is less than {} hours ago",
                    child, created, self.classifier.config.min_folder_age_hours
                );
                self.log.add(message);
                frame.all_subdirectories_empty = false;
                continue;
            }

            return NextChild::Visit(child);
        }

        NextChild::Exhausted
    }

    fn is_ignored(&mut self, child: &Path, attributes: &DirAttributes) -> bool {
        let classifier = self.classifier;
        let config = &classifier.config;

        if (config.keep_system_folders && attributes.system)
            || (config.ignore_hidden_folders && attributes.hidden)
        {
            return true;
        }

        if classifier.on_ignore_list(child) {
            self.log.add(format!(
                "Aborted scan of {child:?} because it is on the ignore list."
            ));
            self.emit(ScanEvent::new(
                child.to_path_buf(),
                ClassificationStatus::Ignored,
            ));
            return true;
        }

        if attributes.reparse_point {
            self.log.add(format!(
                "Aborted scan of {child:?} because it is a symbolic link"
            ));
            self.emit(ScanEvent::error(
                child.to_path_buf(),
                "Aborted because dir is a symbolic link",
            ));
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> ScanConfig {
        ScanConfig {
            root: root.to_path_buf(),
            ignore_file_patterns: vec!["thumbs.db".to_string()],
            ..Default::default()
        }
    }

    fn scan(config: ScanConfig) -> ScanReport {
        DirectoryClassifier::new(config).unwrap().classify().unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_age_gate_saturates_near_time_limit() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let classifier = DirectoryClassifier::new(ScanConfig {
            min_folder_age_hours: 1,
            ..config_for(temp_dir.path())
        })?;

        let far = SystemTime::UNIX_EPOCH + Duration::from_secs(i64::MAX as u64);
        let attributes = DirAttributes {
            created: Some(far),
            ..Default::default()
        };
        assert!(classifier.is_too_young(&attributes));
        assert_eq!(format_created(far), "");

        let old = DirAttributes {
            created: Some(SystemTime::UNIX_EPOCH),
            ..Default::default()
        };
        assert!(!classifier.is_too_young(&old));
        assert!(!format_created(SystemTime::UNIX_EPOCH).is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_root_is_empty() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let report = scan(config_for(temp_dir.path()));

        assert_eq!(report.root_status, Some(ClassificationStatus::Empty));
        assert_eq!(report.empty_folders, vec![temp_dir.path().to_path_buf()]);
        assert_eq!(report.folders_scanned, 1);
        Ok(())
    }

    #[test]
    fn test_zero_byte_scenario_order() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("a"))?;
        fs::create_dir(root.join("b"))?;
        fs::write(root.join("b").join("note.txt"), "")?;

        let report = scan(config_for(root));

        assert_eq!(
            report.empty_folders,
            vec![root.join("a"), root.join("b"), root.to_path_buf()]
        );
        assert_eq!(report.root_status, Some(ClassificationStatus::Empty));
        Ok(())
    }

    #[test]
    fn test_real_file_keeps_directory() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("docs").join("empty"))?;
        fs::write(root.join("docs").join("readme.md"), "content")?;

        let report = scan(config_for(root));

        assert_eq!(report.empty_folders, vec![root.join("docs").join("empty")]);
        assert_eq!(report.root_status, Some(ClassificationStatus::NotEmpty));
        Ok(())
    }

    #[test]
    fn test_trash_only_tree_is_empty() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("photos").join("2019"))?;
        fs::write(root.join("photos").join("Thumbs.db"), "cache")?;
        fs::write(root.join("photos").join("2019").join("thumbs.db"), "cache")?;

        let report = scan(config_for(root));

        assert_eq!(
            report.empty_folders,
            vec![
                root.join("photos").join("2019"),
                root.join("photos"),
                root.to_path_buf()
            ]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_subdirectory_blocks_parent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("empty"))?;
        let target = TempDir::new()?;
        std::os::unix::fs::symlink(target.path(), root.join("link"))?;

        let report = scan(config_for(root));

        assert_eq!(report.empty_folders, vec![root.join("empty")]);
        assert_eq!(report.root_status, Some(ClassificationStatus::NotEmpty));
        let link_event = report
            .events
            .iter()
            .find(|e| e.path == root.join("link"))
            .expect("symlink must be reported");
        assert!(link_event.status.is_error());
        Ok(())
    }

    #[test]
    fn test_max_depth_stops_descent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("l2").join("l3"))?;

        let report = scan(ScanConfig {
            max_depth: Some(2),
            ..config_for(root)
        });
        // l3 lies beyond the limit and counts as not empty
        assert!(report.empty_folders.is_empty());
        assert_eq!(report.folders_scanned, 2);

        let report = scan(ScanConfig {
            max_depth: Some(3),
            ..config_for(root)
        });
        assert_eq!(report.empty_folders.len(), 3);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_hidden_folders_are_skipped_silently() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join(".git"))?;

        let report = scan(ScanConfig {
            ignore_hidden_folders: true,
            ..config_for(root)
        });

        assert!(report.empty_folders.is_empty());
        assert!(report.events.iter().all(|e| e.path != root.join(".git")));
        Ok(())
    }

    #[test]
    fn test_ignore_list_reports_ignored() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("Node_Modules"))?;
        fs::create_dir(root.join("keep"))?;

        let report = scan(ScanConfig {
            ignore_directory_substrings: vec![String::new(), "node_modules".to_string()],
            ..config_for(root)
        });

        assert_eq!(report.empty_folders, vec![root.join("keep")]);
        assert!(report.events.contains(&ScanEvent::new(
            root.join("Node_Modules"),
            ClassificationStatus::Ignored
        )));
        Ok(())
    }

    #[test]
    fn test_young_folders_are_not_descended() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("fresh"))?;

        let classifier = DirectoryClassifier::new(ScanConfig {
            min_folder_age_hours: 24,
            ..config_for(root)
        })?;
        let mut log = SessionLog::new(false);
        let report = classifier.classify_with_progress(None, &mut log, |_| {})?;

        if fs::metadata(root.join("fresh"))?.created().is_ok() {
            assert!(report.empty_folders.is_empty());
            assert_eq!(report.root_status, Some(ClassificationStatus::NotEmpty));
            assert!(log.as_str().contains("young folder"));
        }
        Ok(())
    }

    #[test]
    fn test_cancelled_scan_keeps_nothing() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("a"))?;

        let cancel = AtomicBool::new(true);
        let classifier = DirectoryClassifier::new(config_for(temp_dir.path()))?;
        let mut log = SessionLog::new(false);
        let report = classifier.classify_with_progress(Some(&cancel), &mut log, |_| {})?;

        assert!(report.cancelled);
        assert!(report.empty_folders.is_empty());
        assert_eq!(report.folders_scanned, 0);
        assert!(log.as_str().contains("cancelled"));
        Ok(())
    }

    #[test]
    fn test_progress_is_throttled() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        for i in 0..250 {
            fs::create_dir(temp_dir.path().join(format!("dir_{i:03}")))?;
        }

        let classifier = DirectoryClassifier::new(config_for(temp_dir.path()))?;
        let mut log = SessionLog::new(true);
        let mut progress = Vec::new();
        let report = classifier.classify_with_progress(None, &mut log, |message| {
            if let ScanMessage::Progress {
                folders_scanned, ..
            } = message
            {
                progress.push(*folders_scanned);
            }
        })?;

        assert_eq!(report.folders_scanned, 251);
        assert_eq!(progress, vec![100, 200]);
        assert_eq!(report.empty_folders.len(), 251);
        Ok(())
    }

    #[test]
    fn test_deep_tree_does_not_overflow() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut deepest = temp_dir.path().to_path_buf();
        for _ in 0..200 {
            deepest.push("d");
        }
        fs::create_dir_all(&deepest)?;

        let report = scan(config_for(temp_dir.path()));
        assert_eq!(report.empty_folders.len(), 201);
        assert_eq!(report.empty_folders[0], deepest);
        Ok(())
    }

    #[test]
    fn test_scan_is_idempotent() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("x").join("y"))?;
        fs::create_dir_all(root.join("z"))?;
        fs::write(root.join("z").join("data.bin"), "1")?;

        let first = scan(config_for(root));
        let second = scan(config_for(root));
        assert_eq!(first.empty_folders, second.empty_folders);
        Ok(())
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let classifier = DirectoryClassifier::new(ScanConfig {
            root: PathBuf::from("/nonexistent/dirsweep/root"),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            classifier.classify(),
            Err(ScanError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = DirectoryClassifier::new(ScanConfig {
            ignore_file_patterns: vec!["/(unclosed/".to_string()],
            ..Default::default()
        });
        assert!(matches!(result, Err(ScanError::InvalidPattern { .. })));
    }
}
