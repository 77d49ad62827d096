use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scan settings, snapshotted when a scan starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub root: PathBuf,
    /// Deepest level to inspect, the root being level 1. `None` is unlimited.
    pub max_depth: Option<usize>,
    /// Directories created less than this many hours ago are never descended.
    pub min_folder_age_hours: u32,
    pub ignore_hidden_folders: bool,
    pub keep_system_folders: bool,
    /// File patterns whose matches do not keep a directory alive.
    pub ignore_file_patterns: Vec<String>,
    /// Directories whose path contains one of these (case-insensitive) are skipped.
    pub ignore_directory_substrings: Vec<String>,
    pub ignore_zero_byte_files: bool,
    /// Number of path-too-long faults tolerated before the scan is aborted.
    pub infinite_loop_threshold: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            max_depth: None,
            min_folder_age_hours: 0,
            ignore_hidden_folders: false,
            keep_system_folders: true,
            ignore_file_patterns: vec![
                "desktop.ini".to_string(),
                "thumbs.db".to_string(),
                ".DS_Store".to_string(),
            ],
            ignore_directory_substrings: Vec::new(),
            ignore_zero_byte_files: true,
            infinite_loop_threshold: 5,
        }
    }
}

/// How files and directories are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteMode {
    /// Move to the recycle bin, probing for locks first.
    #[default]
    RecycleBin,
    /// Move to the recycle bin and surface every error.
    RecycleBinShowErrors,
    /// Move to the recycle bin after confirming each item.
    RecycleBinWithQuestion,
    /// Remove permanently.
    Direct,
    /// Touch nothing.
    Simulate,
}

impl DeleteMode {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            DeleteMode::RecycleBin
                | DeleteMode::RecycleBinShowErrors
                | DeleteMode::RecycleBinWithQuestion
        )
    }
}

/// Deletion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteConfig {
    pub mode: DeleteMode,
    /// Keep going after generic faults instead of waiting for a decision.
    pub ignore_all_errors: bool,
    /// Delay after each processed directory.
    pub pause_time_ms: u64,
}

impl Default for DeleteConfig {
    fn default() -> Self {
        Self {
            mode: DeleteMode::RecycleBin,
            ignore_all_errors: false,
            pause_time_ms: 0,
        }
    }
}

/// Everything a [`RuntimeSession`](crate::RuntimeSession) needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub scan: ScanConfig,
    pub delete: DeleteConfig,
    /// Stop writing the session log.
    pub disable_logging: bool,
    /// Drop scan error events from the event stream (they are still logged).
    pub hide_scan_errors: bool,
}

impl SessionConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {path:?}"))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid configuration in {path:?}"))
    }
}
