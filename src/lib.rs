//! # dirsweep
//!
//! A tool for finding and removing empty directories.
//!
//! A directory counts as empty when it holds no files and all of its
//! subdirectories are empty. Files matching the ignore patterns (by default
//! `desktop.ini`, `thumbs.db`, `.DS_Store` and zero-byte files) do not count,
//! and are removed together with their directory.
//!
//! ## Usage
//!
//! ### Command Line
//!
//! ```bash
//! # List empty directories below the current directory
//! dirsweep scan
//!
//! # Move them to the recycle bin after confirmation
//! dirsweep delete ~/Downloads
//!
//! # See what would be deleted
//! dirsweep delete --dry-run ~/Downloads
//! ```
//!
//! ### As a Library
//!
//! ```rust
//! use dirsweep::{DeleteMode, RuntimeSession, SessionConfig};
//!
//! let temp_dir = tempfile::TempDir::new()?;
//! std::fs::create_dir_all(temp_dir.path().join("a").join("b"))?;
//!
//! let mut config = SessionConfig::default();
//! config.scan.root = temp_dir.path().to_path_buf();
//! config.delete.mode = DeleteMode::Simulate;
//!
//! let mut session = RuntimeSession::new(config);
//! let scan = session.scan()?;
//! assert_eq!(scan.empty_folder_count, 3);
//!
//! let summary = session.delete()?;
//! assert_eq!(summary.deleted, 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export core functionality
pub use dirsweep_core::*;
