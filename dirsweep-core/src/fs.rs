//! Filesystem access used by the classifier and the deletion scheduler.
//!
//! Everything goes through the [`FileSystem`] trait so the engine can be
//! driven against an in-memory tree in tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error};

/// OS error code for "file name too long".
#[cfg(target_os = "linux")]
pub const NAME_TOO_LONG_OS_ERROR: i32 = 36;
#[cfg(all(unix, not(target_os = "linux")))]
pub const NAME_TOO_LONG_OS_ERROR: i32 = 63;
/// `ERROR_FILENAME_EXCED_RANGE`
#[cfg(windows)]
pub const NAME_TOO_LONG_OS_ERROR: i32 = 206;

/// A regular file (or anything that is not a directory) inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub len: u64,
}

/// Attributes the classifier needs to decide whether to descend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirAttributes {
    pub hidden: bool,
    pub system: bool,
    /// Symbolic link, junction or other reparse point.
    pub reparse_point: bool,
    /// `None` when the platform cannot report a creation time.
    pub created: Option<SystemTime>,
}

pub trait FileSystem: Send + Sync {
    /// Non-directory entries of `dir`.
    fn files(&self, dir: &Path) -> io::Result<Vec<FileEntry>>;

    /// Directory entries of `dir`, including links that point at directories.
    fn subdirectories(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn attributes(&self, dir: &Path) -> io::Result<DirAttributes>;

    fn is_dir(&self, path: &Path) -> bool;

    /// Permanently removes a single file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Permanently removes an empty directory (never recursive).
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Returns true when the path cannot be written right now.
    fn is_locked(&self, path: &Path) -> bool;
}

pub fn is_path_too_long(err: &io::Error) -> bool {
    err.raw_os_error() == Some(NAME_TOO_LONG_OS_ERROR)
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl RealFileSystem {
    fn entry_is_dir(entry: &fs::DirEntry) -> io::Result<bool> {
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            // Links to directories are reported as directories so that the
            // classifier can refuse to follow them.
            Ok(fs::metadata(entry.path()).is_ok_and(|m| m.is_dir()))
        } else {
            Ok(file_type.is_dir())
        }
    }

    fn is_dir_locked(path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };

        let mut probe = path.with_file_name(format!("{}deltest", name.to_string_lossy()));
        let mut counter = 0u32;
        while probe.exists() {
            if counter > 100 {
                return true;
            }
            probe = path.with_file_name(format!("{}deltest{counter}", name.to_string_lossy()));
            counter += 1;
        }

        if fs::rename(path, &probe).is_err() {
            return true;
        }
        if let Err(e) = fs::rename(&probe, path) {
            error!("failed to restore {:?} after write probe: {}", path, e);
            return true;
        }

        false
    }
}

impl FileSystem for RealFileSystem {
    fn files(&self, dir: &Path) -> io::Result<Vec<FileEntry>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if Self::entry_is_dir(&entry)? {
                continue;
            }
            let len = entry.metadata()?.len();
            files.push(FileEntry {
                path: entry.path(),
                name: entry.file_name().to_string_lossy().into_owned(),
                len,
            });
        }
        Ok(files)
    }

    fn subdirectories(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if Self::entry_is_dir(&entry)? {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn attributes(&self, dir: &Path) -> io::Result<DirAttributes> {
        let metadata = fs::symlink_metadata(dir)?;
        let created = metadata.created().ok();

        #[cfg(windows)]
        {
            use std::os::windows::fs::MetadataExt;
            const HIDDEN: u32 = 0x2;
            const SYSTEM: u32 = 0x4;
            const REPARSE_POINT: u32 = 0x400;

            let attributes = metadata.file_attributes();
            Ok(DirAttributes {
                hidden: attributes & HIDDEN != 0,
                system: attributes & SYSTEM != 0,
                reparse_point: attributes & REPARSE_POINT != 0,
                created,
            })
        }

        #[cfg(not(windows))]
        {
            let hidden = dir
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            Ok(DirAttributes {
                hidden,
                system: false,
                reparse_point: metadata.file_type().is_symlink(),
                created,
            })
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok_and(|m| m.is_dir())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        #[cfg(windows)]
        clear_readonly(path)?;
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        #[cfg(windows)]
        clear_readonly(path)?;
        fs::remove_dir(path)
    }

    fn is_locked(&self, path: &Path) -> bool {
        let locked = if self.is_dir(path) {
            Self::is_dir_locked(path)
        } else {
            fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .is_err()
        };
        if locked {
            debug!("write probe failed for {:?}", path);
        }
        locked
    }
}

/// Read-only files and directories are removed anyway.
#[cfg(windows)]
fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
