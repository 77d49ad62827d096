use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directories the user wants to keep even though they were found empty.
///
/// Membership is an exact match on the absolute path; protecting a
/// directory says nothing about its parents or children.
#[derive(Debug, Clone, Default)]
pub struct ProtectionSet {
    paths: HashSet<PathBuf>,
}

impl ProtectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the path was already protected.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = normalize(path.as_ref());
        debug!("保护目录: {:?}", path);
        self.paths.insert(path)
    }

    /// Returns false if the path was not protected.
    pub fn remove<P: AsRef<Path>>(&mut self, path: P) -> bool {
        self.paths.remove(&normalize(path.as_ref()))
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.paths.contains(&normalize(path.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
