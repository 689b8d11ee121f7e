//! Single-use handle on a store directory waiting to be merged

use std::path::{Path, PathBuf};

/// A received store directory
///
/// Merging consumes the handle and deletes the directory on success. The
/// type is neither `Clone` nor `Copy`, so a directory cannot be merged twice
/// through the same handle.
#[derive(Debug)]
pub struct SourceDir {
    path: PathBuf,
}

impl SourceDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
