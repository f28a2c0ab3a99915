//! File lookup across a list of asset directories.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Resolves relative paths against an ordered list of directories.
///
/// Passed explicitly to whatever needs to read assets.
#[derive(Clone, Debug, Default)]
pub struct FileResolver {
    directories: Vec<PathBuf>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver searching `directories` in order.
    pub fn with_directories<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut resolver = Self::new();
        for directory in directories {
            resolver.add_directory(directory);
        }
        resolver
    }

    /// Appends a search directory. Duplicates are ignored.
    pub fn add_directory(&mut self, directory: impl Into<PathBuf>) {
        let directory = directory.into();
        if !self.directories.contains(&directory) {
            self.directories.push(directory);
        }
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Finds the file `path` refers to.
    ///
    /// Absolute paths are returned as-is when they exist; relative paths
    /// are tried in every directory in insertion order.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        } else if let Some(found) = self
            .directories
            .iter()
            .map(|directory| directory.join(path))
            .find(|candidate| candidate.is_file())
        {
            debug!("Resolved {} to {}", path.display(), found.display());
            return Ok(found);
        }

        Err(Error::Resource(format!(
            "File doesn't exist: {}",
            path.display()
        )))
    }

    /// Reads the whole file `path` refers to.
    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        Ok(std::fs::read(resolved)?)
    }
}
