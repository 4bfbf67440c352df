//! Cache file location and atomic publication
//!
//! The registry never opens cache files by fixed path. It asks a
//! [`FileManager`] for the current version of each file and hands it freshly
//! written temporaries to publish.

use crate::core::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Locates and swaps cache files
pub trait FileManager: Send + Sync {
    /// Path of the published version of `name`, if there is one
    fn lookup(&self, name: &str) -> Result<Option<PathBuf>>;

    /// New temporary file to write the next version of `name` into
    fn create_temp(&self, name: &str) -> Result<NamedTempFile>;

    /// Publish a set of written files as the current versions
    ///
    /// The first file is the one that validates the rest; it is withdrawn
    /// before the others are replaced and published last, so an interrupted
    /// publish leaves no trusted file set behind.
    fn publish(&self, files: Vec<(&'static str, NamedTempFile)>) -> Result<()>;

    /// Read-only managers never receive `create_temp`/`publish` calls
    fn is_read_only(&self) -> bool {
        false
    }
}

/// File manager over a single directory
#[derive(Debug, Clone)]
pub struct DirectoryFileManager {
    root: PathBuf,
    read_only: bool,
}

impl DirectoryFileManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectoryFileManager {
            root: root.as_ref().to_path_buf(),
            read_only: false,
        }
    }

    /// Manager that only reads existing files
    pub fn read_only<P: AsRef<Path>>(root: P) -> Self {
        DirectoryFileManager {
            root: root.as_ref().to_path_buf(),
            read_only: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileManager for DirectoryFileManager {
    fn lookup(&self, name: &str) -> Result<Option<PathBuf>> {
        let path = self.root.join(name);
        Ok(path.is_file().then_some(path))
    }

    fn create_temp(&self, name: &str) -> Result<NamedTempFile> {
        fs::create_dir_all(&self.root)?;
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.root)?;
        Ok(temp)
    }

    fn publish(&self, files: Vec<(&'static str, NamedTempFile)>) -> Result<()> {
        let mut files = files.into_iter();
        let Some((lead_name, lead)) = files.next() else {
            return Ok(());
        };

        let lead_path = self.root.join(lead_name);
        if lead_path.exists() {
            fs::remove_file(&lead_path)?;
        }

        for (name, temp) in files {
            let target = self.root.join(name);
            temp.persist(&target).map_err(|e| e.error)?;
            debug!("Published {}", target.display());
        }

        lead.persist(&lead_path).map_err(|e| e.error)?;
        debug!("Published {}", lead_path.display());
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
