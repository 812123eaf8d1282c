use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};

pub const DEFAULT_VERSION_FILE: &str = "version.txt";

/// Plain-text file holding the last version that was installed
#[derive(Debug, Clone)]
pub struct VersionRecord {
    path: PathBuf,
}

impl VersionRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded version. A missing or blank file yields None.
    pub fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let version = content.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.error(source)),
        }
    }

    pub fn save(&self, version: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }
        fs::write(&self.path, version).map_err(|e| self.error(e))
    }

    fn error(&self, source: io::Error) -> UpdateError {
        UpdateError::VersionRecord {
            path: self.path.clone(),
            source,
        }
    }
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_FILE)
    }
}
