use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::archive;
use crate::error::{Result, UpdateError};

/// Appended to the executable path to name the moved-aside binary
pub const DEFAULT_BACKUP_SUFFIX: &str = "~";

/// Replaces an executable on disk while it may still be running.
///
/// The running file is renamed rather than overwritten: platforms that lock
/// an executing image still allow it to be moved.
#[derive(Debug, Clone)]
pub struct Installer {
    executable: PathBuf,
    backup_suffix: String,
}

impl Installer {
    pub fn new(executable: impl Into<PathBuf>, backup_suffix: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            backup_suffix: backup_suffix.into(),
        }
    }

    /// Installer for the binary of the running process
    pub fn for_current_exe(backup_suffix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Self::locate()?, backup_suffix))
    }

    /// Absolute path of the running executable with symlinks resolved
    pub fn locate() -> Result<PathBuf> {
        let exe = std::env::current_exe().map_err(UpdateError::Locate)?;
        fs::canonicalize(&exe).map_err(UpdateError::Locate)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut path = self.executable.clone().into_os_string();
        path.push(&self.backup_suffix);
        PathBuf::from(path)
    }

    /// Move the executable to its backup path, replacing any stale backup
    pub fn quarantine(&self) -> Result<PathBuf> {
        let backup = self.backup_path();
        let rename_err = |source: io::Error| UpdateError::Rename {
            from: self.executable.clone(),
            to: backup.clone(),
            source,
        };

        match fs::remove_file(&backup) {
            Ok(()) => debug!("Removed stale backup {}", backup.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(rename_err(e)),
        }

        fs::rename(&self.executable, &backup).map_err(rename_err)?;
        info!(
            "Moved {} aside to {}",
            self.executable.display(),
            backup.display()
        );
        Ok(backup)
    }

    /// Swap in the binary contained in `archive_path`.
    ///
    /// The archive is unpacked next to the executable and is deleted
    /// afterwards whether or not the install worked. On failure after the
    /// backup was taken, the backup is moved back into place.
    pub fn install(&self, archive_path: &Path) -> Result<()> {
        let _staged = StagedArchive::new(archive_path);

        let backup = self.quarantine()?;
        if let Err(e) = self.unpack_and_fix_mode(archive_path) {
            error!("Install failed: {}", e);
            if let Err(rollback_err) = self.restore_backup() {
                error!(
                    "Could not restore {}: {}",
                    backup.display(),
                    rollback_err
                );
            }
            return Err(e);
        }

        info!("Installed new binary at {}", self.executable.display());
        Ok(())
    }

    /// Put the backup back at the executable path, discarding whatever is
    /// there now.
    pub fn restore_backup(&self) -> Result<()> {
        let backup = self.backup_path();
        warn!(
            "Restoring {} from {}",
            self.executable.display(),
            backup.display()
        );

        match fs::remove_file(&self.executable) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.executable.display(), e),
        }

        fs::rename(&backup, &self.executable).map_err(|source| UpdateError::Rename {
            from: backup.clone(),
            to: self.executable.clone(),
            source,
        })
    }

    fn unpack_and_fix_mode(&self, archive_path: &Path) -> Result<()> {
        let target_dir = self
            .executable
            .parent()
            .unwrap_or_else(|| Path::new("."));
        archive::extract(archive_path, target_dir)?;

        if !self.executable.is_file() {
            return Err(UpdateError::Extraction {
                archive: archive_path.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "archive does not contain {}",
                        self.executable
                            .file_name()
                            .unwrap_or_default()
                            .to_string_lossy()
                    ),
                ),
            });
        }

        self.make_executable()
    }

    fn make_executable(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.executable, fs::Permissions::from_mode(0o755)).map_err(
                |source| UpdateError::Permission {
                    path: self.executable.clone(),
                    source,
                },
            )?;
        }
        Ok(())
    }
}

/// Deletes the downloaded archive when dropped
pub(crate) struct StagedArchive<'a>(&'a Path);

impl<'a> StagedArchive<'a> {
    pub(crate) fn new(path: &'a Path) -> Self {
        Self(path)
    }
}

impl Drop for StagedArchive<'_> {
    fn drop(&mut self) {
        match fs::remove_file(self.0) {
            Ok(()) => debug!("Removed {}", self.0.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.0.display(), e),
        }
    }
}
