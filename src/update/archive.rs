use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{Result, UpdateError};

/// Archive formats understood by [`extract`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// `.zip` selects the zip decoder, everything else is read as gzip+tar
    pub fn from_path(path: &Path) -> Self {
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));

        if is_zip {
            Self::Zip
        } else {
            Self::TarGz
        }
    }
}

/// Unpack `archive_path` into `target_dir`, keeping the directory structure.
///
/// Stops at the first failure; files already written stay on disk.
pub fn extract(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let kind = ArchiveKind::from_path(archive_path);
    debug!(
        "Extracting {} ({:?}) into {}",
        archive_path.display(),
        kind,
        target_dir.display()
    );

    let outcome = match kind {
        ArchiveKind::Zip => extract_zip(archive_path, target_dir),
        ArchiveKind::TarGz => extract_tar_gz(archive_path, target_dir),
    };

    outcome.map_err(|source| UpdateError::Extraction {
        archive: archive_path.to_path_buf(),
        source,
    })
}

fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> io::Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = resolve_entry(target_dir, &entry_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            create_dir(&target)?;
        } else if entry_type.is_file() {
            let mut out = create_file(&target)?;
            io::copy(&mut entry, &mut out)?;
        } else {
            debug!("Skipping {:?} entry {}", entry_type, entry_path.display());
        }
    }

    Ok(())
}

fn extract_zip(archive_path: &Path, target_dir: &Path) -> io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(io::Error::other)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(io::Error::other)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| unsafe_entry(Path::new(entry.name())))?;
        let target = resolve_entry(target_dir, &relative)?;

        if entry.is_dir() {
            create_dir(&target)?;
        } else if entry.is_file() {
            let mut out = create_file(&target)?;
            io::copy(&mut entry, &mut out)?;
        } else {
            debug!("Skipping non-regular zip entry {}", relative.display());
        }
    }

    Ok(())
}

/// Join an entry path onto `target_dir`, refusing anything that could land
/// outside of it.
fn resolve_entry(target_dir: &Path, entry_path: &Path) -> io::Result<PathBuf> {
    let mut resolved = target_dir.to_path_buf();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_entry(entry_path));
            }
        }
    }
    Ok(resolved)
}

fn unsafe_entry(entry_path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "archive entry {} escapes the target directory",
            entry_path.display()
        ),
    )
}

fn create_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn create_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}
