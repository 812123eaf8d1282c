pub mod archive;
pub mod installer;
pub mod platform;
pub mod record;
pub mod relaunch;
pub mod release;
pub mod version;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use tracing::{debug, info};

use installer::StagedArchive;

use crate::error::{Result, UpdateError};
use crate::models::{AssetDescriptor, ReleaseDescriptor};

pub use installer::{Installer, DEFAULT_BACKUP_SUFFIX};
pub use platform::PlatformTag;
pub use record::{VersionRecord, DEFAULT_VERSION_FILE};
pub use relaunch::{PendingRelaunch, ProcessRelauncher, RelaunchRequest, Relauncher};
pub use release::{ReleaseClient, DEFAULT_USER_AGENT};
pub use version::{Comparison, BASELINE_VERSION};

pub const DEFAULT_DOWNLOAD_DIR: &str = "download";
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Resolved settings for one [`Updater`]
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub api_url: String,
    pub user_agent: String,
    pub version_file: PathBuf,
    pub download_dir: PathBuf,
    pub restart_delay: Duration,
    pub backup_suffix: String,
    /// Binary to replace; the running executable when None. A restart is
    /// only allowed when this resolves to the running executable.
    pub executable: Option<PathBuf>,
    pub platform: PlatformTag,
    pub show_progress: bool,
}

impl UpdateSettings {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            version_file: PathBuf::from(DEFAULT_VERSION_FILE),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            restart_delay: DEFAULT_RESTART_DELAY,
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
            executable: None,
            platform: PlatformTag::current(),
            show_progress: false,
        }
    }
}

/// Result of a check-and-update run
#[derive(Debug)]
pub enum UpdateOutcome {
    UpToDate {
        local: String,
        latest: String,
    },
    NoMatchingAsset {
        latest: String,
        platform: PlatformTag,
    },
    Updated {
        from: String,
        to: String,
        /// Set when a restart was requested
        relaunch: Option<PendingRelaunch>,
    },
}

/// What a check found, without touching anything on disk
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub local: String,
    pub release: ReleaseDescriptor,
    pub newer: bool,
    pub asset: Option<AssetDescriptor>,
}

/// Check, download, install, restart.
///
/// Calls on one `Updater` are serialized; a call made while another is
/// running fails with [`UpdateError::InProgress`].
pub struct Updater {
    settings: UpdateSettings,
    client: ReleaseClient,
    record: VersionRecord,
    relauncher: Arc<dyn Relauncher>,
    guard: Mutex<()>,
}

impl Updater {
    pub fn new(settings: UpdateSettings) -> Result<Self> {
        let client = ReleaseClient::new(settings.api_url.clone(), &settings.user_agent)?
            .with_progress(settings.show_progress);
        let record = VersionRecord::new(settings.version_file.clone());

        Ok(Self {
            settings,
            client,
            record,
            relauncher: Arc::new(ProcessRelauncher),
            guard: Mutex::new(()),
        })
    }

    pub fn with_relauncher(mut self, relauncher: Arc<dyn Relauncher>) -> Self {
        self.relauncher = relauncher;
        self
    }

    pub fn settings(&self) -> &UpdateSettings {
        &self.settings
    }

    /// Recorded local version, or the baseline when nothing is recorded
    pub fn local_version(&self) -> Result<String> {
        Ok(self
            .record
            .load()?
            .unwrap_or_else(|| BASELINE_VERSION.to_string()))
    }

    pub fn check(&self) -> Result<CheckReport> {
        let release = self.client.fetch_latest()?;
        let local = self.local_version()?;
        let newer = version::is_newer(&local, &release.tag_name);
        let asset = platform::select_asset(&release, &self.settings.platform).cloned();

        Ok(CheckReport {
            local,
            release,
            newer,
            asset,
        })
    }

    /// Install the latest release if it is newer than the recorded version.
    ///
    /// With `restart`, the returned outcome carries the scheduled relaunch;
    /// this call returns before the restart delay has elapsed. Restarting a
    /// binary other than the running one fails with [`UpdateError::Config`]
    /// before anything is fetched.
    pub fn check_and_update(&self, restart: bool) -> Result<UpdateOutcome> {
        let _guard = self.lock()?;

        let installer = self.installer()?;
        let relaunch = self.relaunch_request(&installer, restart)?;

        let release = self.client.fetch_latest()?;
        let local = self.local_version()?;
        let latest = release.tag_name.clone();

        if !version::is_newer(&local, &latest) {
            info!("Already at the latest version: {} (latest {})", local, latest);
            return Ok(UpdateOutcome::UpToDate { local, latest });
        }
        info!("New version available: {} (current {})", latest, local);

        let platform = self.settings.platform.clone();
        let Some(asset) = platform::select_asset(&release, &platform) else {
            info!("Release {} has no asset for {}", latest, platform);
            return Ok(UpdateOutcome::NoMatchingAsset { latest, platform });
        };

        let staged = self.staging_path(&asset.name);
        let _staged = StagedArchive::new(&staged);
        debug!("Download URL: {}", asset.browser_download_url);
        self.client.download_asset(asset, &staged)?;

        installer.install(&staged)?;
        self.record.save(&latest)?;
        info!("Updated {} -> {}", local, latest);

        Ok(UpdateOutcome::Updated {
            from: local,
            to: latest,
            relaunch: relaunch.map(|request| self.schedule_relaunch(request)),
        })
    }

    /// Run the replace sequence on an archive that is already on disk.
    /// Without a path, `<download_dir>/<platform>.gz` is used.
    pub fn install_archive(
        &self,
        archive: Option<&Path>,
        restart: bool,
    ) -> Result<Option<PendingRelaunch>> {
        let _guard = self.lock()?;

        let archive = match archive {
            Some(path) => path.to_path_buf(),
            None => self
                .settings
                .download_dir
                .join(format!("{}.gz", self.settings.platform)),
        };

        let installer = self.installer()?;
        let relaunch = self.relaunch_request(&installer, restart)?;
        installer.install(&archive)?;

        Ok(relaunch.map(|request| self.schedule_relaunch(request)))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        match self.guard.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(UpdateError::InProgress),
        }
    }

    fn installer(&self) -> Result<Installer> {
        match &self.settings.executable {
            Some(path) => Ok(Installer::new(path, self.settings.backup_suffix.clone())),
            None => Installer::for_current_exe(self.settings.backup_suffix.clone()),
        }
    }

    /// Staging file for an asset; only the final path component of the
    /// asset name is used.
    fn staging_path(&self, asset_name: &str) -> PathBuf {
        let file_name = Path::new(asset_name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(asset_name));
        self.settings.download_dir.join(file_name)
    }

    /// The process to start after installing, or None without `restart`.
    ///
    /// Relaunching reuses this process's arguments, so it is refused when
    /// the installer targets a binary other than the running one.
    fn relaunch_request(
        &self,
        installer: &Installer,
        restart: bool,
    ) -> Result<Option<RelaunchRequest>> {
        if !restart {
            return Ok(None);
        }

        let running = Installer::locate()?;
        let target = fs::canonicalize(installer.executable())
            .unwrap_or_else(|_| installer.executable().to_path_buf());
        if target != running {
            return Err(UpdateError::Config(format!(
                "cannot restart {}: it is not the running executable {}",
                installer.executable().display(),
                running.display()
            )));
        }

        Ok(Some(RelaunchRequest::for_current_process(running)))
    }

    fn schedule_relaunch(&self, request: RelaunchRequest) -> PendingRelaunch {
        relaunch::schedule(
            self.settings.restart_delay,
            self.relauncher.clone(),
            request,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use mockito::{Mock, Server, ServerGuard};
    use std::env;
    use std::io::{self, Write};
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<RelaunchRequest>>,
    }

    impl Relauncher for Recorder {
        fn relaunch(&self, request: &RelaunchRequest) {
            self.calls.lock().unwrap().push(request.clone());
        }
    }

    struct Fixture {
        dir: TempDir,
        server: ServerGuard,
        recorder: Arc<Recorder>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("tool"), "old binary").unwrap();
            Self {
                dir,
                server: Server::new(),
                recorder: Arc::new(Recorder::default()),
            }
        }

        fn exe(&self) -> PathBuf {
            self.dir.path().join("tool")
        }

        fn version_file(&self) -> PathBuf {
            self.dir.path().join("version.txt")
        }

        fn download_dir(&self) -> PathBuf {
            self.dir.path().join("download")
        }

        fn updater(&self) -> Updater {
            self.updater_for(Some(self.exe()))
        }

        fn updater_for(&self, executable: Option<PathBuf>) -> Updater {
            let mut settings = UpdateSettings::new(format!("{}/releases/latest", self.server.url()));
            settings.version_file = self.version_file();
            settings.download_dir = self.download_dir();
            settings.executable = executable;
            settings.platform = PlatformTag::new("linux", "amd64");
            settings.restart_delay = Duration::from_secs(3600);

            Updater::new(settings)
                .unwrap()
                .with_relauncher(self.recorder.clone())
        }

        fn mock_release(&mut self, tag: &str, assets: &[&str]) -> Mock {
            let url = self.server.url();
            let assets: Vec<_> = assets
                .iter()
                .map(|name| {
                    serde_json::json!({
                        "name": name,
                        "browser_download_url": format!("{}/dl/{}", url, name),
                        "size": 0
                    })
                })
                .collect();
            let body = serde_json::json!({ "tag_name": tag, "assets": assets }).to_string();

            self.server
                .mock("GET", "/releases/latest")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(body)
                .create()
        }

        fn mock_asset(&mut self, name: &str, binary: &[u8]) -> Mock {
            self.server
                .mock("GET", format!("/dl/{}", name).as_str())
                .with_status(200)
                .with_body(tar_gz(&[("tool", binary)]))
                .create()
        }
    }

    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_updates_when_newer_release_matches_platform() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let meta = fx.mock_release("v1.1.0", &["tool_darwin_arm64.tar.gz", "tool_linux_amd64.tar.gz"]);
        let download = fx.mock_asset("tool_linux_amd64.tar.gz", b"new binary");

        let outcome = fx.updater().check_and_update(false).unwrap();

        let UpdateOutcome::Updated { from, to, relaunch } = outcome else {
            panic!("expected an update");
        };
        assert_eq!(from, "v1.0.0");
        assert_eq!(to, "v1.1.0");
        assert!(relaunch.is_none());
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "new binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.1.0");
        assert!(!fx.download_dir().join("tool_linux_amd64.tar.gz").exists());
        meta.assert();
        download.assert();
    }

    #[test]
    fn test_restart_refused_for_other_executable() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let meta = fx.server.mock("GET", "/releases/latest").expect(0).create();

        let err = fx.updater().check_and_update(true).unwrap_err();

        assert!(matches!(err, UpdateError::Config(_)));
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.0.0");
        assert!(fx.recorder.calls.lock().unwrap().is_empty());
        meta.assert();
    }

    #[test]
    fn test_install_archive_restart_refused_for_other_executable() {
        let fx = Fixture::new();
        let archive = fx.dir.path().join("tool_linux_amd64.tar.gz");
        fs::write(&archive, tar_gz(&[("tool", "local build".as_bytes())])).unwrap();

        let err = fx.updater().install_archive(Some(&archive), true).unwrap_err();

        assert!(matches!(err, UpdateError::Config(_)));
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert!(archive.exists());
    }

    #[test]
    fn test_relaunch_request_reuses_running_process() {
        let fx = Fixture::new();
        let updater = fx.updater_for(None);
        let installer = updater.installer().unwrap();

        assert!(updater.relaunch_request(&installer, false).unwrap().is_none());

        let request = updater.relaunch_request(&installer, true).unwrap().unwrap();
        assert_eq!(request.executable, Installer::locate().unwrap());
        assert_eq!(request.args, env::args_os().skip(1).collect::<Vec<_>>());
        assert_eq!(request.working_dir, env::current_dir().ok());

        // Naming the running binary explicitly is the same as not naming it
        let explicit = fx.updater_for(Some(Installer::locate().unwrap()));
        let installer = explicit.installer().unwrap();
        assert_eq!(
            explicit.relaunch_request(&installer, true).unwrap(),
            Some(request)
        );
    }

    #[test]
    fn test_scheduled_relaunch_waits_for_delay() {
        let fx = Fixture::new();
        let updater = fx.updater_for(None);
        let installer = updater.installer().unwrap();
        let request = updater.relaunch_request(&installer, true).unwrap().unwrap();

        let pending = updater.schedule_relaunch(request.clone());
        assert!(fx.recorder.calls.lock().unwrap().is_empty());

        pending.fire_now();
        assert_eq!(*fx.recorder.calls.lock().unwrap(), vec![request]);
    }

    #[test]
    fn test_same_version_is_a_no_op() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.1.0").unwrap();
        let _meta = fx.mock_release("v1.1.0", &["tool_linux_amd64.tar.gz"]);
        let download = fx
            .server
            .mock("GET", "/dl/tool_linux_amd64.tar.gz")
            .expect(0)
            .create();

        let outcome = fx.updater().check_and_update(false).unwrap();

        assert!(matches!(outcome, UpdateOutcome::UpToDate { .. }));
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.1.0");
        assert!(!fx.dir.path().join("tool~").exists());
        download.assert();
    }

    #[test]
    fn test_no_matching_asset_changes_nothing() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let _meta = fx.mock_release("v1.1.0", &["tool_windows_amd64.zip", "tool_linux_arm64.tar.gz"]);

        let outcome = fx.updater().check_and_update(false).unwrap();

        match outcome {
            UpdateOutcome::NoMatchingAsset { latest, platform } => {
                assert_eq!(latest, "v1.1.0");
                assert_eq!(platform.to_string(), "linux_amd64");
            }
            _ => panic!("expected no matching asset"),
        }
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.0.0");
        assert!(!fx.download_dir().exists());
    }

    #[test]
    fn test_missing_record_uses_baseline() {
        let mut fx = Fixture::new();
        let _meta = fx.mock_release("v0.1.0", &["tool_linux_amd64.tar.gz"]);
        let _download = fx.mock_asset("tool_linux_amd64.tar.gz", b"first install");

        let outcome = fx.updater().check_and_update(false).unwrap();

        assert!(matches!(outcome, UpdateOutcome::Updated { ref from, .. } if from == BASELINE_VERSION));
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v0.1.0");
    }

    #[test]
    fn test_metadata_error_leaves_binary_alone() {
        let mut fx = Fixture::new();
        let _meta = fx
            .server
            .mock("GET", "/releases/latest")
            .with_status(503)
            .create();

        let err = fx.updater().check_and_update(false).unwrap_err();

        assert!(matches!(err, UpdateError::MetadataFetch { .. }));
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
    }

    #[test]
    fn test_download_failure_leaves_binary_and_record() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let _meta = fx.mock_release("v1.1.0", &["tool_linux_amd64.tar.gz"]);
        let _download = fx
            .server
            .mock("GET", "/dl/tool_linux_amd64.tar.gz")
            .with_status(404)
            .create();

        let err = fx.updater().check_and_update(false).unwrap_err();

        assert!(matches!(err, UpdateError::Download { .. }));
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.0.0");
    }

    #[test]
    fn test_interrupted_download_leaves_nothing_staged() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let _meta = fx.mock_release("v1.1.0", &["tool_linux_amd64.tar.gz"]);
        let _download = fx
            .server
            .mock("GET", "/dl/tool_linux_amd64.tar.gz")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(&[0u8; 4096])?;
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
            })
            .create();

        let err = fx.updater().check_and_update(false).unwrap_err();

        assert!(matches!(err, UpdateError::Download { .. }));
        assert!(!fx.download_dir().join("tool_linux_amd64.tar.gz").exists());
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
        assert_eq!(fs::read_to_string(fx.version_file()).unwrap(), "v1.0.0");
    }

    #[test]
    fn test_concurrent_call_is_rejected() {
        let fx = Fixture::new();
        let updater = fx.updater();

        let _held = updater.guard.lock().unwrap();
        assert!(matches!(
            updater.check_and_update(false),
            Err(UpdateError::InProgress)
        ));
        assert!(matches!(
            updater.install_archive(None, false),
            Err(UpdateError::InProgress)
        ));
    }

    #[test]
    fn test_install_archive_default_staging_path() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.download_dir()).unwrap();
        let staged = fx.download_dir().join("linux_amd64.gz");
        fs::write(&staged, tar_gz(&[("tool", "local build".as_bytes())])).unwrap();

        let relaunch = fx.updater().install_archive(None, false).unwrap();

        assert!(relaunch.is_none());
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "local build");
        assert!(!staged.exists());
        assert!(!fx.version_file().exists());
    }

    #[test]
    fn test_check_reports_without_side_effects() {
        let mut fx = Fixture::new();
        fs::write(fx.version_file(), "v1.0.0").unwrap();
        let _meta = fx.mock_release("v1.2.0", &["tool_linux_amd64.tar.gz"]);

        let report = fx.updater().check().unwrap();

        assert_eq!(report.local, "v1.0.0");
        assert_eq!(report.release.tag_name, "v1.2.0");
        assert!(report.newer);
        assert_eq!(report.asset.unwrap().name, "tool_linux_amd64.tar.gz");
        assert_eq!(fs::read_to_string(fx.exe()).unwrap(), "old binary");
    }

    #[test]
    fn test_staging_path_drops_directories() {
        let fx = Fixture::new();
        let updater = fx.updater();
        assert_eq!(
            updater.staging_path("../../tool_linux_amd64.tar.gz"),
            fx.download_dir().join("tool_linux_amd64.tar.gz")
        );
    }
}
