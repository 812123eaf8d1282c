use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FetchCause, Result, UpdateError};
use crate::models::{AssetDescriptor, ReleaseDescriptor};

pub const DEFAULT_USER_AGENT: &str = concat!("respawn/", env!("CARGO_PKG_VERSION"));

/// Blocking client for the release metadata endpoint and its asset downloads.
///
/// Requests are issued once and carry no timeout; retry and deadline policy
/// belong to the caller.
pub struct ReleaseClient {
    client: reqwest::blocking::Client,
    api_url: String,
    show_progress: bool,
}

impl ReleaseClient {
    pub fn new(api_url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(None::<Duration>)
            .build()
            .map_err(UpdateError::Client)?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            show_progress: false,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Fetch the latest release descriptor
    pub fn fetch_latest(&self) -> Result<ReleaseDescriptor> {
        let fetch_err = |cause: FetchCause| UpdateError::MetadataFetch {
            url: self.api_url.clone(),
            cause,
        };

        debug!("Fetching release metadata from {}", self.api_url);
        let response = self
            .client
            .get(&self.api_url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .map_err(|e| fetch_err(e.into()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(fetch_err(FetchCause::Status(status)));
        }

        let body = response.text().map_err(|e| fetch_err(e.into()))?;
        let release: ReleaseDescriptor = serde_json::from_str(&body)?;
        debug!(
            "Latest release {} with {} assets",
            release.tag_name,
            release.assets.len()
        );
        Ok(release)
    }

    /// Download an asset in full to `dest`, creating its parent directory.
    /// Returns the number of bytes written. A failed transfer removes the
    /// partial file.
    pub fn download_asset(&self, asset: &AssetDescriptor, dest: &Path) -> Result<u64> {
        let url = asset.browser_download_url.as_str();
        let download_err = |cause: FetchCause| UpdateError::Download {
            url: url.to_string(),
            cause,
        };

        debug!("Downloading {} to {}", url, dest.display());
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| download_err(e.into()))?;

        if !response.status().is_success() {
            return Err(download_err(FetchCause::Status(response.status())));
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| download_err(e.into()))?;
        }
        let file = File::create(dest).map_err(|e| download_err(e.into()))?;

        let total_size = response.content_length().unwrap_or(asset.size);
        match self.write_body(&mut response, file, total_size) {
            Ok(downloaded) => {
                debug!("Downloaded {} bytes", downloaded);
                Ok(downloaded)
            }
            Err(cause) => {
                if let Err(e) = fs::remove_file(dest) {
                    warn!("Could not remove partial download {}: {}", dest.display(), e);
                }
                Err(download_err(cause))
            }
        }
    }

    fn write_body(
        &self,
        response: &mut reqwest::blocking::Response,
        mut file: File,
        total_size: u64,
    ) -> std::result::Result<u64, FetchCause> {
        let pb = self.progress_bar(total_size);

        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = response.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])?;
            downloaded += bytes_read as u64;
            pb.set_position(downloaded);
        }
        file.flush()?;

        pb.finish_and_clear();
        Ok(downloaded)
    }

    fn progress_bar(&self, total_size: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
