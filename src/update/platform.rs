use std::fmt;

use tracing::warn;

use crate::models::{AssetDescriptor, ReleaseDescriptor};

/// `<OS>_<ARCH>` pair used to pick a release asset, e.g. `linux_amd64`.
///
/// Names follow the vocabulary release tooling usually stamps into asset
/// file names (`darwin` rather than `macos`, `amd64` rather than `x86_64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTag {
    pub os: String,
    pub arch: String,
}

impl PlatformTag {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Tag for the platform this binary was compiled for
    pub fn current() -> Self {
        Self::new(
            os_name(std::env::consts::OS),
            arch_name(std::env::consts::ARCH),
        )
    }

    /// Parse an asset file name shaped like `<identifier>_<OS>_<ARCH>.<ext>`.
    ///
    /// The extension may itself contain dots (`.tar.gz`); the architecture ends
    /// at the first dot after the last underscore.
    pub fn parse_asset_name(name: &str) -> Option<Self> {
        let last_sep = name.rfind('_')?;
        let (head, tail) = (&name[..last_sep], &name[last_sep + 1..]);

        let dot = tail.find('.')?;
        let arch = &tail[..dot];

        let os_start = head.rfind('_')? + 1;
        let os = &head[os_start..];

        if os.is_empty() || arch.is_empty() || os_start <= 1 {
            return None;
        }

        Some(Self::new(os, arch))
    }

    pub fn matches_asset(&self, asset_name: &str) -> bool {
        Self::parse_asset_name(asset_name).is_some_and(|tag| &tag == self)
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

fn os_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    }
}

/// Pick the asset built for `platform`. The first match in list order wins.
pub fn select_asset<'a>(
    release: &'a ReleaseDescriptor,
    platform: &PlatformTag,
) -> Option<&'a AssetDescriptor> {
    let mut matching = release
        .assets
        .iter()
        .filter(|asset| platform.matches_asset(&asset.name));

    let chosen = matching.next()?;
    let ignored: Vec<&str> = matching.map(|asset| asset.name.as_str()).collect();
    if !ignored.is_empty() {
        warn!(
            "Release {} has several assets for {}; using {} and ignoring {:?}",
            release.tag_name, platform, chosen.name, ignored
        );
    }

    Some(chosen)
}
