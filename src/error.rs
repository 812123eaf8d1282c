use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why an HTTP request made by the updater did not produce a usable body
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to fetch release metadata from {url}: {cause}")]
    MetadataFetch {
        url: String,
        #[source]
        cause: FetchCause,
    },

    #[error("failed to decode release metadata: {0}")]
    MetadataDecode(#[from] serde_json::Error),

    #[error("failed to download {url}: {cause}")]
    Download {
        url: String,
        #[source]
        cause: FetchCause,
    },

    #[error("failed to extract {}: {source}", archive.display())]
    Extraction {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to locate running executable: {0}")]
    Locate(#[source] io::Error),

    #[error("failed to rename {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set permissions on {}: {source}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to relaunch {}: {source}", path.display())]
    Relaunch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to access version record {}: {source}", path.display())]
    VersionRecord {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("another update is already in progress")]
    InProgress,
}

pub type Result<T> = std::result::Result<T, UpdateError>;
