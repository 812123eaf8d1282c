pub mod config;
pub mod error;
pub mod models;
pub mod update;

pub use config::Config;
pub use error::{FetchCause, Result, UpdateError};
pub use models::{AssetDescriptor, ReleaseDescriptor};
pub use update::{UpdateOutcome, UpdateSettings, Updater};
