use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_DATA_DIR: &str = ".booksync";
pub const DEFAULT_UPLOAD_RETRIES: usize = 2;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBackend {
    /// Objects are files under this directory, keyed by their relative path.
    LocalDir(PathBuf),
    Gcs {
        bucket: String,
        /// Static bearer token; the metadata server is asked when absent.
        token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Where the local index lives.
    pub data_dir: PathBuf,
    pub remote: RemoteBackend,
    /// Extra attempts after a failed upload. Removals and stat calls are never retried.
    pub upload_retries: usize,
    pub upload_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration from any key-value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get("BOOKSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let remote = match (get("BOOKSYNC_GCS_BUCKET"), get("BOOKSYNC_REMOTE_DIR")) {
            (Some(_), Some(_)) => {
                anyhow::bail!("BOOKSYNC_GCS_BUCKET and BOOKSYNC_REMOTE_DIR are mutually exclusive")
            }
            (Some(bucket), None) => RemoteBackend::Gcs {
                bucket,
                token: get("BOOKSYNC_GCS_TOKEN"),
            },
            (None, Some(dir)) => RemoteBackend::LocalDir(PathBuf::from(dir)),
            (None, None) => RemoteBackend::LocalDir(data_dir.join("remote")),
        };

        let upload_retries = match get("BOOKSYNC_UPLOAD_RETRIES") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid BOOKSYNC_UPLOAD_RETRIES={raw:?}"))?,
            None => DEFAULT_UPLOAD_RETRIES,
        };

        let upload_timeout_secs = match get("BOOKSYNC_UPLOAD_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| {
                    format!("invalid BOOKSYNC_UPLOAD_TIMEOUT_SECS={raw:?}. expected a positive integer")
                })?,
            None => DEFAULT_UPLOAD_TIMEOUT_SECS,
        };

        Ok(Self {
            data_dir,
            remote,
            upload_retries,
            upload_timeout: Duration::from_secs(upload_timeout_secs),
        })
    }
}
