use std::path::PathBuf;

/// Failures callers may want to tell apart. They travel inside `anyhow::Error`
/// and can be recovered with `downcast_ref::<SyncError>()`.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("upload failed after {attempts} attempt(s): {path}")]
    Upload {
        path: String,
        attempts: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("local index is corrupt: {}", path.display())]
    IndexCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("sync cancelled")]
    Cancelled,
}
