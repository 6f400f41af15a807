use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_UPLOAD_RETRIES, DEFAULT_UPLOAD_TIMEOUT_SECS, SyncConfig};
use crate::error::SyncError;
use crate::hash::content_hash;
use crate::paths::{exists, is_external, resolve_reference};
use crate::store::index::{IndexStore, MediaAsset};
use crate::store::remote::RemoteSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub retries: usize,
    pub timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_UPLOAD_RETRIES,
            timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
        }
    }
}

impl From<&SyncConfig> for UploadPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            retries: config.upload_retries,
            timeout: config.upload_timeout,
        }
    }
}

/// All remote writes of one sync call go through here. Owns the remote session,
/// so dropping the publisher releases it.
pub struct Publisher {
    session: Box<dyn RemoteSession>,
    policy: UploadPolicy,
    cancel: CancellationToken,
    uploaded: Vec<String>,
    removed: Vec<String>,
}

impl Publisher {
    pub fn new(
        session: Box<dyn RemoteSession>,
        policy: UploadPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            policy,
            cancel,
            uploaded: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn check_cancelled(&self) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }
        Ok(())
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        payload: &T,
    ) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(payload).with_context(|| format!("serialize {path}"))?;
        self.upload(path, bytes, "application/json").await
    }

    pub async fn put_file(
        &mut self,
        path: &str,
        source: &Path,
        content_type: &str,
    ) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("read upload source: {}", source.display()))?;
        self.upload(path, bytes, content_type).await
    }

    /// Single attempt; callers decide whether a failed delete matters.
    pub async fn remove(&mut self, path: &str) -> anyhow::Result<()> {
        self.check_cancelled()?;
        tracing::info!(object = path, "remove");
        self.session
            .remove(path)
            .await
            .with_context(|| format!("remove {path}"))?;
        self.removed.push(path.to_owned());
        Ok(())
    }

    /// Publishes an image referenced from `doc_path` and returns the reference to
    /// use in the exported schema. Anything that is not a local image is handed
    /// back unchanged.
    pub async fn upload_media(
        &mut self,
        index: &dyn IndexStore,
        reference: &str,
        doc_path: &Path,
    ) -> anyhow::Result<String> {
        if reference.is_empty() || is_external(reference) {
            return Ok(reference.to_owned());
        }
        let source = resolve_reference(doc_path, reference);
        if !exists(&source) {
            tracing::debug!(reference, doc = %doc_path.display(), "media source missing");
            return Ok(reference.to_owned());
        }
        let Some(content_type) = image_content_type(&source) else {
            return Ok(reference.to_owned());
        };

        let bytes = tokio::fs::read(&source)
            .await
            .with_context(|| format!("read media: {}", source.display()))?;
        let hash = content_hash(&bytes);
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let object = format!("files/{hash}{ext}");

        if index.media(&hash).await?.is_none() {
            self.put_file(&object, &source, content_type).await?;
            index
                .put_media(&MediaAsset {
                    id: hash.clone(),
                    source_path: source,
                    content_hash: hash,
                })
                .await
                .context("record media asset")?;
        }
        Ok(format!("/{object}"))
    }

    pub fn uploaded(&self) -> &[String] {
        &self.uploaded
    }

    pub fn removed(&self) -> &[String] {
        &self.removed
    }

    async fn upload(&mut self, path: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<()> {
        let attempts = self.policy.retries.saturating_add(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            self.check_cancelled()?;
            tracing::info!(object = path, bytes = bytes.len(), attempt = attempt + 1, "upload");

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled.into()),
                outcome = tokio::time::timeout(
                    self.policy.timeout,
                    self.session.put_bytes(path, bytes.clone(), content_type),
                ) => outcome,
            };
            let err = match outcome {
                Ok(Ok(())) => {
                    self.uploaded.push(path.to_owned());
                    return Ok(());
                }
                Ok(Err(err)) => err,
                Err(_) => anyhow::anyhow!("timed out after {:?}", self.policy.timeout),
            };

            tracing::warn!(
                object = path,
                attempt = attempt + 1,
                attempts,
                ?err,
                "upload failed"
            );
            last_err = Some(err);
        }

        let source = last_err.unwrap_or_else(|| anyhow::anyhow!("no upload attempt was made"));
        Err(SyncError::Upload {
            path: path.to_owned(),
            attempts,
            source: source.into(),
        }
        .into())
    }
}

/// Only images are published; other media stays a plain reference.
fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let content_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        _ => return None,
    };
    Some(content_type)
}
