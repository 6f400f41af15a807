use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::config::RemoteBackend;

/// A blob store addressed by slash-separated object paths.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn uri(&self) -> String;

    /// Acquires whatever the backend needs for a batch of writes. The returned
    /// session is released when dropped.
    async fn open_session(&self) -> anyhow::Result<Box<dyn RemoteSession>>;
}

/// Writes and deletes are idempotent by path: a put overwrites, removing a
/// missing object succeeds.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn put_bytes(&self, path: &str, bytes: Vec<u8>, content_type: &str)
    -> anyhow::Result<()>;

    async fn remove(&self, path: &str) -> anyhow::Result<()>;
}

pub fn from_backend(backend: &RemoteBackend) -> Arc<dyn RemoteStore> {
    match backend {
        RemoteBackend::LocalDir(dir) => Arc::new(LocalDirRemoteStore::new(dir.clone())),
        RemoteBackend::Gcs { bucket, token } => {
            let store = GcsRemoteStore::new(bucket.clone());
            match token {
                Some(token) => Arc::new(store.with_static_token(token.clone())),
                None => Arc::new(store),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalDirRemoteStore {
    base_dir: PathBuf,
}

impl LocalDirRemoteStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl RemoteStore for LocalDirRemoteStore {
    fn uri(&self) -> String {
        format!("file://{}", self.base_dir.display())
    }

    async fn open_session(&self) -> anyhow::Result<Box<dyn RemoteSession>> {
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create remote dir: {}", self.base_dir.display()))?;
        tracing::debug!(dir = %self.base_dir.display(), "opened local remote session");
        Ok(Box::new(LocalDirSession {
            base_dir: self.base_dir.clone(),
        }))
    }
}

struct LocalDirSession {
    base_dir: PathBuf,
}

#[async_trait]
impl RemoteSession for LocalDirSession {
    async fn put_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> anyhow::Result<()> {
        let target = object_file_path(&self.base_dir, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create object dir: {}", parent.display()))?;
        }
        let tmp_path = target.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, &bytes)
            .await
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &target)
            .await
            .with_context(|| format!("rename tmp to final: {}", target.display()))?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        let target = object_file_path(&self.base_dir, path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove object: {}", target.display())),
        }
    }
}

impl Drop for LocalDirSession {
    fn drop(&mut self) {
        tracing::debug!(dir = %self.base_dir.display(), "closed local remote session");
    }
}

fn object_file_path(base_dir: &Path, object: &str) -> anyhow::Result<PathBuf> {
    let mut path = base_dir.to_path_buf();
    let mut segments = 0;
    for segment in Path::new(object).components() {
        match segment {
            Component::Normal(name) => {
                path.push(name);
                segments += 1;
            }
            Component::CurDir => {}
            _ => anyhow::bail!("object path must be relative without '..': {object}"),
        }
    }
    if segments == 0 {
        anyhow::bail!("object path is empty: {object:?}");
    }
    Ok(path)
}

const GCS_API_BASE: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Google Cloud Storage through its JSON API.
#[derive(Debug, Clone)]
pub struct GcsRemoteStore {
    bucket: String,
    client: reqwest::Client,
    api_base: String,
    static_token: Option<String>,
}

impl GcsRemoteStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            client: reqwest::Client::new(),
            api_base: GCS_API_BASE.to_owned(),
            static_token: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_static_token(mut self, token: impl Into<String>) -> Self {
        self.static_token = Some(token.into());
        self
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        #[derive(Debug, serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("request metadata access token")?;
        if !resp.status().is_success() {
            anyhow::bail!("metadata token request failed ({})", resp.status());
        }
        let token: TokenResponse = resp.json().await.context("parse metadata token json")?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl RemoteStore for GcsRemoteStore {
    fn uri(&self) -> String {
        format!("gs://{}", self.bucket)
    }

    async fn open_session(&self) -> anyhow::Result<Box<dyn RemoteSession>> {
        let access_token = self.access_token().await.context("get access token")?;
        tracing::debug!(bucket = %self.bucket, "opened gcs session");
        Ok(Box::new(GcsSession {
            bucket: self.bucket.clone(),
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            access_token,
        }))
    }
}

struct GcsSession {
    bucket: String,
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

#[async_trait]
impl RemoteSession for GcsSession {
    async fn put_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<()> {
        let url = format!(
            "{api_base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={name}",
            api_base = self.api_base,
            bucket = percent_encode_rfc3986(&self.bucket),
            name = percent_encode_rfc3986(path),
        );
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("upload object to gcs: {path}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("gcs upload failed ({status}): {body}");
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        let url = format!(
            "{api_base}/storage/v1/b/{bucket}/o/{name}",
            api_base = self.api_base,
            bucket = percent_encode_rfc3986(&self.bucket),
            name = percent_encode_rfc3986(path),
        );
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("delete object from gcs: {path}"))?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("gcs delete failed ({status}): {body}");
    }
}

impl Drop for GcsSession {
    fn drop(&mut self) {
        tracing::debug!(bucket = %self.bucket, "closed gcs session");
    }
}

fn percent_encode_rfc3986(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        let is_unreserved = matches!(
            b,
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        );
        if is_unreserved {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_encode_rfc3986_encodes_object_separators() {
        assert_eq!(percent_encode_rfc3986("books/guide/map.json"), "books%2Fguide%2Fmap.json");
        assert_eq!(percent_encode_rfc3986("a b"), "a%20b");
        assert_eq!(percent_encode_rfc3986("~"), "~");
    }

    #[test]
    fn object_paths_must_stay_inside_base() {
        let base = Path::new("/remote");
        assert_eq!(
            object_file_path(base, "books/g/map.json").unwrap(),
            PathBuf::from("/remote/books/g/map.json")
        );
        assert!(object_file_path(base, "../escape.json").is_err());
        assert!(object_file_path(base, "/abs.json").is_err());
        assert!(object_file_path(base, "").is_err());
    }

    #[tokio::test]
    async fn local_session_puts_and_removes_idempotently() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalDirRemoteStore::new(temp.path());
        let session = store.open_session().await?;

        session
            .put_bytes("docs/a.json", b"{}".to_vec(), "application/json")
            .await?;
        session
            .put_bytes("docs/a.json", b"{\"v\":2}".to_vec(), "application/json")
            .await?;
        assert_eq!(
            std::fs::read_to_string(temp.path().join("docs/a.json"))?,
            "{\"v\":2}"
        );

        session.remove("docs/a.json").await?;
        session.remove("docs/a.json").await?;
        assert!(!temp.path().join("docs/a.json").exists());
        Ok(())
    }

    #[test]
    fn local_uri_is_file_scheme() {
        let store = LocalDirRemoteStore::new("out");
        assert_eq!(store.uri(), "file://out");
    }
}
