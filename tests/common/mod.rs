#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use booksync::Syncer;
use booksync::markdown::MarkdownProvider;
use booksync::notify::MemoryNotifier;
use booksync::publish::UploadPolicy;
use booksync::store::index::LocalFsIndexStore;
use booksync::store::remote::{LocalDirRemoteStore, RemoteSession, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Put(String),
    Remove(String),
}

/// Local directory store that records every operation and can be told to fail
/// uploads whose path contains a marker.
pub struct RecordingStore {
    inner: LocalDirRemoteStore,
    ops: Arc<Mutex<Vec<Op>>>,
    fail_puts_containing: Arc<Mutex<Option<String>>>,
}

impl RecordingStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            inner: LocalDirRemoteStore::new(dir),
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_puts_containing: Arc::new(Mutex::new(None)),
        }
    }

    pub fn fail_puts_containing(&self, marker: Option<&str>) {
        *self.fail_puts_containing.lock().unwrap() = marker.map(str::to_owned);
    }

    pub fn take_ops(&self) -> Vec<Op> {
        std::mem::take(&mut *self.ops.lock().unwrap())
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    fn uri(&self) -> String {
        self.inner.uri()
    }

    async fn open_session(&self) -> anyhow::Result<Box<dyn RemoteSession>> {
        Ok(Box::new(RecordingSession {
            inner: self.inner.open_session().await?,
            ops: Arc::clone(&self.ops),
            fail_puts_containing: Arc::clone(&self.fail_puts_containing),
        }))
    }
}

struct RecordingSession {
    inner: Box<dyn RemoteSession>,
    ops: Arc<Mutex<Vec<Op>>>,
    fail_puts_containing: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl RemoteSession for RecordingSession {
    async fn put_bytes(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> anyhow::Result<()> {
        let marker = self.fail_puts_containing.lock().unwrap().clone();
        if marker.is_some_and(|marker| path.contains(&marker)) {
            anyhow::bail!("injected upload failure: {path}");
        }
        self.inner.put_bytes(path, bytes, content_type).await?;
        self.ops.lock().unwrap().push(Op::Put(path.to_owned()));
        Ok(())
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        self.inner.remove(path).await?;
        self.ops.lock().unwrap().push(Op::Remove(path.to_owned()));
        Ok(())
    }
}

pub struct Harness {
    pub temp: tempfile::TempDir,
    pub root: PathBuf,
    pub remote_dir: PathBuf,
    pub store: Arc<RecordingStore>,
    pub index: Arc<LocalFsIndexStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub syncer: Syncer,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        let temp = tempfile::TempDir::new()?;
        let root = temp.path().join("book");
        std::fs::create_dir_all(&root)?;
        let remote_dir = temp.path().join("remote");
        let store = Arc::new(RecordingStore::new(&remote_dir));
        let index = Arc::new(LocalFsIndexStore::new(temp.path().join("data")));
        let notifier = Arc::new(MemoryNotifier::new());
        let syncer = Syncer::new(
            index.clone(),
            store.clone(),
            Arc::new(MarkdownProvider),
            notifier.clone(),
        )
        .with_upload_policy(UploadPolicy {
            retries: 1,
            timeout: std::time::Duration::from_secs(5),
        });
        Ok(Self {
            temp,
            root,
            remote_dir,
            store,
            index,
            notifier,
            syncer,
        })
    }

    pub fn write(&self, rel: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read_remote_json(&self, object: &str) -> anyhow::Result<serde_json::Value> {
        let raw = std::fs::read_to_string(self.remote_dir.join(object))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn remote_exists(&self, object: &str) -> bool {
        self.remote_dir.join(object).exists()
    }
}

pub fn puts(ops: &[Op]) -> Vec<&str> {
    ops.iter()
        .filter_map(|op| match op {
            Op::Put(path) => Some(path.as_str()),
            Op::Remove(_) => None,
        })
        .collect()
}

pub fn removes(ops: &[Op]) -> Vec<&str> {
    ops.iter()
        .filter_map(|op| match op {
            Op::Remove(path) => Some(path.as_str()),
            Op::Put(_) => None,
        })
        .collect()
}
