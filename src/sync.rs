use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::document::{Node, SchemaProvider};
use crate::formats::{BookMap, DocPayload, chapter_object, map_object, text_object};
use crate::hash::{content_hash, path_id};
use crate::markdown::MarkdownProvider;
use crate::notify::Notifier;
use crate::paths::canonical_source;
use crate::publish::{Publisher, UploadPolicy};
use crate::reconcile::{self, Candidate};
use crate::store::index::{Book, BookStrategy, Chapter, IndexStore, LocalFsIndexStore, NewBook};
use crate::store::remote::{self, RemoteStore};
use crate::transform::transform_document;
use crate::walker::{BookSession, ignore_prefixes, map_directory};

/// Book description, from CLI flags or a YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EbookConfig {
    /// Existing book id; when absent the book is looked up by root.
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    pub remote_path: String,
    pub root: PathBuf,
    #[serde(default = "default_strategy")]
    pub strategy: BookStrategy,
    #[serde(default)]
    pub ignore_paths: Vec<String>,
}

fn default_strategy() -> BookStrategy {
    BookStrategy::Auto
}

impl EbookConfig {
    pub async fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read book config: {}", path.display()))?;
        let mut config: EbookConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse book config: {}", path.display()))?;
        // Relative roots are relative to the config file.
        if config.root.is_relative() {
            if let Some(dir) = path.parent() {
                config.root = dir.join(&config.root);
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<u64>,
    /// Remote object paths written, in order.
    pub uploaded: Vec<String>,
    /// Remote object paths deleted, in order.
    pub removed: Vec<String>,
    /// Chapter ids dropped from the index.
    pub pruned: Vec<String>,
}

impl SyncReport {
    fn from_publisher(book_id: Option<u64>, publisher: &Publisher, pruned: Vec<String>) -> Self {
        Self {
            book_id,
            uploaded: publisher.uploaded().to_vec(),
            removed: publisher.removed().to_vec(),
            pruned,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty() && self.removed.is_empty() && self.pruned.is_empty()
    }
}

/// Entry point for syncing standalone docs and whole books. Runs one sync at a
/// time; concurrent callers queue up.
pub struct Syncer {
    index: Arc<dyn IndexStore>,
    remote: Arc<dyn RemoteStore>,
    provider: Arc<dyn SchemaProvider>,
    notifier: Arc<dyn Notifier>,
    policy: UploadPolicy,
    running: Mutex<()>,
}

impl Syncer {
    pub fn new(
        index: Arc<dyn IndexStore>,
        remote: Arc<dyn RemoteStore>,
        provider: Arc<dyn SchemaProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            index,
            remote,
            provider,
            notifier,
            policy: UploadPolicy::default(),
            running: Mutex::new(()),
        }
    }

    /// Local index, configured remote backend and Markdown sources.
    pub fn from_config(config: &SyncConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            Arc::new(LocalFsIndexStore::new(config.data_dir.clone())),
            remote::from_backend(&config.remote),
            Arc::new(MarkdownProvider),
            notifier,
        )
        .with_upload_policy(UploadPolicy::from(config))
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn index(&self) -> &dyn IndexStore {
        self.index.as_ref()
    }

    async fn open_publisher(&self, cancel: &CancellationToken) -> anyhow::Result<Publisher> {
        let session = self
            .remote
            .open_session()
            .await
            .with_context(|| format!("open remote session: {}", self.remote.uri()))?;
        Ok(Publisher::new(session, self.policy, cancel.clone()))
    }

    /// Publishes one document outside of any book. The share payload goes to
    /// the notifier before anything is uploaded.
    pub async fn sync_doc(
        &self,
        source_path: &Path,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        let _running = self.running.lock().await;
        let source_path = canonical_source(source_path)?;
        let name = file_stem(&source_path);
        tracing::info!(path = %source_path.display(), "sync doc");

        let mut publisher = self.open_publisher(cancel).await?;
        let transformed =
            transform_document(nodes, &source_path, None, &mut publisher, self.index.as_ref())
                .await?;
        let payload = DocPayload {
            schema: transformed.schema,
            title: name.clone(),
        };
        let shared = serde_json::to_string(&payload).context("serialize doc payload")?;
        self.notifier.notify(&shared);

        let bytes = tokio::fs::read(&source_path)
            .await
            .with_context(|| format!("read doc: {}", source_path.display()))?;
        let id = path_id(&source_path);
        let existing = self.index.doc(&id).await?;
        reconcile::upsert_doc(
            &mut publisher,
            self.index.as_ref(),
            existing.as_ref(),
            Candidate {
                id,
                source_path,
                name,
                content_hash: content_hash(&bytes),
            },
            &payload,
        )
        .await?;

        Ok(SyncReport::from_publisher(None, &publisher, Vec::new()))
    }

    /// Parses the file with the configured provider, then [`Syncer::sync_doc`].
    pub async fn sync_doc_file(
        &self,
        source_path: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        let nodes = self
            .provider
            .schema(source_path)
            .with_context(|| format!("parse doc: {}", source_path.display()))?;
        self.sync_doc(source_path, &nodes, cancel).await
    }

    /// Mirrors the book rooted at `config.root`: changed chapters, the chapter
    /// map, the section index, and removal of chapters that disappeared.
    pub async fn sync_ebook(
        &self,
        config: &EbookConfig,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SyncReport> {
        if config.strategy == BookStrategy::Custom {
            tracing::warn!(name = %config.name, "custom strategy has no sync behavior; skipping");
            return Ok(SyncReport::default());
        }
        if config.remote_path.trim().is_empty() {
            anyhow::bail!("remote path must not be empty");
        }

        let _running = self.running.lock().await;
        let root = canonical_source(&config.root)?;
        if !root.is_dir() {
            anyhow::bail!("book root is not a directory: {}", root.display());
        }
        tracing::info!(root = %root.display(), remote_path = %config.remote_path, "sync book");

        let mut publisher = self.open_publisher(cancel).await?;
        let (book, known) = self.prepare_book(&root, config, &mut publisher).await?;

        let mut session = BookSession {
            index: self.index.as_ref(),
            provider: self.provider.as_ref(),
            publisher,
            ignores: ignore_prefixes(&root, &book.ignore_paths),
            book,
            known,
            sections: Vec::new(),
            chapters_uploaded: 0,
        };
        let map = map_directory(&mut session, &root, &root).await?;

        let BookSession {
            mut publisher,
            mut book,
            sections,
            chapters_uploaded,
            ..
        } = session;

        let book_map = BookMap {
            title: book.name.clone(),
            path: book.remote_path.clone(),
            map,
        };
        let map_hash = fingerprint(&book_map)?;
        if chapters_uploaded > 0 || book.map_hash.as_deref() != Some(map_hash.as_str()) {
            publisher
                .put_json(&map_object(&book.remote_path), &book_map)
                .await?;
            book.map_hash = Some(map_hash);
            self.index.put_book(&book).await?;
        }

        if sections.is_empty() {
            if book.text_hash.is_some() {
                if let Err(err) = publisher.remove(&text_object(&book.remote_path)).await {
                    tracing::warn!(?err, "failed to remove empty section index");
                }
                book.text_hash = None;
                self.index.put_book(&book).await?;
            }
        } else {
            let text_hash = fingerprint(&sections)?;
            if book.text_hash.as_deref() != Some(text_hash.as_str()) {
                publisher
                    .put_json(&text_object(&book.remote_path), &sections)
                    .await?;
                book.text_hash = Some(text_hash);
                self.index.put_book(&book).await?;
            }
        }

        let pruned =
            reconcile::prune_stale(&mut publisher, self.index.as_ref(), &book, &book_map.map)
                .await?;

        let report = SyncReport::from_publisher(Some(book.id), &publisher, pruned);
        tracing::info!(
            book_id = book.id,
            uploaded = report.uploaded.len(),
            removed = report.removed.len(),
            pruned = report.pruned.len(),
            "book synced"
        );
        Ok(report)
    }

    /// Finds or creates the book record and brings it in line with `config`.
    /// Returns the chapter records to diff against. After a remote path change
    /// their hashes are cleared so every chapter is republished.
    async fn prepare_book(
        &self,
        root: &Path,
        config: &EbookConfig,
        publisher: &mut Publisher,
    ) -> anyhow::Result<(Book, HashMap<String, Chapter>)> {
        let existing = match config.id {
            Some(id) => Some(
                self.index
                    .book(id)
                    .await?
                    .with_context(|| format!("unknown book id: {id}"))?,
            ),
            None => self.index.book_by_root(root).await?,
        };

        let Some(mut book) = existing else {
            let book = self
                .index
                .create_book(NewBook {
                    root_path: root.to_path_buf(),
                    remote_path: config.remote_path.clone(),
                    name: config.name.clone(),
                    strategy: config.strategy,
                    ignore_paths: config.ignore_paths.clone(),
                })
                .await?;
            tracing::info!(book_id = book.id, "created book");
            return Ok((book, HashMap::new()));
        };

        let mut chapters = self.index.chapters_by_book(book.id).await?;
        if book.remote_path != config.remote_path {
            tracing::info!(
                book_id = book.id,
                from = %book.remote_path,
                to = %config.remote_path,
                "remote path changed; removing objects under the old path"
            );
            let stale = [map_object(&book.remote_path), text_object(&book.remote_path)]
                .into_iter()
                .chain(
                    chapters
                        .iter()
                        .map(|chapter| chapter_object(&book.remote_path, &chapter.id)),
                );
            for object in stale {
                publisher.check_cancelled()?;
                if let Err(err) = publisher.remove(&object).await {
                    tracing::warn!(object = %object, ?err, "failed to remove");
                }
            }
            // Cleared before the book moves so an interrupted migration still
            // republishes every chapter on the next run.
            for chapter in &mut chapters {
                chapter.content_hash.clear();
                chapter.updated_at = Utc::now();
                self.index
                    .put_chapter(chapter)
                    .await
                    .context("invalidate chapter")?;
            }
            book.remote_path = config.remote_path.clone();
            book.map_hash = None;
            book.text_hash = None;
        }

        book.root_path = root.to_path_buf();
        book.name = config.name.clone();
        book.strategy = config.strategy;
        book.ignore_paths = config.ignore_paths.clone();
        book.updated_at = Utc::now();
        self.index.put_book(&book).await?;

        let known = chapters
            .into_iter()
            .map(|chapter| (chapter.id.clone(), chapter))
            .collect();
        Ok((book, known))
    }
}

fn fingerprint<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    let bytes = serde_json::to_vec(value).context("serialize for fingerprint")?;
    Ok(content_hash(bytes))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yaml_config_resolves_relative_root() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("book.yaml");
        std::fs::write(
            &path,
            "name: Guide\nremote_path: guide\nroot: ./src\nignore_paths: [drafts]\n",
        )?;

        let config = EbookConfig::from_yaml_file(&path).await?;
        assert_eq!(config.name, "Guide");
        assert_eq!(config.root, temp.path().join("./src"));
        assert_eq!(config.strategy, BookStrategy::Auto);
        assert_eq!(config.ignore_paths, vec!["drafts".to_owned()]);
        assert_eq!(config.id, None);
        Ok(())
    }

    #[tokio::test]
    async fn yaml_config_rejects_unknown_fields() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("book.yaml");
        std::fs::write(&path, "name: G\nremote_path: g\nroot: .\ncolour: red\n")?;
        assert!(EbookConfig::from_yaml_file(&path).await.is_err());
        Ok(())
    }
}
