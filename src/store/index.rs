use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BookStrategy {
    Auto,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub root_path: PathBuf,
    pub remote_path: String,
    pub name: String,
    pub strategy: BookStrategy,
    pub ignore_paths: Vec<String>,
    pub updated_at: DateTime<Utc>,
    /// Fingerprint of the last published `map.json`.
    #[serde(default)]
    pub map_hash: Option<String>,
    /// Fingerprint of the last published `text.json`.
    #[serde(default)]
    pub text_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub root_path: PathBuf,
    pub remote_path: String,
    pub name: String,
    pub strategy: BookStrategy,
    pub ignore_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub book_id: u64,
    pub source_path: PathBuf,
    pub name: String,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneDoc {
    pub id: String,
    pub source_path: PathBuf,
    pub name: String,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Same as `content_hash`: identical bytes share one record.
    pub id: String,
    pub source_path: PathBuf,
    pub content_hash: String,
}

/// Persistent record of what has already been published.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn book(&self, id: u64) -> anyhow::Result<Option<Book>>;
    async fn book_by_root(&self, root_path: &Path) -> anyhow::Result<Option<Book>>;
    async fn books(&self) -> anyhow::Result<Vec<Book>>;
    async fn create_book(&self, book: NewBook) -> anyhow::Result<Book>;
    async fn put_book(&self, book: &Book) -> anyhow::Result<()>;

    async fn chapters_by_book(&self, book_id: u64) -> anyhow::Result<Vec<Chapter>>;
    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()>;
    async fn delete_chapter(&self, book_id: u64, chapter_id: &str) -> anyhow::Result<()>;

    async fn doc(&self, id: &str) -> anyhow::Result<Option<StandaloneDoc>>;
    async fn put_doc(&self, doc: &StandaloneDoc) -> anyhow::Result<()>;

    async fn media(&self, id: &str) -> anyhow::Result<Option<MediaAsset>>;
    async fn put_media(&self, asset: &MediaAsset) -> anyhow::Result<()>;
}

const BOOKS_FILE: &str = "books.json";
const CHAPTERS_FILE: &str = "chapters.json";
const DOCS_FILE: &str = "docs.json";
const FILES_FILE: &str = "files.json";

/// Index kept as one JSON array per record kind under a data directory.
#[derive(Debug)]
pub struct LocalFsIndexStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsIndexStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn collection_path(&self, file: &str) -> PathBuf {
        self.base_dir.join("index").join(file)
    }

    async fn load<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<Vec<T>> {
        let path = self.collection_path(file);
        let items = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Ok(items.unwrap_or_default())
    }

    async fn modify<T, R>(&self, file: &str, f: impl FnOnce(&mut Vec<T>) -> R + Send) -> anyhow::Result<R>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        R: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load::<T>(file).await?;
        let out = f(&mut items);
        let path = self.collection_path(file);
        write_json_atomic(&path, &items)
            .await
            .with_context(|| format!("write: {}", path.display()))?;
        Ok(out)
    }
}

#[async_trait]
impl IndexStore for LocalFsIndexStore {
    async fn book(&self, id: u64) -> anyhow::Result<Option<Book>> {
        let books = self.load::<Book>(BOOKS_FILE).await?;
        Ok(books.into_iter().find(|b| b.id == id))
    }

    async fn book_by_root(&self, root_path: &Path) -> anyhow::Result<Option<Book>> {
        let books = self.load::<Book>(BOOKS_FILE).await?;
        Ok(books.into_iter().find(|b| b.root_path == root_path))
    }

    async fn books(&self) -> anyhow::Result<Vec<Book>> {
        self.load(BOOKS_FILE).await
    }

    async fn create_book(&self, book: NewBook) -> anyhow::Result<Book> {
        self.modify(BOOKS_FILE, move |books: &mut Vec<Book>| {
            let id = books.iter().map(|b| b.id).max().unwrap_or(0) + 1;
            let book = Book {
                id,
                root_path: book.root_path,
                remote_path: book.remote_path,
                name: book.name,
                strategy: book.strategy,
                ignore_paths: book.ignore_paths,
                updated_at: Utc::now(),
                map_hash: None,
                text_hash: None,
            };
            books.push(book.clone());
            book
        })
        .await
        .context("create book")
    }

    async fn put_book(&self, book: &Book) -> anyhow::Result<()> {
        let book = book.clone();
        self.modify(BOOKS_FILE, move |books: &mut Vec<Book>| {
            upsert_by(books, book, |a, b| a.id == b.id);
        })
        .await
        .context("save book")
    }

    async fn chapters_by_book(&self, book_id: u64) -> anyhow::Result<Vec<Chapter>> {
        let chapters = self.load::<Chapter>(CHAPTERS_FILE).await?;
        Ok(chapters.into_iter().filter(|c| c.book_id == book_id).collect())
    }

    async fn put_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let chapter = chapter.clone();
        self.modify(CHAPTERS_FILE, move |chapters: &mut Vec<Chapter>| {
            upsert_by(chapters, chapter, |a, b| a.book_id == b.book_id && a.id == b.id);
        })
        .await
        .context("save chapter")
    }

    async fn delete_chapter(&self, book_id: u64, chapter_id: &str) -> anyhow::Result<()> {
        let chapter_id = chapter_id.to_owned();
        self.modify(CHAPTERS_FILE, move |chapters: &mut Vec<Chapter>| {
            chapters.retain(|c| !(c.book_id == book_id && c.id == chapter_id));
        })
        .await
        .context("delete chapter")
    }

    async fn doc(&self, id: &str) -> anyhow::Result<Option<StandaloneDoc>> {
        let docs = self.load::<StandaloneDoc>(DOCS_FILE).await?;
        Ok(docs.into_iter().find(|d| d.id == id))
    }

    async fn put_doc(&self, doc: &StandaloneDoc) -> anyhow::Result<()> {
        let doc = doc.clone();
        self.modify(DOCS_FILE, move |docs: &mut Vec<StandaloneDoc>| {
            upsert_by(docs, doc, |a, b| a.id == b.id);
        })
        .await
        .context("save doc")
    }

    async fn media(&self, id: &str) -> anyhow::Result<Option<MediaAsset>> {
        let files = self.load::<MediaAsset>(FILES_FILE).await?;
        Ok(files.into_iter().find(|f| f.id == id))
    }

    async fn put_media(&self, asset: &MediaAsset) -> anyhow::Result<()> {
        let asset = asset.clone();
        self.modify(FILES_FILE, move |files: &mut Vec<MediaAsset>| {
            upsert_by(files, asset, |a, b| a.id == b.id);
        })
        .await
        .context("save media asset")
    }
}

fn upsert_by<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T, &T) -> bool) {
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| SyncError::IndexCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_book(root: &str) -> NewBook {
        NewBook {
            root_path: PathBuf::from(root),
            remote_path: "guide".to_owned(),
            name: "Guide".to_owned(),
            strategy: BookStrategy::Auto,
            ignore_paths: Vec::new(),
        }
    }

    fn chapter(book_id: u64, id: &str, hash: &str) -> Chapter {
        Chapter {
            id: id.to_owned(),
            book_id,
            source_path: PathBuf::from(format!("/src/{id}.md")),
            name: id.to_owned(),
            content_hash: hash.to_owned(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn books_get_increasing_ids() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsIndexStore::new(temp.path());

        let first = store.create_book(new_book("/a")).await?;
        let second = store.create_book(new_book("/b")).await?;
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(store.book_by_root(Path::new("/b")).await?, Some(second));
        assert_eq!(store.book(7).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn chapters_are_scoped_by_book() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsIndexStore::new(temp.path());

        store.put_chapter(&chapter(1, "c1", "h1")).await?;
        store.put_chapter(&chapter(2, "c1", "h1")).await?;
        store.put_chapter(&chapter(1, "c1", "h2")).await?;

        let chapters = store.chapters_by_book(1).await?;
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].content_hash, "h2");

        store.delete_chapter(1, "c1").await?;
        assert!(store.chapters_by_book(1).await?.is_empty());
        assert_eq!(store.chapters_by_book(2).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_collection_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let index_dir = temp.path().join("index");
        std::fs::create_dir_all(&index_dir)?;
        std::fs::write(index_dir.join(DOCS_FILE), b"{not json")?;

        let store = LocalFsIndexStore::new(temp.path());
        let err = store.doc("x").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::IndexCorrupt { .. })
        ));
        Ok(())
    }
}
