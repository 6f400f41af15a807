use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;

use crate::formats::{ChapterMapNode, chapter_object, doc_object, leaf_ids};
use crate::publish::Publisher;
use crate::store::index::{Book, Chapter, IndexStore, StandaloneDoc};

/// What the walker learned about one source file.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub source_path: PathBuf,
    pub name: String,
    pub content_hash: String,
}

/// Publishes the chapter unless its recorded hash already matches. The index
/// record is written only after the remote put succeeded. Returns whether an
/// upload happened.
pub async fn upsert_chapter<T: Serialize + ?Sized>(
    publisher: &mut Publisher,
    index: &dyn IndexStore,
    book: &Book,
    existing: Option<&Chapter>,
    candidate: Candidate,
    payload: &T,
) -> anyhow::Result<bool> {
    if existing.is_some_and(|chapter| chapter.content_hash == candidate.content_hash) {
        tracing::debug!(chapter = %candidate.id, "chapter unchanged");
        return Ok(false);
    }

    publisher
        .put_json(&chapter_object(&book.remote_path, &candidate.id), payload)
        .await?;
    index
        .put_chapter(&Chapter {
            id: candidate.id,
            book_id: book.id,
            source_path: candidate.source_path,
            name: candidate.name,
            content_hash: candidate.content_hash,
            updated_at: Utc::now(),
        })
        .await
        .context("record chapter")?;
    Ok(true)
}

/// Same contract as [`upsert_chapter`] for standalone documents.
pub async fn upsert_doc<T: Serialize + ?Sized>(
    publisher: &mut Publisher,
    index: &dyn IndexStore,
    existing: Option<&StandaloneDoc>,
    candidate: Candidate,
    payload: &T,
) -> anyhow::Result<bool> {
    if existing.is_some_and(|doc| doc.content_hash == candidate.content_hash) {
        tracing::debug!(doc = %candidate.id, "doc unchanged");
        return Ok(false);
    }

    publisher.put_json(&doc_object(&candidate.id), payload).await?;
    index
        .put_doc(&StandaloneDoc {
            id: candidate.id,
            source_path: candidate.source_path,
            name: candidate.name,
            content_hash: candidate.content_hash,
            updated_at: Utc::now(),
        })
        .await
        .context("record doc")?;
    Ok(true)
}

/// Drops every chapter of `book` that no longer appears in `map`. A failed
/// remote delete leaves an orphaned object behind but the record still goes.
pub async fn prune_stale(
    publisher: &mut Publisher,
    index: &dyn IndexStore,
    book: &Book,
    map: &[ChapterMapNode],
) -> anyhow::Result<Vec<String>> {
    let live = leaf_ids(map).into_iter().collect::<HashSet<_>>();
    let mut pruned = Vec::new();

    for chapter in index.chapters_by_book(book.id).await? {
        if live.contains(chapter.id.as_str()) {
            continue;
        }
        publisher.check_cancelled()?;

        let object = chapter_object(&book.remote_path, &chapter.id);
        if let Err(err) = publisher.remove(&object).await {
            tracing::warn!(
                object = %object,
                ?err,
                "failed to remove stale chapter; leaving orphaned object"
            );
        }
        index
            .delete_chapter(book.id, &chapter.id)
            .await
            .with_context(|| format!("delete chapter record: {}", chapter.id))?;
        tracing::info!(chapter = %chapter.id, name = %chapter.name, "pruned chapter");
        pruned.push(chapter.id);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::publish::UploadPolicy;
    use crate::store::index::{BookStrategy, LocalFsIndexStore, NewBook};
    use crate::store::remote::RemoteSession;

    #[derive(Default)]
    struct Log {
        puts: Mutex<Vec<String>>,
        removes: Mutex<Vec<String>>,
    }

    struct LoggingSession {
        log: std::sync::Arc<Log>,
        fail_removes: bool,
    }

    #[async_trait]
    impl RemoteSession for LoggingSession {
        async fn put_bytes(&self, path: &str, _bytes: Vec<u8>, _ct: &str) -> anyhow::Result<()> {
            self.log.puts.lock().unwrap().push(path.to_owned());
            Ok(())
        }

        async fn remove(&self, path: &str) -> anyhow::Result<()> {
            self.log.removes.lock().unwrap().push(path.to_owned());
            if self.fail_removes {
                anyhow::bail!("delete refused");
            }
            Ok(())
        }
    }

    fn publisher(fail_removes: bool) -> (Publisher, std::sync::Arc<Log>) {
        let log = std::sync::Arc::new(Log::default());
        let session: Box<dyn RemoteSession> = Box::new(LoggingSession {
            log: std::sync::Arc::clone(&log),
            fail_removes,
        });
        let publisher = Publisher::new(session, UploadPolicy::default(), CancellationToken::new());
        (publisher, log)
    }

    async fn book(index: &LocalFsIndexStore) -> anyhow::Result<Book> {
        index
            .create_book(NewBook {
                root_path: PathBuf::from("/src/guide"),
                remote_path: "guide".to_owned(),
                name: "Guide".to_owned(),
                strategy: BookStrategy::Auto,
                ignore_paths: Vec::new(),
            })
            .await
    }

    fn candidate(id: &str, hash: &str) -> Candidate {
        Candidate {
            id: id.to_owned(),
            source_path: PathBuf::from(format!("/src/guide/{id}.md")),
            name: id.to_owned(),
            content_hash: hash.to_owned(),
        }
    }

    fn leaf(id: &str) -> ChapterMapNode {
        ChapterMapNode {
            folder: false,
            name: id.to_owned(),
            path: Some(id.to_owned()),
            children: None,
        }
    }

    #[tokio::test]
    async fn unchanged_chapter_is_not_uploaded() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let index = LocalFsIndexStore::new(temp.path());
        let book = book(&index).await?;
        let (mut publisher, log) = publisher(false);
        let payload = serde_json::json!({"title": "a"});

        assert!(upsert_chapter(&mut publisher, &index, &book, None, candidate("a", "h1"), &payload).await?);
        let recorded = index.chapters_by_book(book.id).await?;
        assert!(
            !upsert_chapter(&mut publisher, &index, &book, recorded.first(), candidate("a", "h1"), &payload)
                .await?
        );
        assert!(
            upsert_chapter(&mut publisher, &index, &book, recorded.first(), candidate("a", "h2"), &payload)
                .await?
        );

        assert_eq!(
            *log.puts.lock().unwrap(),
            vec!["books/guide/a.json".to_owned(), "books/guide/a.json".to_owned()]
        );
        assert_eq!(index.chapters_by_book(book.id).await?[0].content_hash, "h2");
        Ok(())
    }

    #[tokio::test]
    async fn prune_removes_records_even_when_remote_delete_fails() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let index = LocalFsIndexStore::new(temp.path());
        let book = book(&index).await?;
        let (mut publisher, log) = publisher(true);
        let payload = serde_json::json!({});
        for id in ["a", "b", "c"] {
            upsert_chapter(&mut publisher, &index, &book, None, candidate(id, "h"), &payload).await?;
        }

        let mut pruned = prune_stale(&mut publisher, &index, &book, &[leaf("b")]).await?;
        pruned.sort();
        assert_eq!(pruned, vec!["a".to_owned(), "c".to_owned()]);

        let remaining = index.chapters_by_book(book.id).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
        assert_eq!(log.removes.lock().unwrap().len(), 2);
        assert!(publisher.removed().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn doc_upsert_skips_matching_hash() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let index = LocalFsIndexStore::new(temp.path());
        let (mut publisher, log) = publisher(false);
        let payload = serde_json::json!({});

        assert!(upsert_doc(&mut publisher, &index, None, candidate("d", "h"), &payload).await?);
        let existing = index.doc("d").await?;
        assert!(!upsert_doc(&mut publisher, &index, existing.as_ref(), candidate("d", "h"), &payload).await?);
        assert_eq!(*log.puts.lock().unwrap(), vec!["docs/d.json".to_owned()]);
        Ok(())
    }
}
