use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context as _;

use crate::document::SchemaProvider;
use crate::formats::{ChapterMapNode, ChapterPayload, ChapterSections};
use crate::hash::{content_hash, path_id};
use crate::publish::Publisher;
use crate::reconcile::{self, Candidate};
use crate::store::index::{Book, Chapter, IndexStore};
use crate::transform::transform_document;

/// File extensions treated as chapters.
const CHAPTER_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Mutable state of one book sync. Lives exactly as long as the sync call.
pub struct BookSession<'s> {
    pub index: &'s dyn IndexStore,
    pub provider: &'s dyn SchemaProvider,
    pub publisher: Publisher,
    pub book: Book,
    /// Index records known before the walk, keyed by chapter id.
    pub known: HashMap<String, Chapter>,
    pub ignores: Vec<PathBuf>,
    pub sections: Vec<ChapterSections>,
    pub chapters_uploaded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl TreeEntry {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Direct children of `dir`, sorted by file name.
pub fn scan_dir(dir: &Path) -> anyhow::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir: {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry: {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat: {}", entry.path().display()))?;
        entries.push(TreeEntry {
            path: entry.path(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(entries)
}

/// Comma-separated ignore entries, each joined onto the book root.
pub fn ignore_prefixes(root: &Path, ignore_paths: &[String]) -> Vec<PathBuf> {
    ignore_paths
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| crate::paths::normalize(&root.join(entry)))
        .collect()
}

/// Hidden segments only count below the book root, so a book may itself live
/// under a dot-directory.
fn is_hidden(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        })
        .unwrap_or(false)
}

fn is_chapter_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            CHAPTER_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

type MapFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<ChapterMapNode>>> + Send + 'a>>;

/// Walks `dir` depth-first, publishing changed chapters on the way, and returns
/// the chapter map of that subtree. Empty folders stay in the map.
pub fn map_directory<'a, 's: 'a>(
    session: &'a mut BookSession<'s>,
    root: &'a Path,
    dir: &'a Path,
) -> MapFuture<'a> {
    Box::pin(async move {
        session.publisher.check_cancelled()?;
        let mut map = Vec::new();

        for entry in scan_dir(dir)? {
            if is_hidden(root, &entry.path) {
                continue;
            }
            if session
                .ignores
                .iter()
                .any(|prefix| entry.path.starts_with(prefix))
            {
                tracing::debug!(path = %entry.path.display(), "ignored");
                continue;
            }

            if entry.is_dir {
                let children = map_directory(session, root, &entry.path).await?;
                map.push(ChapterMapNode {
                    folder: true,
                    name: entry.file_name(),
                    path: Some(path_id(&entry.path)),
                    children: Some(children),
                });
            } else if is_chapter_file(&entry.path) {
                map.push(map_chapter(session, &entry).await?);
            }
        }
        Ok(map)
    })
}

async fn map_chapter(
    session: &mut BookSession<'_>,
    entry: &TreeEntry,
) -> anyhow::Result<ChapterMapNode> {
    session.publisher.check_cancelled()?;
    let path = &entry.path;
    let id = path_id(path);
    let name = entry.stem();

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read chapter: {}", path.display()))?;
    let nodes = session
        .provider
        .schema(path)
        .with_context(|| format!("parse chapter: {}", path.display()))?;
    let transformed = transform_document(
        &nodes,
        path,
        Some(session.book.remote_path.as_str()),
        &mut session.publisher,
        session.index,
    )
    .await?;

    if !transformed.sections.is_empty() {
        session.sections.push(ChapterSections {
            section: transformed.sections,
            path: id.clone(),
            name: name.clone(),
        });
    }

    let payload = ChapterPayload {
        title: name.clone(),
        schema: transformed.schema,
    };
    let candidate = Candidate {
        id: id.clone(),
        source_path: path.clone(),
        name: name.clone(),
        content_hash: content_hash(&bytes),
    };
    let uploaded = reconcile::upsert_chapter(
        &mut session.publisher,
        session.index,
        &session.book,
        session.known.get(&id),
        candidate,
        &payload,
    )
    .await?;
    if uploaded {
        session.chapters_uploaded += 1;
    }

    Ok(ChapterMapNode {
        folder: false,
        name,
        path: Some(id),
        children: None,
    })
}
