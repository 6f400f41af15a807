use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use percent_encoding::percent_decode_str;

/// `true` for anything carrying a URL scheme (`https:`, `mailto:`, ...) or a
/// protocol-relative `//host` prefix.
pub fn is_external(reference: &str) -> bool {
    if reference.starts_with("//") {
        return true;
    }
    match url::Url::parse(reference) {
        // A single letter is a Windows drive (`C:\...`), not a scheme.
        Ok(url) => url.scheme().len() > 1,
        Err(_) => false,
    }
}

/// Undoes percent-encoding in a Markdown destination (`my%20notes.md`).
/// Sequences that do not decode to UTF-8 are kept lossily.
pub fn decode_reference(reference: &str) -> Cow<'_, str> {
    percent_decode_str(reference).decode_utf8_lossy()
}

/// Resolves a reference found inside `doc_path` against the document's directory.
/// The reference is percent-decoded first.
pub fn resolve_reference(doc_path: &Path, reference: &str) -> PathBuf {
    let decoded = decode_reference(reference);
    let reference = Path::new(decoded.as_ref());
    if reference.is_absolute() {
        return normalize(reference);
    }
    let base = doc_path.parent().unwrap_or_else(|| Path::new(""));
    normalize(&base.join(reference))
}

/// Lexically removes `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Absolute, normalized form used for every identity computation.
pub fn canonical_source(path: &Path) -> anyhow::Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("resolve absolute path: {}", path.display()))?;
    Ok(normalize(&absolute))
}

/// Filesystem stat; any failure counts as "does not exist".
pub fn exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}
