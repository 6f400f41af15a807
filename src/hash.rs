use std::path::Path;

use sha2::{Digest as _, Sha256};

/// Fingerprint of a byte sequence, used both for change detection and as the
/// remote key of media objects.
#[must_use]
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(bytes.as_ref());
    hex::encode(digest)
}

/// Stable identifier of a source path. Identity only: renaming a file changes it.
#[must_use]
pub fn path_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("# Title\n"), content_hash(b"# Title\n"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn content_hash_changes_with_single_byte() {
        assert_ne!(content_hash("chapter one"), content_hash("chapter onf"));
    }

    #[test]
    fn path_id_is_stable_and_distinct() {
        let a = PathBuf::from("/books/intro/a.md");
        let b = PathBuf::from("/books/intro/b.md");
        assert_eq!(path_id(&a), path_id(&a));
        assert_ne!(path_id(&a), path_id(&b));
        assert_eq!(path_id(&a).len(), 32);
    }
}
