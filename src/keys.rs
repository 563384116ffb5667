//! Public key cache
//!
//! Public keys assigned to `minisign.pub` are copied into the repository
//! under `db/keys/<KEYID>.pub` so historical signatures stay verifiable even
//! if the original key file moves. The key id comes from the wire format,
//! falling back to the comment line, finally to the source filename stem.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{HistorifyError, SignatureError};
use crate::minisign::PublicKey;
use crate::repository::Repository;

/// Copy a public key into the cache, returning its id.
///
/// Re-importing identical bytes is idempotent; a different key under the
/// same id is refused.
pub fn cache_public_key(repo: &Repository, source: &Path) -> Result<String, HistorifyError> {
    if !source.is_file() {
        return Err(SignatureError::KeyMissing {
            path: source.to_path_buf(),
        }
        .into());
    }
    let key_id = extract_key_id(source)?;

    let keys_dir = repo.keys_dir();
    fs::create_dir_all(&keys_dir).map_err(|e| HistorifyError::io(&keys_dir, e))?;
    let target = keys_dir.join(format!("{key_id}.pub"));

    let source_bytes = fs::read(source).map_err(|e| HistorifyError::io(source, e))?;
    if target.exists() {
        let cached = fs::read(&target).map_err(|e| HistorifyError::io(&target, e))?;
        if cached == source_bytes {
            debug!(key_id, "public key already cached");
            return Ok(key_id);
        }
        return Err(SignatureError::KeyCacheConflict { key_id }.into());
    }

    fs::write(&target, source_bytes).map_err(|e| HistorifyError::io(&target, e))?;
    info!(key_id, target = %target.display(), "cached public key");
    Ok(key_id)
}

/// Locate a cached key by exact id, then by substring match.
pub fn find_public_key(repo: &Repository, key_id: &str) -> Option<PathBuf> {
    let keys_dir = repo.keys_dir();
    let exact = keys_dir.join(format!("{key_id}.pub"));
    if exact.is_file() {
        return Some(exact);
    }
    list_cached_keys(repo)
        .into_iter()
        .find(|(id, _)| id.contains(key_id))
        .map(|(_, path)| path)
}

/// All cached keys as `(id, path)` pairs, sorted by id.
pub fn list_cached_keys(repo: &Repository) -> Vec<(String, PathBuf)> {
    let keys_dir = repo.keys_dir();
    let Ok(entries) = fs::read_dir(&keys_dir) else {
        return Vec::new();
    };
    let mut keys: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pub") {
                return None;
            }
            let id = path.file_stem()?.to_string_lossy().into_owned();
            Some((id, path))
        })
        .collect();
    keys.sort();
    keys
}

fn extract_key_id(source: &Path) -> Result<String, HistorifyError> {
    // Preferred: the 8-byte id in the wire format.
    if let Ok(key) = PublicKey::from_file(source) {
        return Ok(key.key_id_hex());
    }

    // Fallback: the last token of a "... public key KEYID" comment line.
    let content = fs::read_to_string(source).map_err(|e| HistorifyError::io(source, e))?;
    if let Some(first_line) = content.lines().next() {
        if first_line.contains("public key") {
            if let Some(token) = first_line.split_whitespace().last() {
                if token != "key" {
                    return Ok(token.to_string());
                }
            }
        }
    }

    // Last resort: the source filename stem.
    Ok(source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minisign::KeyPair;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(&dir.path().join("repo"), Some("demo")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_cache_uses_wire_format_id() {
        let (dir, repo) = repo();
        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.pub");
        pair.public.write_to(&key_path).unwrap();

        let id = cache_public_key(&repo, &key_path).unwrap();
        assert_eq!(id, pair.public.key_id_hex());
        assert!(repo.keys_dir().join(format!("{id}.pub")).is_file());
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let (dir, repo) = repo();
        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.pub");
        pair.public.write_to(&key_path).unwrap();

        let first = cache_public_key(&repo, &key_path).unwrap();
        let second = cache_public_key(&repo, &key_path).unwrap();
        assert_eq!(first, second);
        assert_eq!(list_cached_keys(&repo).len(), 1);
    }

    #[test]
    fn test_conflicting_key_refused() {
        let (dir, repo) = repo();
        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.pub");
        pair.public.write_to(&key_path).unwrap();
        let id = cache_public_key(&repo, &key_path).unwrap();

        // Different key bytes under the cached id.
        fs::write(
            repo.keys_dir().join(format!("{id}.pub")),
            "untrusted comment: not the same key\nAAAA\n",
        )
        .unwrap();
        let err = cache_public_key(&repo, &key_path).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::Signature(SignatureError::KeyCacheConflict { .. })
        ));
    }

    #[test]
    fn test_comment_line_fallback() {
        let (dir, repo) = repo();
        let key_path = dir.path().join("legacy.pub");
        fs::write(
            &key_path,
            "untrusted comment: minisign public key ABCD1234ABCD1234\nnot-valid-base64\n",
        )
        .unwrap();

        let id = cache_public_key(&repo, &key_path).unwrap();
        assert_eq!(id, "ABCD1234ABCD1234");
    }

    #[test]
    fn test_filename_stem_fallback() {
        let (dir, repo) = repo();
        let key_path = dir.path().join("backup-key.pub");
        fs::write(&key_path, "no comment line here\n").unwrap();

        let id = cache_public_key(&repo, &key_path).unwrap();
        assert_eq!(id, "backup-key");
    }

    #[test]
    fn test_lookup_exact_and_substring() {
        let (dir, repo) = repo();
        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.pub");
        pair.public.write_to(&key_path).unwrap();
        let id = cache_public_key(&repo, &key_path).unwrap();

        assert!(find_public_key(&repo, &id).is_some());
        assert!(find_public_key(&repo, &id[..6]).is_some());
        assert!(find_public_key(&repo, "0000000000000000").is_none());
    }
}
