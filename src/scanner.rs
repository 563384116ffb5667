//! Category scanner and change classifier
//!
//! A scan replays the chain into a content-addressed view of the category's
//! prior state, walks the directory tree in sorted order, and classifies each
//! regular file as new, unchanged, content-changed, moved, or deleted. Rows
//! are appended to the open changelog as they are classified.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::changelog::Chain;
use crate::error::{HistorifyError, StateError};
use crate::hash::{digest_file_multi, HashAlgorithm};
use crate::repository::Category;
use crate::transaction::{event_timestamp, FileMeta, Transaction};

/// Per-category scan result counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub new: usize,
    pub changed: usize,
    pub moved: usize,
    pub deleted: usize,
    pub duplicates: usize,
    pub unchanged: usize,
}

impl ScanOutcome {
    pub fn total_rows(&self) -> usize {
        self.new + self.changed + self.moved + self.deleted + self.duplicates
    }
}

/// Prior state of one category, derived by replaying the chain.
///
/// `by_path` maps each live path to its last recorded digest; `by_digest`
/// maps each digest to the set of paths assumed to carry it.
#[derive(Debug, Default)]
struct PriorState {
    by_path: BTreeMap<String, String>,
    by_digest: BTreeMap<String, BTreeSet<String>>,
}

impl PriorState {
    fn replay(transactions: &[(String, Transaction)], category: &str) -> PriorState {
        let mut state = PriorState::default();
        for (_, tx) in transactions {
            if tx.category() != Some(category) {
                continue;
            }
            match tx {
                Transaction::New { path, meta, .. }
                | Transaction::Changed { path, meta, .. } => {
                    state.record(path.clone(), meta.blake3.clone());
                }
                Transaction::Move { path, old_path, .. } => {
                    match state.forget(old_path) {
                        Some(digest) => state.record(path.clone(), digest),
                        None => warn!(
                            old_path,
                            new_path = path,
                            "move references an unknown path, ignoring"
                        ),
                    }
                }
                Transaction::Deleted { path, .. } => {
                    state.forget(path);
                }
                // Duplicates are informational; nothing to replay.
                _ => {}
            }
        }
        state
    }

    fn record(&mut self, path: String, digest: String) {
        self.forget(&path);
        self.by_digest
            .entry(digest.clone())
            .or_default()
            .insert(path.clone());
        self.by_path.insert(path, digest);
    }

    fn forget(&mut self, path: &str) -> Option<String> {
        let digest = self.by_path.remove(path)?;
        if let Some(paths) = self.by_digest.get_mut(&digest) {
            paths.remove(path);
            if paths.is_empty() {
                self.by_digest.remove(&digest);
            }
        }
        Some(digest)
    }
}

/// Scan one category and append per-file transactions to the open changelog.
pub fn scan_category(chain: &Chain, category: &Category) -> Result<ScanOutcome, HistorifyError> {
    if chain.current_open()?.is_none() {
        return Err(StateError::NoOpenChangelog.into());
    }

    let prior = PriorState::replay(&chain.all_transactions()?, &category.name);
    debug!(
        category = category.name,
        known_paths = prior.by_path.len(),
        "replayed prior state"
    );

    let rel_paths = walk_sorted(&category.path)?;
    let progress = ProgressBar::new(rel_paths.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_prefix(category.name.clone());

    // Hash everything up front so move detection can see the full walk.
    let mut current: Vec<(String, FileMeta)> = Vec::with_capacity(rel_paths.len());
    for rel in &rel_paths {
        progress.set_message(rel.clone());
        let meta = file_meta(&category.path.join(rel))?;
        current.push((rel.clone(), meta));
        progress.inc(1);
    }
    progress.finish_and_clear();

    let current_set: BTreeSet<&str> = current.iter().map(|(p, _)| p.as_str()).collect();
    let missing: BTreeSet<&str> = prior
        .by_path
        .keys()
        .map(String::as_str)
        .filter(|p| !current_set.contains(*p))
        .collect();

    let mut outcome = ScanOutcome::default();
    let mut consumed_sources: BTreeSet<&str> = BTreeSet::new();

    for (path, meta) in &current {
        match prior.by_path.get(path) {
            Some(prior_digest) if *prior_digest == meta.blake3 => {
                outcome.unchanged += 1;
            }
            Some(_) => {
                chain.append(&Transaction::Changed {
                    timestamp: event_timestamp(),
                    path: path.clone(),
                    category: category.name.clone(),
                    meta: meta.clone(),
                })?;
                outcome.changed += 1;
            }
            None => {
                // Lexicographic old-to-new pairing: the smallest not-yet-
                // consumed missing path with this digest becomes the source.
                let source = prior
                    .by_digest
                    .get(&meta.blake3)
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .find(|p| missing.contains(p) && !consumed_sources.contains(p));
                if let Some(old_path) = source {
                    consumed_sources.insert(old_path);
                    chain.append(&Transaction::Move {
                        timestamp: event_timestamp(),
                        path: path.clone(),
                        category: category.name.clone(),
                        old_path: old_path.to_string(),
                        size: meta.size,
                        ctime: meta.ctime.clone(),
                        mtime: meta.mtime.clone(),
                        sha256: meta.sha256.clone(),
                    })?;
                    outcome.moved += 1;
                } else {
                    chain.append(&Transaction::New {
                        timestamp: event_timestamp(),
                        path: path.clone(),
                        category: category.name.clone(),
                        meta: meta.clone(),
                    })?;
                    outcome.new += 1;

                    // Same content already tracked at a still-present path.
                    let twin = prior
                        .by_digest
                        .get(&meta.blake3)
                        .into_iter()
                        .flatten()
                        .any(|p| p != path && current_set.contains(p.as_str()));
                    if twin {
                        chain.append(&Transaction::Duplicate {
                            timestamp: event_timestamp(),
                            path: path.clone(),
                            category: category.name.clone(),
                            meta: meta.clone(),
                        })?;
                        outcome.duplicates += 1;
                    }
                }
            }
        }
    }

    for path in &missing {
        if consumed_sources.contains(path) {
            continue;
        }
        chain.append(&Transaction::Deleted {
            timestamp: event_timestamp(),
            path: path.to_string(),
            category: category.name.clone(),
        })?;
        outcome.deleted += 1;
    }

    Ok(outcome)
}

/// Every regular file under `root`, as sorted slash-form relative paths.
fn walk_sorted(root: &Path) -> Result<Vec<String>, HistorifyError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            HistorifyError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            paths.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    paths.sort();
    Ok(paths)
}

/// Hash a file and collect its metadata row fields.
fn file_meta(path: &Path) -> Result<FileMeta, HistorifyError> {
    let digests = digest_file_multi(path, &[HashAlgorithm::Blake3, HashAlgorithm::Sha256])?;
    let metadata = fs::metadata(path).map_err(|e| HistorifyError::io(path, e))?;

    let mtime = metadata
        .modified()
        .map(format_local)
        .unwrap_or_default();
    let ctime = change_time(&metadata).unwrap_or_else(|| mtime.clone());

    Ok(FileMeta {
        size: metadata.len(),
        ctime,
        mtime,
        sha256: digests[&HashAlgorithm::Sha256].clone(),
        blake3: digests[&HashAlgorithm::Blake3].clone(),
    })
}

/// File-metadata timestamps are local time, unlike the UTC event timestamp.
fn format_local(time: std::time::SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[cfg(unix)]
fn change_time(metadata: &fs::Metadata) -> Option<String> {
    use chrono::TimeZone;
    use std::os::unix::fs::MetadataExt;
    Local
        .timestamp_opt(metadata.ctime(), 0)
        .single()
        .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
}

#[cfg(not(unix))]
fn change_time(metadata: &fs::Metadata) -> Option<String> {
    metadata.created().ok().map(format_local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::minisign::KeyPair;
    use crate::repository::Repository;
    use crate::transaction::TransactionKind;

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: Repository,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(&dir.path().join("repo"), Some("demo")).unwrap();

        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.key");
        let pub_path = dir.path().join("historify.pub");
        pair.secret.write_to(&key_path, None).unwrap();
        pair.public.write_to(&pub_path).unwrap();

        let mut config = repo.config().unwrap();
        config
            .set("minisign.key", key_path.to_str().unwrap())
            .unwrap();
        config
            .set("minisign.pub", pub_path.to_str().unwrap())
            .unwrap();
        config.set("category.data.path", "data").unwrap();
        fs::create_dir_all(repo.root().join("data")).unwrap();

        Fixture { _dir: dir, repo }
    }

    fn open_chain(f: &Fixture) -> Chain {
        let config = f.repo.config().unwrap();
        Chain::open(&f.repo, &config).unwrap()
    }

    fn data_category(f: &Fixture) -> Category {
        let config = f.repo.config().unwrap();
        f.repo
            .categories(&config)
            .into_iter()
            .find(|c| c.name == "data")
            .unwrap()
    }

    fn category_rows(chain: &Chain) -> Vec<Transaction> {
        chain
            .all_transactions()
            .unwrap()
            .into_iter()
            .map(|(_, tx)| tx)
            .filter(|tx| tx.category() == Some("data"))
            .collect()
    }

    fn write(f: &Fixture, rel: &str, content: &str) {
        let path = f.repo.root().join("data").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_requires_open_changelog() {
        let f = fixture();
        let chain = open_chain(&f);
        let err = scan_category(&chain, &data_category(&f)).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::State(StateError::NoOpenChangelog)
        ));
    }

    #[test]
    fn test_new_file_row() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "hello.txt", "hi\n");

        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.total_rows(), 1);

        let rows = category_rows(&chain);
        match &rows[0] {
            Transaction::New { path, meta, .. } => {
                assert_eq!(path, "hello.txt");
                assert_eq!(meta.size, 3);
                assert_eq!(meta.blake3, blake3::hash(b"hi\n").to_hex().to_string());
            }
            other => panic!("expected new row, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_rescan_without_changes_is_silent() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "a.txt", "alpha");
        write(&f, "nested/b.txt", "beta");

        let first = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(first.new, 2);

        let second = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(second.total_rows(), 0);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn test_rename_is_one_move_row() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "hello.txt", "hi\n");
        scan_category(&chain, &data_category(&f)).unwrap();

        fs::rename(
            f.repo.root().join("data/hello.txt"),
            f.repo.root().join("data/hi.txt"),
        )
        .unwrap();
        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.moved, 1);
        assert_eq!(outcome.new, 0);
        assert_eq!(outcome.deleted, 0);

        let rows = category_rows(&chain);
        match rows.last().unwrap() {
            Transaction::Move { path, old_path, .. } => {
                assert_eq!(path, "hi.txt");
                assert_eq!(old_path, "hello.txt");
            }
            other => panic!("expected move row, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_modified_file_is_changed() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "hi.txt", "hi\n");
        scan_category(&chain, &data_category(&f)).unwrap();

        write(&f, "hi.txt", "bye\n");
        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.total_rows(), 1);

        let rows = category_rows(&chain);
        match rows.last().unwrap() {
            Transaction::Changed { path, meta, .. } => {
                assert_eq!(path, "hi.txt");
                assert_eq!(meta.blake3, blake3::hash(b"bye\n").to_hex().to_string());
            }
            other => panic!("expected changed row, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_removed_file_is_deleted() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "gone.txt", "content");
        scan_category(&chain, &data_category(&f)).unwrap();

        fs::remove_file(f.repo.root().join("data/gone.txt")).unwrap();
        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.deleted, 1);

        let rows = category_rows(&chain);
        match rows.last().unwrap() {
            Transaction::Deleted { path, .. } => assert_eq!(path, "gone.txt"),
            other => panic!("expected deleted row, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_duplicate_content_is_informational() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "original.txt", "same bytes");
        scan_category(&chain, &data_category(&f)).unwrap();

        write(&f, "copy.txt", "same bytes");
        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.duplicates, 1);

        let kinds: Vec<_> = category_rows(&chain)
            .iter()
            .map(Transaction::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::New,
                TransactionKind::New,
                TransactionKind::Duplicate
            ]
        );

        // The duplicate row does not disturb later scans.
        let rescan = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(rescan.total_rows(), 0);
    }

    #[test]
    fn test_move_tiebreak_is_lexicographic() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "a.txt", "identical");
        write(&f, "b.txt", "identical");
        scan_category(&chain, &data_category(&f)).unwrap();

        fs::rename(
            f.repo.root().join("data/a.txt"),
            f.repo.root().join("data/c.txt"),
        )
        .unwrap();
        fs::rename(
            f.repo.root().join("data/b.txt"),
            f.repo.root().join("data/d.txt"),
        )
        .unwrap();
        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.moved, 2);
        assert_eq!(outcome.total_rows(), 2);

        let pairs: Vec<(String, String)> = category_rows(&chain)
            .iter()
            .filter_map(|tx| match tx {
                Transaction::Move { path, old_path, .. } => {
                    Some((old_path.clone(), path.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a.txt".to_string(), "c.txt".to_string()),
                ("b.txt".to_string(), "d.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_prior_state_survives_sealed_changelogs() {
        let f = fixture();
        let chain = open_chain(&f);
        chain.lifecycle(None).unwrap();
        write(&f, "kept.txt", "stable");
        scan_category(&chain, &data_category(&f)).unwrap();

        // Seal the changelog holding the new row and open a fresh one.
        chain.lifecycle(None).unwrap();

        let outcome = scan_category(&chain, &data_category(&f)).unwrap();
        assert_eq!(outcome.total_rows(), 0);
        assert_eq!(outcome.unchanged, 1);
    }
}
