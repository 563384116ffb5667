//! Changelog chain
//!
//! Changelogs form a backward-pointing linked list anchored at the seed: the
//! first row of every changelog is a closing transaction naming the previous
//! chain artifact and its BLAKE3 digest at closing time. A changelog with a
//! detached signature next to it is sealed; at most one open changelog exists
//! and it is always the chain's last link.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::RepoConfig;
use crate::csv_store::{self, CHANGELOG_HEADER};
use crate::error::{ConfigError, HistorifyError, StateError};
use crate::hash::{digest_file, HashAlgorithm};
use crate::integrity::{IntegrityIndex, IntegrityRecord};
use crate::minisign::{self, SecretKey};
use crate::repository::Repository;
use crate::transaction::{event_timestamp, Transaction};

/// Repository-relative name of the seed, as written in closing rows.
pub const SEED_CHAIN_PATH: &str = "db/seed.bin";

/// Result of a lifecycle call.
#[derive(Debug)]
pub struct LifecycleOutcome {
    /// Repository-relative path of the artifact that was signed, if any.
    pub signed: Option<String>,
    /// File name of the newly opened changelog.
    pub created: String,
}

pub struct Chain {
    root: PathBuf,
    seed_file: PathBuf,
    changes_dir: PathBuf,
    integrity: IntegrityIndex,
    minisign_key: Option<String>,
    minisign_pub: Option<String>,
}

impl Chain {
    pub fn open(repo: &Repository, config: &RepoConfig) -> Result<Self, HistorifyError> {
        let changes_dir = repo.changes_dir(config);
        fs::create_dir_all(&changes_dir).map_err(|e| HistorifyError::io(&changes_dir, e))?;
        Ok(Chain {
            root: repo.root().to_path_buf(),
            seed_file: repo.seed_file(),
            changes_dir,
            integrity: IntegrityIndex::new(repo.integrity_file()),
            minisign_key: config.get("minisign.key").map(str::to_string),
            minisign_pub: config.get("minisign.pub").map(str::to_string),
        })
    }

    pub fn changes_dir(&self) -> &Path {
        &self.changes_dir
    }

    pub fn seed_file(&self) -> &Path {
        &self.seed_file
    }

    pub fn seed_signed(&self) -> bool {
        minisign::sig_path(&self.seed_file).exists()
    }

    pub fn is_sealed(path: &Path) -> bool {
        minisign::sig_path(path).exists()
    }

    /// All changelog files in chain order.
    ///
    /// Same-day changelogs carry a counter suffix that must be compared
    /// numerically: `-2` sorts after `-1` but before `-10`.
    pub fn changelog_files(&self) -> Result<Vec<PathBuf>, HistorifyError> {
        let entries = fs::read_dir(&self.changes_dir)
            .map_err(|e| HistorifyError::io(&self.changes_dir, e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                let name = path.file_name()?.to_str()?;
                if path.is_file() && name.starts_with("changelog-") && name.ends_with(".csv") {
                    Some(path)
                } else {
                    None
                }
            })
            .collect();
        files.sort_by_key(|p| chain_sort_key(p));
        Ok(files)
    }

    /// The unique open (unsigned) changelog, if any.
    pub fn current_open(&self) -> Result<Option<PathBuf>, HistorifyError> {
        Ok(self
            .changelog_files()?
            .into_iter()
            .rev()
            .find(|p| !Self::is_sealed(p)))
    }

    /// The chain-order-greatest sealed changelog, if any.
    pub fn latest_signed(&self) -> Result<Option<PathBuf>, HistorifyError> {
        Ok(self
            .changelog_files()?
            .into_iter()
            .rev()
            .find(|p| Self::is_sealed(p)))
    }

    /// Create a fresh open changelog named for today, with the smallest
    /// counter that yields a non-existing name.
    pub fn create_new_changelog(&self) -> Result<PathBuf, HistorifyError> {
        if let Some(open) = self.current_open()? {
            return Err(StateError::AlreadyOpen {
                file: file_name(&open),
            }
            .into());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut path = self.changes_dir.join(format!("changelog-{today}.csv"));
        let mut counter = 1;
        while path.exists() {
            path = self
                .changes_dir
                .join(format!("changelog-{today}-{counter}.csv"));
            counter += 1;
        }

        csv_store::create(&path, &CHANGELOG_HEADER)?;
        info!(file = %path.display(), "created new changelog");
        Ok(path)
    }

    /// Advance the lifecycle: sign the current anchor and open a fresh
    /// changelog whose first row binds to it.
    ///
    /// The anchor is the open changelog if one exists, else the seed (only if
    /// still unsigned). Signing failure aborts the call with the repository
    /// unchanged; a failed integrity-index update is logged and ignored since
    /// the index is reconstructible.
    pub fn lifecycle(&self, password: Option<&str>) -> Result<LifecycleOutcome, HistorifyError> {
        let key_path = self.minisign_key.as_deref().ok_or(ConfigError::MissingKey {
            key: "minisign.key".to_string(),
        })?;
        if self.minisign_pub.is_none() {
            return Err(ConfigError::MissingKey {
                key: "minisign.pub".to_string(),
            }
            .into());
        }

        let current = self.current_open()?;
        let (signed, reference) = match current {
            Some(ref open) => {
                self.sign(open, key_path, password)?;
                (Some(self.chain_path(open)), open.clone())
            }
            None => {
                if !self.seed_signed() {
                    info!("no open changelog, signing the seed");
                    self.sign(&self.seed_file, key_path, password)?;
                    (Some(SEED_CHAIN_PATH.to_string()), self.seed_file.clone())
                } else {
                    // Recovered READY state: nothing to sign, bind to the
                    // latest sealed artifact.
                    let reference = self
                        .latest_signed()?
                        .unwrap_or_else(|| self.seed_file.clone());
                    (None, reference)
                }
            }
        };

        let reference_digest = digest_file(&reference, HashAlgorithm::Blake3)?;
        let new_changelog = self.create_new_changelog()?;
        let closing = Transaction::Closing {
            timestamp: event_timestamp(),
            path: self.chain_path(&reference),
            blake3: reference_digest.clone(),
        };
        csv_store::append(&new_changelog, &CHANGELOG_HEADER, &closing.to_row())?;

        if let Some(open) = current {
            self.record_sealed(&open, &reference_digest);
        }

        Ok(LifecycleOutcome {
            signed,
            created: file_name(&new_changelog),
        })
    }

    /// Append a transaction to the open changelog.
    pub fn append(&self, tx: &Transaction) -> Result<(), HistorifyError> {
        let open = self
            .current_open()?
            .ok_or(StateError::NoOpenChangelog)?;
        csv_store::append(&open, &CHANGELOG_HEADER, &tx.to_row())
    }

    pub fn append_comment(&self, message: &str) -> Result<(), HistorifyError> {
        self.append(&Transaction::Comment {
            timestamp: event_timestamp(),
            message: message.to_string(),
        })
    }

    /// Parse every transaction of one changelog, in row order.
    pub fn read_transactions(&self, path: &Path) -> Result<Vec<Transaction>, HistorifyError> {
        let rows = csv_store::read_all(path, &CHANGELOG_HEADER)?;
        rows.iter()
            .map(|row| Transaction::from_row(row).map_err(HistorifyError::Schema))
            .collect()
    }

    /// Every transaction of every changelog, in chain order.
    pub fn all_transactions(&self) -> Result<Vec<(String, Transaction)>, HistorifyError> {
        let mut all = Vec::new();
        for file in self.changelog_files()? {
            let name = file_name(&file);
            for tx in self.read_transactions(&file)? {
                all.push((name.clone(), tx));
            }
        }
        Ok(all)
    }

    /// Repository-relative chain path of an artifact (`db/seed.bin` or
    /// `changes/<name>`).
    pub fn chain_path(&self, path: &Path) -> String {
        if path == self.seed_file {
            SEED_CHAIN_PATH.to_string()
        } else {
            path.strip_prefix(&self.root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| file_name(path))
        }
    }

    fn sign(
        &self,
        path: &Path,
        key_path: &str,
        password: Option<&str>,
    ) -> Result<(), HistorifyError> {
        let secret = SecretKey::from_file(Path::new(key_path), password)?;
        minisign::sign_file(path, &secret)?;
        info!(file = %path.display(), key_id = secret.key_id_hex(), "signed");
        Ok(())
    }

    /// Best-effort integrity record for a freshly sealed changelog.
    fn record_sealed(&self, changelog: &Path, digest: &str) {
        let name = file_name(changelog);
        let record = IntegrityRecord {
            changelog_file: name.clone(),
            blake3: digest.to_string(),
            signature_file: format!("{name}.minisig"),
            verified: true,
            verified_timestamp: event_timestamp(),
        };
        if let Err(e) = self.integrity.upsert(record) {
            warn!(file = name, error = %e, "integrity index update failed");
        }
    }
}

/// Chain ordering key: date string plus numeric counter (`-N` suffix).
fn chain_sort_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_prefix("changelog-")
        .and_then(|s| s.strip_suffix(".csv"))
        .unwrap_or(&name);
    if stem.len() > 10 {
        let (date, rest) = stem.split_at(10);
        let counter = rest.trim_start_matches('-').parse().unwrap_or(0);
        (date.to_string(), counter)
    } else {
        (stem.to_string(), 0)
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
