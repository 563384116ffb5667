//! Repository layout and initialization
//!
//! A repository is a directory with a `db/` metadata tree (configuration,
//! random seed, key cache, integrity index) and a changes directory holding
//! the changelog chain. The seed is written exactly once; re-initializing is
//! idempotent for directories but refuses to touch an existing seed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::csv_store::{self, INTEGRITY_HEADER};
use crate::error::{ConfigError, HistorifyError, StateError};

/// Exact size of the random seed blob.
pub const SEED_SIZE: u64 = 1024 * 1024;

/// A named, tracked directory: inside the repository (relative path) or
/// external (absolute path).
#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub raw_path: String,
    pub path: PathBuf,
    pub external: bool,
}

#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Open an existing repository, failing if it was never initialized.
    pub fn open(path: &Path) -> Result<Self, HistorifyError> {
        let root = path
            .canonicalize()
            .map_err(|e| HistorifyError::io(path, e))?;
        if !root.join("db").join("config").exists() {
            return Err(ConfigError::NotInitialized { path: root }.into());
        }
        Ok(Repository { root })
    }

    /// Create the directory skeleton, seed, integrity index, and default
    /// configuration.
    pub fn init(path: &Path, name: Option<&str>) -> Result<Self, HistorifyError> {
        fs::create_dir_all(path).map_err(|e| HistorifyError::io(path, e))?;
        let root = path
            .canonicalize()
            .map_err(|e| HistorifyError::io(path, e))?;
        let name = name
            .map(str::to_string)
            .or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "repository".to_string());
        info!(name, path = %root.display(), "initializing repository");

        let repo = Repository { root };
        let db_dir = repo.db_dir();
        fs::create_dir_all(&db_dir).map_err(|e| HistorifyError::io(&db_dir, e))?;
        let keys_dir = repo.keys_dir();
        fs::create_dir_all(&keys_dir).map_err(|e| HistorifyError::io(&keys_dir, e))?;

        repo.write_seed()?;

        if !db_dir.join("config").exists() {
            RepoConfig::create(
                &db_dir,
                &[
                    ("repository.name", name.as_str()),
                    (
                        "repository.created",
                        &Utc::now().format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
                    ),
                    ("hash.algorithms", "blake3,sha256"),
                    ("changes.directory", "changes"),
                ],
            )?;
        }

        let integrity = repo.integrity_file();
        if !integrity.exists() {
            csv_store::create(&integrity, &INTEGRITY_HEADER)?;
        }

        let config = repo.config()?;
        let changes = repo.changes_dir(&config);
        fs::create_dir_all(&changes).map_err(|e| HistorifyError::io(&changes, e))?;

        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn seed_file(&self) -> PathBuf {
        self.db_dir().join("seed.bin")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.db_dir().join("keys")
    }

    pub fn integrity_file(&self) -> PathBuf {
        self.db_dir().join("integrity.csv")
    }

    pub fn config(&self) -> Result<RepoConfig, HistorifyError> {
        RepoConfig::load(&self.db_dir())
    }

    /// Changes directory, honoring the `changes.directory` setting.
    pub fn changes_dir(&self, config: &RepoConfig) -> PathBuf {
        self.root.join(config.get_or("changes.directory", "changes"))
    }

    /// Resolve every configured category to an absolute directory.
    pub fn categories(&self, config: &RepoConfig) -> Vec<Category> {
        let mut categories: Vec<Category> = config
            .categories()
            .into_iter()
            .map(|(name, raw_path)| {
                let configured = PathBuf::from(&raw_path);
                let external = configured.is_absolute();
                let path = if external {
                    configured
                } else {
                    self.root.join(&configured)
                };
                Category {
                    name,
                    raw_path,
                    path,
                    external,
                }
            })
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        categories
    }

    fn write_seed(&self) -> Result<(), HistorifyError> {
        let seed_path = self.seed_file();
        if seed_path.exists() {
            return Err(StateError::SeedExists { path: seed_path }.into());
        }
        debug!(path = %seed_path.display(), "writing random seed");

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&seed_path)
        {
            Ok(f) => f,
            Err(e) => return Err(HistorifyError::io(&seed_path, e)),
        };

        let mut remaining = SEED_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            OsRng.fill_bytes(&mut chunk[..n]);
            file.write_all(&chunk[..n])
                .map_err(|e| HistorifyError::io(&seed_path, e))?;
            remaining -= n as u64;
        }
        file.flush().map_err(|e| HistorifyError::io(&seed_path, e))?;
        Ok(())
    }

}
