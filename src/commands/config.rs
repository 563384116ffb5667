//! Config commands: set keys, register categories, report issues.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::warn;

use crate::changelog::Chain;
use crate::keys::cache_public_key;
use crate::repository::Repository;
use crate::transaction::{event_timestamp, Transaction};

/// `config KEY VALUE [PATH]`
pub fn execute(key: &str, value: &str, path: &str) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let mut config = repo.config()?;

    // Public keys are additionally copied into the repository so historical
    // signatures stay verifiable after the original file moves.
    if key == "minisign.pub" {
        let key_id = cache_public_key(&repo, Path::new(value))
            .with_context(|| format!("Failed to cache public key {value}"))?;
        println!("Cached public key under id {key_id}");
    }

    config.set(key, value)?;
    journal_config_row(&repo, key, value);
    println!("Set {key} = {value}");
    Ok(0)
}

/// `add-category NAME DATAPATH [PATH]`
pub fn add_category(name: &str, datapath: &str, path: &str) -> Result<u8> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Invalid category name: {name}. Use letters, digits, '-' and '_'");
    }

    let repo = Repository::open(Path::new(path))?;
    let mut config = repo.config()?;
    let key = format!("category.{name}.path");

    // Internal category directories are created eagerly; external ones are
    // left alone since they may live on media that is not always mounted.
    let configured = Path::new(datapath);
    if !configured.is_absolute() {
        let dir = repo.root().join(configured);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create category directory {}", dir.display()))?;
    }

    config.set(&key, datapath)?;
    journal_config_row(&repo, &key, datapath);
    println!("Added category '{name}' for {datapath}");
    Ok(0)
}

/// `check-config [PATH]`
pub fn check(path: &str) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;

    let issues = config.check();
    if issues.is_empty() {
        println!("{}", "Configuration OK".green());
        return Ok(0);
    }
    for issue in &issues {
        println!("{} {}: {}", "issue".red(), issue.key, issue.reason);
    }
    println!("{} issue(s) found", issues.len());
    Ok(1)
}

/// Best-effort audit row for a configuration change. The chain only records
/// settings while a changelog is open; the config files themselves are
/// authoritative.
fn journal_config_row(repo: &Repository, key: &str, value: &str) {
    let Ok(config) = repo.config() else { return };
    let Ok(chain) = Chain::open(repo, &config) else {
        return;
    };
    match chain.current_open() {
        Ok(Some(_)) => {
            let tx = Transaction::Config {
                timestamp: event_timestamp(),
                key: key.to_string(),
                value: value.to_string(),
            };
            if let Err(e) = chain.append(&tx) {
                warn!(key, error = %e, "could not journal config change");
            }
        }
        _ => {}
    }
}
