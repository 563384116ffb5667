//! Repository configuration store
//!
//! Settings are persisted in two mirrored forms: a section/option text file
//! (`db/config`) and a flat CSV of dotted keys (`db/config.csv`). Lookup
//! prefers the text form, then the CSV mirror, then a supplied default.
//! Writes rewrite each form to a temporary file and rename it into place, so
//! readers see either the prior or the new full content.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::csv_store::{self, CONFIG_HEADER};
use crate::error::{ConfigError, HistorifyError};

/// One problem reported by [`RepoConfig::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub key: String,
    pub reason: String,
}

pub struct RepoConfig {
    text_path: PathBuf,
    csv_path: PathBuf,
    values: BTreeMap<String, String>,
}

impl RepoConfig {
    /// Load both forms from a repository's `db/` directory.
    pub fn load(db_dir: &Path) -> Result<Self, HistorifyError> {
        let text_path = db_dir.join("config");
        let csv_path = db_dir.join("config.csv");

        let mut values = BTreeMap::new();
        if csv_path.exists() {
            for row in csv_store::read_all(&csv_path, &CONFIG_HEADER)? {
                values.insert(row[0].clone(), row[1].clone());
            }
        }
        // Text form wins over the mirror on disagreement.
        if text_path.exists() {
            let content =
                fs::read_to_string(&text_path).map_err(|e| HistorifyError::io(&text_path, e))?;
            for (key, value) in parse_text_form(&content) {
                values.insert(key, value);
            }
        }

        Ok(RepoConfig {
            text_path,
            csv_path,
            values,
        })
    }

    /// Create both forms with the given initial entries.
    pub fn create(db_dir: &Path, entries: &[(&str, &str)]) -> Result<Self, HistorifyError> {
        let mut config = RepoConfig {
            text_path: db_dir.join("config"),
            csv_path: db_dir.join("config.csv"),
            values: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        config.persist()?;
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn all(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Set one key and rewrite both persisted forms.
    ///
    /// Keys are `section.option`; a bare word has no section to file it under.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), HistorifyError> {
        if !key.contains('.') || key.starts_with('.') || key.ends_with('.') {
            return Err(ConfigError::InvalidKeyFormat {
                key: key.to_string(),
            }
            .into());
        }
        self.values.insert(key.to_string(), value.to_string());
        self.persist()?;
        debug!(key, value, "configuration updated");
        Ok(())
    }

    /// Configured categories as `(name, raw path)` pairs.
    pub fn categories(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .filter_map(|(key, value)| {
                let name = key
                    .strip_prefix("category.")
                    .and_then(|rest| rest.strip_suffix(".path"))?;
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Report configuration problems without failing.
    pub fn check(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.get("repository.name").map_or(true, str::is_empty) {
            issues.push(ConfigIssue {
                key: "repository.name".to_string(),
                reason: "missing repository name".to_string(),
            });
        }

        match self.get("hash.algorithms") {
            None => issues.push(ConfigIssue {
                key: "hash.algorithms".to_string(),
                reason: "missing hash algorithm list".to_string(),
            }),
            Some(algos) => {
                if !algos.split(',').any(|a| a.trim() == "blake3") {
                    issues.push(ConfigIssue {
                        key: "hash.algorithms".to_string(),
                        reason: format!("blake3 is required, found: {algos}"),
                    });
                }
            }
        }

        if let Some(key_path) = self.get("minisign.key") {
            let path = Path::new(key_path);
            if !path.is_file() || fs::File::open(path).is_err() {
                issues.push(ConfigIssue {
                    key: "minisign.key".to_string(),
                    reason: format!("signing key not readable: {key_path}"),
                });
            }
            if self.get("minisign.pub").is_none() {
                issues.push(ConfigIssue {
                    key: "minisign.pub".to_string(),
                    reason: "signing key configured without a public key".to_string(),
                });
            }
        }

        issues
    }

    fn persist(&self) -> Result<(), HistorifyError> {
        self.write_text_form()?;
        self.write_csv_form()
    }

    fn write_text_form(&self) -> Result<(), HistorifyError> {
        let mut sections: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (key, value) in &self.values {
            let (section, option) = key.split_once('.').unwrap_or(("", key.as_str()));
            sections
                .entry(section)
                .or_default()
                .push((option, value.as_str()));
        }

        let mut out = String::new();
        for (section, options) in &sections {
            out.push_str(&format!("[{section}]\n"));
            for (option, value) in options {
                out.push_str(&format!("{option} = {value}\n"));
            }
            out.push('\n');
        }
        atomic_write(&self.text_path, out.as_bytes())
    }

    fn write_csv_form(&self) -> Result<(), HistorifyError> {
        let mut buf = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            writer
                .write_record(CONFIG_HEADER)
                .map_err(|e| csv_io(&self.csv_path, e))?;
            for (key, value) in &self.values {
                writer
                    .write_record([key.as_str(), value.as_str()])
                    .map_err(|e| csv_io(&self.csv_path, e))?;
            }
            writer
                .flush()
                .map_err(|e| HistorifyError::io(&self.csv_path, e))?;
        }
        atomic_write(&self.csv_path, &buf)
    }
}

/// Parse the section/option text form into dotted keys.
fn parse_text_form(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut section = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_string();
            continue;
        }
        if let Some((option, value)) = line.split_once('=') {
            let option = option.trim();
            let value = value.trim();
            let key = if section.is_empty() {
                option.to_string()
            } else {
                format!("{section}.{option}")
            };
            entries.push((key, value.to_string()));
        }
    }
    entries
}

/// Rewrite-to-temp-then-rename in the target directory.
fn atomic_write(path: &Path, content: &[u8]) -> Result<(), HistorifyError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| HistorifyError::io(path, e))?;
    tmp.write_all(content)
        .map_err(|e| HistorifyError::io(path, e))?;
    tmp.flush().map_err(|e| HistorifyError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| HistorifyError::io(path, e.error))?;
    Ok(())
}

fn csv_io(path: &Path, e: csv::Error) -> HistorifyError {
    HistorifyError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (tempfile::TempDir, RepoConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::create(
            dir.path(),
            &[
                ("repository.name", "demo"),
                ("hash.algorithms", "blake3,sha256"),
                ("changes.directory", "changes"),
            ],
        )
        .unwrap();
        (dir, config)
    }

    #[test]
    fn test_both_forms_written() {
        let (dir, _) = fresh();
        let text = fs::read_to_string(dir.path().join("config")).unwrap();
        assert!(text.contains("[repository]"));
        assert!(text.contains("name = demo"));

        let csv = fs::read_to_string(dir.path().join("config.csv")).unwrap();
        assert!(csv.starts_with("key,value"));
        assert!(csv.contains("repository.name,demo"));
    }

    #[test]
    fn test_set_and_reload() {
        let (dir, mut config) = fresh();
        config.set("category.data.path", "data").unwrap();

        let reloaded = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("category.data.path"), Some("data"));
        assert_eq!(reloaded.get("repository.name"), Some("demo"));
        assert_eq!(reloaded.get_or("missing.key", "fallback"), "fallback");
    }

    #[test]
    fn test_text_form_wins_over_mirror() {
        let (dir, _) = fresh();
        // Simulate a hand-edited text form that the mirror has not caught up with.
        fs::write(
            dir.path().join("config"),
            "[repository]\nname = edited\n\n[hash]\nalgorithms = blake3,sha256\n",
        )
        .unwrap();

        let reloaded = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(reloaded.get("repository.name"), Some("edited"));
        // Keys only present in the mirror still resolve.
        assert_eq!(reloaded.get("changes.directory"), Some("changes"));
    }

    #[test]
    fn test_invalid_key_format_rejected() {
        let (_dir, mut config) = fresh();
        assert!(config.set("nodots", "x").is_err());
        assert!(config.set(".leading", "x").is_err());
        assert!(config.set("trailing.", "x").is_err());
    }

    #[test]
    fn test_categories_listing() {
        let (_dir, mut config) = fresh();
        config.set("category.data.path", "data").unwrap();
        config.set("category.mail.path", "/srv/mail").unwrap();
        config.set("category.mail.description", "mailboxes").unwrap();

        let mut cats = config.categories();
        cats.sort();
        assert_eq!(
            cats,
            vec![
                ("data".to_string(), "data".to_string()),
                ("mail".to_string(), "/srv/mail".to_string()),
            ]
        );
    }

    #[test]
    fn test_check_reports_missing_name_and_algorithms() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::create(dir.path(), &[]).unwrap();
        let issues = config.check();
        assert!(issues.iter().any(|i| i.key == "repository.name"));
        assert!(issues.iter().any(|i| i.key == "hash.algorithms"));
    }

    #[test]
    fn test_check_requires_blake3() {
        let (_dir, mut config) = fresh();
        config.set("hash.algorithms", "sha256").unwrap();
        let issues = config.check();
        assert!(issues
            .iter()
            .any(|i| i.key == "hash.algorithms" && i.reason.contains("blake3")));
    }

    #[test]
    fn test_check_signing_key_issues() {
        let (dir, mut config) = fresh();
        config
            .set("minisign.key", dir.path().join("absent.key").to_str().unwrap())
            .unwrap();
        let issues = config.check();
        assert!(issues.iter().any(|i| i.key == "minisign.key"));
        assert!(issues.iter().any(|i| i.key == "minisign.pub"));
    }
}
