//! Status command: summarize repository, category, and changelog state.

use std::path::Path;

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use walkdir::WalkDir;

use crate::changelog::{file_name, Chain};
use crate::keys::list_cached_keys;
use crate::repository::Repository;
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Serialize)]
struct RepositoryStatus {
    name: String,
    path: String,
    created: Option<String>,
    categories: Vec<CategoryStatus>,
    changelog: ChangelogStatus,
    cached_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CategoryStatus {
    name: String,
    path: String,
    external: bool,
    exists: bool,
    file_count: usize,
    total_size: u64,
}

#[derive(Debug, Serialize, Default)]
struct ChangelogStatus {
    changelog_count: usize,
    signed_count: usize,
    current_changelog: Option<String>,
    recent_changes: usize,
    last_activity: Option<String>,
}

pub fn execute(path: &str, category: Option<&str>, format: OutputFormat) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;

    let mut categories = repo.categories(&config);
    if let Some(name) = category {
        categories.retain(|c| c.name == name);
        if categories.is_empty() {
            bail!("Unknown category: {name}");
        }
    }

    let category_status: Vec<CategoryStatus> = categories
        .iter()
        .map(|cat| {
            let exists = cat.path.is_dir();
            let (file_count, total_size) = if exists {
                count_files(&cat.path)
            } else {
                (0, 0)
            };
            CategoryStatus {
                name: cat.name.clone(),
                path: cat.path.display().to_string(),
                external: cat.external,
                exists,
                file_count,
                total_size,
            }
        })
        .collect();

    let status = RepositoryStatus {
        name: config.get_or("repository.name", "unnamed").to_string(),
        path: repo.root().display().to_string(),
        created: config.get("repository.created").map(str::to_string),
        categories: category_status,
        changelog: changelog_status(&repo, &config)?,
        cached_keys: list_cached_keys(&repo)
            .into_iter()
            .map(|(id, _)| id)
            .collect(),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => print_text(&status),
    }
    Ok(0)
}

fn changelog_status(
    repo: &Repository,
    config: &crate::config::RepoConfig,
) -> Result<ChangelogStatus> {
    let chain = Chain::open(repo, config)?;
    let files = chain.changelog_files()?;
    let mut status = ChangelogStatus {
        changelog_count: files.len(),
        signed_count: files.iter().filter(|f| Chain::is_sealed(f)).count(),
        ..Default::default()
    };

    let Some(open) = chain.current_open()? else {
        return Ok(status);
    };
    status.current_changelog = Some(file_name(&open));

    let yesterday = Utc::now().naive_utc() - Duration::hours(24);
    let mut last: Option<NaiveDateTime> = None;
    let mut recent = 0;
    for tx in chain.read_transactions(&open)? {
        if matches!(tx, Transaction::Closing { .. }) {
            continue;
        }
        let Ok(ts) = NaiveDateTime::parse_from_str(tx.timestamp(), "%Y-%m-%d %H:%M:%S UTC")
        else {
            continue;
        };
        if last.map_or(true, |l| ts > l) {
            last = Some(ts);
        }
        if ts > yesterday {
            recent += 1;
        }
    }
    status.recent_changes = recent;
    status.last_activity = last.map(|t| format!("{} UTC", t.format("%Y-%m-%d %H:%M:%S")));
    Ok(status)
}

fn count_files(root: &Path) -> (usize, u64) {
    let mut count = 0;
    let mut size = 0;
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_file() {
            count += 1;
            size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (count, size)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["bytes", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} bytes")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn print_text(status: &RepositoryStatus) {
    println!("Repository: {}", status.name.bold());
    println!("Path: {}", status.path);
    if let Some(created) = &status.created {
        println!("Created: {created}");
    }

    if status.categories.is_empty() {
        println!("\nNo categories configured.");
    } else {
        println!("\nCategories:");
        for cat in &status.categories {
            let location = if cat.external { "external" } else { "internal" };
            println!("  - {} ({location})", cat.name);
            println!("    Path: {}", cat.path);
            if cat.exists {
                println!(
                    "    Files: {} ({})",
                    cat.file_count,
                    human_size(cat.total_size)
                );
            } else {
                println!("    {} directory does not exist", "Warning:".yellow());
            }
        }
    }

    let log = &status.changelog;
    println!("\nChangelog status:");
    println!("  Total changelogs: {}", log.changelog_count);
    println!("  Signed changelogs: {}", log.signed_count);
    match &log.current_changelog {
        Some(current) => {
            println!("  Current changelog: {current}");
            println!("  Recent changes (24h): {}", log.recent_changes);
            if let Some(last) = &log.last_activity {
                println!("  Last activity: {last}");
            }
        }
        None => println!("  No open changelog. Run 'start' to create one."),
    }

    if !status.cached_keys.is_empty() {
        println!("\nCached public keys:");
        for key in &status.cached_keys {
            println!("  - {key}");
        }
    }
}
