//! Scan command: walk categories and record file changes.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::warn;

use crate::changelog::Chain;
use crate::repository::Repository;
use crate::scanner::scan_category;

pub fn execute(path: &str, category: Option<&str>) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;
    let chain = Chain::open(&repo, &config)?;

    let mut categories = repo.categories(&config);
    if let Some(name) = category {
        categories.retain(|c| c.name == name);
        if categories.is_empty() {
            bail!("Unknown category: {name}");
        }
    }
    if categories.is_empty() {
        println!("No categories configured. Use 'add-category' first.");
        return Ok(0);
    }

    let mut exit = 0u8;
    for cat in &categories {
        if !cat.path.is_dir() {
            warn!(category = cat.name, path = %cat.path.display(), "category directory missing");
            println!(
                "{} category '{}': directory does not exist: {}",
                "warning".yellow(),
                cat.name,
                cat.path.display()
            );
            exit = 2;
            continue;
        }

        let outcome = scan_category(&chain, cat)
            .with_context(|| format!("Failed to scan category '{}'", cat.name))?;
        println!(
            "{}: {} new, {} changed, {} moved, {} deleted, {} duplicates, {} unchanged",
            cat.name.bold(),
            outcome.new,
            outcome.changed,
            outcome.moved,
            outcome.deleted,
            outcome.duplicates,
            outcome.unchanged
        );
    }
    Ok(exit)
}
