//! Init command: create the repository skeleton.

use std::path::Path;

use anyhow::{Context, Result};

use crate::repository::Repository;

pub fn execute(path: &str, name: Option<&str>) -> Result<u8> {
    let repo = Repository::init(Path::new(path), name)
        .with_context(|| format!("Failed to initialize repository at {path}"))?;
    let config = repo.config()?;

    println!(
        "Initialized repository '{}' in {}",
        config.get_or("repository.name", "?"),
        repo.root().display()
    );
    println!("Next steps:");
    println!("  historify keygen <secret-key> <public-key>");
    println!("  historify config minisign.key <secret-key> {path}");
    println!("  historify config minisign.pub <public-key> {path}");
    println!("  historify start {path}");
    Ok(0)
}
