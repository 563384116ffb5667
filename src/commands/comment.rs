//! Comment command: append an administrative note to the open changelog.

use std::path::Path;

use anyhow::{Context, Result};

use crate::changelog::Chain;
use crate::repository::Repository;

pub fn execute(message: &str, path: &str) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;
    let chain = Chain::open(&repo, &config)?;

    chain
        .append_comment(message)
        .context("Failed to append comment")?;
    println!("Added comment: {message}");
    Ok(0)
}
