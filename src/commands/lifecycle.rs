//! Lifecycle commands: start / closing.
//!
//! Both advance the chain the same way: sign the current anchor (the open
//! changelog, or the seed on first use) and open a fresh changelog bound to
//! it.

use std::path::Path;

use anyhow::{Context, Result};

use crate::changelog::Chain;
use crate::repository::Repository;

pub fn execute(path: &str) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;
    let chain = Chain::open(&repo, &config)?;

    println!("Starting new transaction period in {}", repo.root().display());
    // Passwords for encrypted keys travel via HISTORIFY_PASSWORD; the
    // signature layer reads it when needed.
    let outcome = chain
        .lifecycle(None)
        .context("Failed to advance the changelog lifecycle")?;

    if let Some(signed) = &outcome.signed {
        println!("Signed {signed}");
    }
    println!("Created new changelog: {}", outcome.created);
    Ok(0)
}
