//! Snapshot command: archive the repository, optionally onto media images.

use std::path::Path;

use anyhow::{Context, Result};

use crate::media::MediaType;
use crate::repository::Repository;
use crate::snapshot::snapshot;

pub fn execute(out: &str, path: &str, full: bool, media: Option<&str>) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;

    let media_type = media.map(MediaType::parse).transpose()?;
    let produced = snapshot(&repo, &config, Path::new(out), full, media_type)
        .context("Snapshot failed")?;

    println!("Produced {} file(s):", produced.len());
    for file in &produced {
        println!("  {}", file.display());
    }
    Ok(0)
}
