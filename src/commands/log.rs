//! Log command: read the changelog chain.

use std::path::Path;

use anyhow::{bail, Result};

use crate::changelog::{file_name, Chain};
use crate::repository::Repository;
use crate::transaction::Transaction;

pub fn execute(
    path: &str,
    file: Option<&str>,
    category: Option<&str>,
    transaction_type: Option<&str>,
) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;
    let chain = Chain::open(&repo, &config)?;

    let entries: Vec<(String, Transaction)> = match file {
        Some(name) => {
            let changelog = chain.changes_dir().join(name);
            if !changelog.is_file() {
                bail!("No such changelog: {name}");
            }
            chain
                .read_transactions(&changelog)?
                .into_iter()
                .map(|tx| (file_name(&changelog), tx))
                .collect()
        }
        None => chain.all_transactions()?,
    };

    let mut shown = 0;
    for (source, tx) in &entries {
        if let Some(wanted) = category {
            if tx.category() != Some(wanted) {
                continue;
            }
        }
        if let Some(wanted) = transaction_type {
            if tx.kind().as_str() != wanted {
                continue;
            }
        }
        println!("{}", render(source, tx));
        shown += 1;
    }
    if shown == 0 {
        println!("No matching transactions.");
    }
    Ok(0)
}

fn render(source: &str, tx: &Transaction) -> String {
    let prefix = format!("{}  {:<9}", tx.timestamp(), tx.kind());
    match tx {
        Transaction::Closing { path, blake3, .. } => {
            format!("{prefix}  {path} ({blake3})")
        }
        Transaction::Move { path, old_path, .. } => {
            format!("{prefix}  {old_path} -> {path}")
        }
        Transaction::Comment { message, .. } => format!("{prefix}  {message}"),
        Transaction::Config { key, value, .. } => format!("{prefix}  {key} = {value}"),
        Transaction::Deleted { path, category, .. } => {
            format!("{prefix}  {path} [{category}]")
        }
        Transaction::New { path, category, meta, .. }
        | Transaction::Changed { path, category, meta, .. }
        | Transaction::Duplicate { path, category, meta, .. } => {
            format!(
                "{prefix}  {path} [{category}] {} bytes ({source})",
                meta.size
            )
        }
    }
}
