//! Verify command: check signatures and hash references.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::repository::Repository;
use crate::verify::{verify_full_chain, verify_recent, Severity};

pub fn execute(path: &str, full_chain: bool) -> Result<u8> {
    let repo = Repository::open(Path::new(path))?;
    let config = repo.config()?;

    let report = if full_chain {
        println!("Verifying full chain in {}", repo.root().display());
        verify_full_chain(&repo, &config)?
    } else {
        println!("Verifying latest changelog in {}", repo.root().display());
        verify_recent(&repo, &config)?
    };

    for issue in &report.issues {
        let tag = match issue.severity {
            Severity::Integrity => "FAIL".red().bold(),
            Severity::Warning => "warn".yellow(),
        };
        println!("{tag} {}: {}", issue.subject, issue.message);
    }

    if report.ok() && report.issues.is_empty() {
        println!(
            "{} ({} changelog(s) checked)",
            "Chain verified".green(),
            report.checked
        );
    } else if report.ok() {
        println!(
            "Chain verified with {} warning(s) ({} changelog(s) checked)",
            report.issues.len(),
            report.checked
        );
    } else {
        println!("{}", "Chain verification FAILED".red().bold());
    }

    Ok(report.exit_code())
}
