//! Snapshot packer
//!
//! Produces self-describing tar.gz archives of the repository: the main
//! archive holds the repository tree (external category trees live outside
//! the root and are excluded), an optional second archive bundles the
//! external categories. Snapshots are refused while the chain fails
//! verification, so every archive is known-good at creation time.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::RepoConfig;
use crate::error::{ChainError, HistorifyError};
use crate::media::{self, MediaType};
use crate::repository::Repository;
use crate::verify::verify_recent;

/// Produce snapshot archives, optionally packed into media images.
///
/// Returns the list of produced files.
pub fn snapshot(
    repo: &Repository,
    config: &RepoConfig,
    output_base: &Path,
    full: bool,
    media: Option<MediaType>,
) -> Result<Vec<PathBuf>, HistorifyError> {
    let report = verify_recent(repo, config)?;
    if !report.ok() {
        let detail = report
            .issues
            .iter()
            .find(|i| i.severity == crate::verify::Severity::Integrity)
            .map(|i| format!("{}: {}", i.subject, i.message))
            .unwrap_or_else(|| "verification failed".to_string());
        return Err(ChainError::VerificationFailed { detail }.into());
    }

    let base = archive_base(output_base);
    let main_archive = base.with_file_name(format!(
        "{}.tar.gz",
        base.file_name().unwrap_or_default().to_string_lossy()
    ));

    pack_repository(repo, &main_archive)?;
    let mut produced = vec![main_archive.clone()];

    let externals: Vec<_> = repo
        .categories(config)
        .into_iter()
        .filter(|c| c.external && c.path.is_dir())
        .collect();
    if full && !externals.is_empty() {
        let external_archive = base.with_file_name(format!(
            "{}-external.tar.gz",
            base.file_name().unwrap_or_default().to_string_lossy()
        ));
        let file =
            File::create(&external_archive).map_err(|e| HistorifyError::io(&external_archive, e))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for category in &externals {
            debug!(category = category.name, "archiving external category");
            builder
                .append_dir_all(&category.name, &category.path)
                .map_err(|e| HistorifyError::io(&category.path, e))?;
        }
        finish(builder, &external_archive)?;
        info!(archive = %external_archive.display(), "wrote external archive");
        produced.push(external_archive);
    }

    if let Some(media_type) = media {
        let publisher = config.get("iso.publisher").map(str::to_string);
        let images = media::pack_archives(&produced, &base, media_type, publisher.as_deref())?;
        produced.extend(images);
    }

    Ok(produced)
}

/// Strip a `.tar.gz` suffix so `snapshot out.tar.gz` and `snapshot out`
/// produce the same file set.
fn archive_base(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".tar.gz") {
        Some(stem) => output.with_file_name(stem),
        None => output.to_path_buf(),
    }
}

/// Tar+gzip the repository root into `archive`.
///
/// Entries are repository-relative so extraction into an empty directory
/// reproduces the tree. The archive itself is skipped when it is being
/// written inside the repository.
fn pack_repository(repo: &Repository, archive: &Path) -> Result<(), HistorifyError> {
    let file = File::create(archive).map_err(|e| HistorifyError::io(archive, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let archive_abs = archive.canonicalize().ok();
    for entry in WalkDir::new(repo.root()).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(repo.root()).to_path_buf();
            HistorifyError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if archive_abs.as_deref() == entry.path().canonicalize().ok().as_deref() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(repo.root()) else {
            continue;
        };
        builder
            .append_path_with_name(entry.path(), rel)
            .map_err(|e| HistorifyError::io(entry.path(), e))?;
    }

    finish(builder, archive)?;
    info!(archive = %archive.display(), "wrote repository archive");
    Ok(())
}

fn finish(
    builder: tar::Builder<GzEncoder<File>>,
    archive: &Path,
) -> Result<(), HistorifyError> {
    let encoder = builder
        .into_inner()
        .map_err(|e| HistorifyError::io(archive, e))?;
    encoder
        .finish()
        .map_err(|e| HistorifyError::io(archive, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::Chain;
    use crate::minisign::KeyPair;
    use crate::scanner::scan_category;
    use crate::verify::verify_full_chain;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        repo: Repository,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(&dir.path().join("repo"), Some("demo")).unwrap();

        let pair = KeyPair::generate();
        let key_path = dir.path().join("historify.key");
        let pub_path = dir.path().join("historify.pub");
        pair.secret.write_to(&key_path, None).unwrap();
        pair.public.write_to(&pub_path).unwrap();

        let mut config = repo.config().unwrap();
        config
            .set("minisign.key", key_path.to_str().unwrap())
            .unwrap();
        config
            .set("minisign.pub", pub_path.to_str().unwrap())
            .unwrap();
        // Keep signatures verifiable from the extracted copy.
        crate::keys::cache_public_key(&repo, &pub_path).unwrap();

        Fixture { dir, repo }
    }

    fn extract(archive: &Path, into: &Path) {
        let file = File::open(archive).unwrap();
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        fs::create_dir_all(into).unwrap();
        tar.unpack(into).unwrap();
    }

    #[test]
    fn test_snapshot_roundtrip_verifies() {
        let f = fixture();
        let config = f.repo.config().unwrap();
        let chain = Chain::open(&f.repo, &config).unwrap();
        chain.lifecycle(None).unwrap();

        let mut config = f.repo.config().unwrap();
        config.set("category.data.path", "data").unwrap();
        fs::create_dir_all(f.repo.root().join("data")).unwrap();
        fs::write(f.repo.root().join("data/hello.txt"), "hi\n").unwrap();
        let config = f.repo.config().unwrap();
        let chain = Chain::open(&f.repo, &config).unwrap();
        let category = f
            .repo
            .categories(&config)
            .into_iter()
            .find(|c| c.name == "data")
            .unwrap();
        scan_category(&chain, &category).unwrap();
        chain.lifecycle(None).unwrap();

        let out = f.dir.path().join("out.tar.gz");
        let produced = snapshot(&f.repo, &config, &out, false, None).unwrap();
        assert_eq!(produced, vec![out.clone()]);
        assert!(out.is_file());

        let restored_root = f.dir.path().join("restored");
        extract(&out, &restored_root);

        let restored = Repository::open(&restored_root).unwrap();
        let restored_config = restored.config().unwrap();
        let report = verify_full_chain(&restored, &restored_config).unwrap();
        assert!(report.ok(), "issues: {:?}", report.issues);
    }

    #[test]
    fn test_archive_written_inside_repo_excludes_itself() {
        let f = fixture();
        let config = f.repo.config().unwrap();
        Chain::open(&f.repo, &config).unwrap().lifecycle(None).unwrap();

        let out = f.repo.root().join("backup.tar.gz");
        snapshot(&f.repo, &config, &out, false, None).unwrap();

        let restored_root = f.dir.path().join("restored");
        extract(&out, &restored_root);
        assert!(!restored_root.join("backup.tar.gz").exists());
        assert!(restored_root.join("db/seed.bin").is_file());
    }

    #[test]
    fn test_full_snapshot_includes_external_categories() {
        let f = fixture();
        let external_dir = f.dir.path().join("external-data");
        fs::create_dir_all(&external_dir).unwrap();
        fs::write(external_dir.join("report.pdf"), "pdf bytes").unwrap();

        let mut config = f.repo.config().unwrap();
        config
            .set("category.reports.path", external_dir.to_str().unwrap())
            .unwrap();
        let config = f.repo.config().unwrap();
        Chain::open(&f.repo, &config).unwrap().lifecycle(None).unwrap();

        let out = f.dir.path().join("out");
        let produced = snapshot(&f.repo, &config, &out, true, None).unwrap();
        assert_eq!(produced.len(), 2);
        assert!(produced[1]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-external.tar.gz"));

        let restored = f.dir.path().join("restored-external");
        extract(&produced[1], &restored);
        assert!(restored.join("reports/report.pdf").is_file());

        // The main archive must not contain the external tree.
        let restored_main = f.dir.path().join("restored-main");
        extract(&produced[0], &restored_main);
        assert!(!restored_main.join("reports").exists());
    }

    #[test]
    fn test_snapshot_refused_on_broken_chain() {
        let f = fixture();
        let config = f.repo.config().unwrap();
        let chain = Chain::open(&f.repo, &config).unwrap();
        chain.lifecycle(None).unwrap();
        let first = chain.current_open().unwrap().unwrap();
        chain.lifecycle(None).unwrap();

        let mut bytes = fs::read(&first).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        fs::write(&first, bytes).unwrap();

        let out = f.dir.path().join("out.tar.gz");
        let err = snapshot(&f.repo, &config, &out, false, None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(!out.exists());
    }

    #[test]
    fn test_archive_base_strips_suffix() {
        assert_eq!(archive_base(Path::new("/tmp/out.tar.gz")), Path::new("/tmp/out"));
        assert_eq!(archive_base(Path::new("/tmp/out")), Path::new("/tmp/out"));
    }
}
