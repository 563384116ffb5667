//! Optical-media packing
//!
//! Splits snapshot archives across fixed-capacity media images using
//! first-fit-decreasing binning, then hands each bin to an external
//! `xorriso -as mkisofs` invocation producing a UDF 2.60 image with an
//! ISO9660/Joliet fallback. The image writer is resolved like any other
//! external tool: `XORRISO_BIN` override first, then PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;
use tracing::{debug, info};

use crate::error::HistorifyError;

/// BD-R single layer capacity in bytes (25 GiB).
const BD_R_SINGLE_LAYER_CAPACITY: u64 = 25 * 1024 * 1024 * 1024;

/// Volume identifiers are limited to 15 characters for broad reader
/// compatibility.
const VOLUME_IDENT_MAX: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    BdR,
}

impl MediaType {
    pub fn capacity(&self) -> u64 {
        match self {
            MediaType::BdR => BD_R_SINGLE_LAYER_CAPACITY,
        }
    }

    pub fn parse(s: &str) -> Result<Self, HistorifyError> {
        match s.to_lowercase().as_str() {
            "bd-r" => Ok(MediaType::BdR),
            other => Err(crate::error::ConfigError::InvalidValue {
                key: "media".to_string(),
                reason: format!("unsupported media type: {other}"),
            }
            .into()),
        }
    }
}

/// Pack archives into one or more media images next to `output_base`.
///
/// Returns the produced image paths.
pub fn pack_archives(
    archives: &[PathBuf],
    output_base: &Path,
    media_type: MediaType,
    publisher: Option<&str>,
) -> Result<Vec<PathBuf>, HistorifyError> {
    let mut sizes = Vec::with_capacity(archives.len());
    for archive in archives {
        let metadata =
            std::fs::metadata(archive).map_err(|e| HistorifyError::io(archive, e))?;
        sizes.push(metadata.len());
    }

    let bins = plan_bins(&sizes, media_type.capacity());
    info!(
        archives = archives.len(),
        images = bins.len(),
        "packing archives for media"
    );

    let multi_disc = bins.len() > 1;
    let mut images = Vec::with_capacity(bins.len());
    for (disc, bin) in bins.iter().enumerate() {
        let image = if multi_disc {
            output_base.with_file_name(format!(
                "{}-disc{}.iso",
                output_base.file_name().unwrap_or_default().to_string_lossy(),
                disc + 1
            ))
        } else {
            output_base.with_file_name(format!(
                "{}.iso",
                output_base.file_name().unwrap_or_default().to_string_lossy()
            ))
        };
        let contents: Vec<&Path> = bin.iter().map(|&i| archives[i].as_path()).collect();
        write_image(&contents, &image, publisher)?;
        images.push(image);
    }
    Ok(images)
}

/// First-fit-decreasing: sort by size descending, place each archive into
/// the first bin with room, open a new bin otherwise.
///
/// Returns bins of indices into the input slice. An archive larger than the
/// capacity still gets a bin of its own; the burn tool will reject it with a
/// clearer message than anything produced here.
fn plan_bins(sizes: &[u64], capacity: u64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));

    let mut bins: Vec<(u64, Vec<usize>)> = Vec::new();
    for index in order {
        let size = sizes[index];
        match bins
            .iter_mut()
            .find(|(used, _)| used.saturating_add(size) <= capacity)
        {
            Some((used, bin)) => {
                *used += size;
                bin.push(index);
            }
            None => bins.push((size, vec![index])),
        }
    }
    bins.into_iter().map(|(_, bin)| bin).collect()
}

/// Volume identifier: short prefix plus compact date, capped at 15 chars.
fn volume_ident() -> String {
    let mut ident = format!("hst_{}", Local::now().format("%Y%m%d"));
    ident.truncate(VOLUME_IDENT_MAX);
    ident
}

/// Resolve the image-writer binary: `XORRISO_BIN` override, then PATH.
fn xorriso_path() -> Result<PathBuf, HistorifyError> {
    if let Ok(path) = std::env::var("XORRISO_BIN") {
        return Ok(PathBuf::from(path));
    }
    which::which("xorriso").map_err(|e| {
        HistorifyError::io(
            "xorriso",
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("xorriso not found in PATH: {e}"),
            ),
        )
    })
}

/// Write one UDF 2.60 image (Joliet fallback) containing the given archives.
fn write_image(
    archives: &[&Path],
    image: &Path,
    publisher: Option<&str>,
) -> Result<(), HistorifyError> {
    let xorriso = xorriso_path()?;
    let vol_ident = volume_ident();
    debug!(image = %image.display(), vol_ident, "writing media image");

    let mut command = Command::new(&xorriso);
    command
        .arg("-as")
        .arg("mkisofs")
        .arg("-iso-level")
        .arg("3")
        .arg("-J")
        .arg("-joliet-long")
        .arg("-udf")
        .arg("-V")
        .arg(&vol_ident)
        .arg("-p")
        .arg(publisher.unwrap_or("historify archive"))
        .arg("-o")
        .arg(image);
    for archive in archives {
        command.arg(archive);
    }

    let output = command
        .output()
        .map_err(|e| HistorifyError::io(&xorriso, e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HistorifyError::io(
            image,
            std::io::Error::other(format!("xorriso failed: {}", stderr.trim())),
        ));
    }
    info!(image = %image.display(), "wrote media image");
    Ok(())
}
