//! Streaming content digests
//!
//! Computes BLAKE3 and SHA-256 of files in fixed-size chunks. Both digests of
//! a file are produced in a single read pass so large data files are not read
//! twice per scan.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{ConfigError, HistorifyError};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(ConfigError::InvalidValue {
                key: "hash.algorithms".to_string(),
                reason: format!("unsupported algorithm: {other}"),
            }),
        }
    }
}

enum Hasher {
    Blake3(blake3::Hasher),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Blake3 => Hasher::Blake3(blake3::Hasher::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(chunk);
            }
            Hasher::Sha256(h) => h.update(chunk),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute one digest of a regular file, hex-lowercase.
pub fn digest_file(path: &Path, algo: HashAlgorithm) -> Result<String, HistorifyError> {
    let digests = digest_file_multi(path, &[algo])?;
    Ok(digests[&algo].clone())
}

/// Compute several digests of a regular file in a single read pass.
///
/// Returns a map keyed by algorithm. Fails with an I/O error if the path is
/// not a regular readable file.
pub fn digest_file_multi(
    path: &Path,
    algos: &[HashAlgorithm],
) -> Result<BTreeMap<HashAlgorithm, String>, HistorifyError> {
    if !path.is_file() {
        return Err(HistorifyError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    let mut file = File::open(path).map_err(|e| HistorifyError::io(path, e))?;
    let mut hashers: Vec<(HashAlgorithm, Hasher)> =
        algos.iter().map(|&a| (a, Hasher::new(a))).collect();

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| HistorifyError::io(path, e))?;
        if n == 0 {
            break;
        }
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buf[..n]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(algo, hasher)| (algo, hasher.finalize()))
        .collect())
}
