//! Centralized error types for historify
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for historify operations
#[derive(Error, Debug)]
pub enum HistorifyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl HistorifyError {
    /// Attach a path to a bare I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HistorifyError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    ///
    /// Integrity breaks exit with 3 so scripts can distinguish "the chain is
    /// compromised" from ordinary failures (exit 1). Warnings-only runs (exit 2)
    /// never surface as errors and are handled by the verify report instead.
    pub fn exit_code(&self) -> u8 {
        match self {
            HistorifyError::Chain(_) => 3,
            _ => 1,
        }
    }
}

/// Repository configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{} is not a historify repository (missing db/config). Run 'init' first", .path.display())]
    NotInitialized { path: PathBuf },

    #[error("Required configuration missing: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration key format: {key}. Expected section.option")]
    InvalidKeyFormat { key: String },
}

/// CSV schema violations
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("{} has no header row", .file.display())]
    MissingHeader { file: PathBuf },

    #[error("{} header does not match the expected schema (found: {found})", .file.display())]
    HeaderMismatch { file: PathBuf, found: String },

    #[error("{} row {row} has {found} columns, expected {expected}", .file.display())]
    ColumnCount {
        file: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Illegal transaction type: {value}")]
    UnknownTransactionType { value: String },

    #[error("Malformed row in {}: {reason}", .file.display())]
    MalformedRow { file: PathBuf, reason: String },
}

/// Signing and verification errors
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Signing key not found: {}", .path.display())]
    KeyMissing { path: PathBuf },

    #[error("Malformed key file {}: {reason}", .path.display())]
    MalformedKey { path: PathBuf, reason: String },

    #[error(
        "Secret key is encrypted and no password was provided. \
         Set HISTORIFY_PASSWORD or pass a password"
    )]
    PasswordRequired,

    #[error("Wrong password for encrypted secret key")]
    BadPassword,

    #[error("No signature file next to {0} (expected {0}.minisig)", .path.display())]
    MissingSignature { path: PathBuf },

    #[error("Invalid signature for {}: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("Signature was made with key {found}, expected {expected}")]
    KeyIdMismatch { expected: String, found: String },

    #[error("No public key configured (set minisign.pub)")]
    PublicKeyMissing,

    #[error("A different key is already cached under id {key_id}")]
    KeyCacheConflict { key_id: String },
}

/// Hash-chain integrity errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Missing signature on non-latest changelog {file}")]
    UnsignedChangelog { file: String },

    #[error("Changelog {file} has no transactions (expected a closing row first)")]
    MissingClosingRow { file: String },

    #[error("First row of {file} is a {found} transaction, expected closing")]
    NotAClosingRow { file: String, found: String },

    #[error("Closing row of {file} names {found}, expected {expected}")]
    WrongClosingPath {
        file: String,
        expected: String,
        found: String,
    },

    #[error("Chain reference {reference} of {file} does not exist")]
    MissingReference { file: String, reference: String },

    #[error("hash chain broken at {file}: expected {expected}, got {actual}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Chain verification failed: {detail}")]
    VerificationFailed { detail: String },
}

/// Lifecycle state errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("No open changelog file. Run 'start' first")]
    NoOpenChangelog,

    #[error("There is already an open changelog: {file}")]
    AlreadyOpen { file: String },

    #[error("Refusing to overwrite existing seed at {}", .path.display())]
    SeedExists { path: PathBuf },
}
