//! Typed changelog transactions
//!
//! In memory a transaction is a tagged variant carrying only the fields its
//! kind needs. The frozen 9-column CSV schema is produced and validated at
//! this boundary, including the overloaded `blake3` payload column: closing
//! rows store the chain reference digest there, move rows the previous path,
//! comment rows the message, config rows the value being set.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::csv_store::CHANGELOG_HEADER;
use crate::error::SchemaError;

/// Event timestamp in the canonical UTC string form.
pub fn event_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Closing,
    New,
    Changed,
    Move,
    Deleted,
    Duplicate,
    Comment,
    Config,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Closing => "closing",
            TransactionKind::New => "new",
            TransactionKind::Changed => "changed",
            TransactionKind::Move => "move",
            TransactionKind::Deleted => "deleted",
            TransactionKind::Duplicate => "duplicate",
            TransactionKind::Comment => "comment",
            TransactionKind::Config => "config",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closing" => Ok(TransactionKind::Closing),
            "new" => Ok(TransactionKind::New),
            "changed" => Ok(TransactionKind::Changed),
            "move" => Ok(TransactionKind::Move),
            "deleted" => Ok(TransactionKind::Deleted),
            "duplicate" => Ok(TransactionKind::Duplicate),
            "comment" => Ok(TransactionKind::Comment),
            "config" => Ok(TransactionKind::Config),
            other => Err(SchemaError::UnknownTransactionType {
                value: other.to_string(),
            }),
        }
    }
}

/// File metadata recorded with per-file transactions.
///
/// `size` is bytes; `ctime`/`mtime` are local time in `%Y-%m-%dT%H:%M:%S`
/// form, distinct from the UTC event timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub ctime: String,
    pub mtime: String,
    pub sha256: String,
    pub blake3: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// First row of every changelog: names and digests the previous chain
    /// artifact (seed or predecessor changelog).
    Closing {
        timestamp: String,
        path: String,
        blake3: String,
    },
    New {
        timestamp: String,
        path: String,
        category: String,
        meta: FileMeta,
    },
    Changed {
        timestamp: String,
        path: String,
        category: String,
        meta: FileMeta,
    },
    /// Rename without content change; the digest stays implicit and the
    /// previous path travels in the payload column.
    Move {
        timestamp: String,
        path: String,
        category: String,
        old_path: String,
        size: u64,
        ctime: String,
        mtime: String,
        sha256: String,
    },
    Deleted {
        timestamp: String,
        path: String,
        category: String,
    },
    /// Informational: content identical to another tracked path.
    Duplicate {
        timestamp: String,
        path: String,
        category: String,
        meta: FileMeta,
    },
    Comment {
        timestamp: String,
        message: String,
    },
    Config {
        timestamp: String,
        key: String,
        value: String,
    },
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Closing { .. } => TransactionKind::Closing,
            Transaction::New { .. } => TransactionKind::New,
            Transaction::Changed { .. } => TransactionKind::Changed,
            Transaction::Move { .. } => TransactionKind::Move,
            Transaction::Deleted { .. } => TransactionKind::Deleted,
            Transaction::Duplicate { .. } => TransactionKind::Duplicate,
            Transaction::Comment { .. } => TransactionKind::Comment,
            Transaction::Config { .. } => TransactionKind::Config,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Transaction::Closing { timestamp, .. }
            | Transaction::New { timestamp, .. }
            | Transaction::Changed { timestamp, .. }
            | Transaction::Move { timestamp, .. }
            | Transaction::Deleted { timestamp, .. }
            | Transaction::Duplicate { timestamp, .. }
            | Transaction::Comment { timestamp, .. }
            | Transaction::Config { timestamp, .. } => timestamp,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Transaction::Closing { path, .. }
            | Transaction::New { path, .. }
            | Transaction::Changed { path, .. }
            | Transaction::Move { path, .. }
            | Transaction::Deleted { path, .. }
            | Transaction::Duplicate { path, .. } => Some(path),
            Transaction::Comment { .. } | Transaction::Config { .. } => None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Transaction::New { category, .. }
            | Transaction::Changed { category, .. }
            | Transaction::Move { category, .. }
            | Transaction::Deleted { category, .. }
            | Transaction::Duplicate { category, .. } => Some(category),
            _ => None,
        }
    }

    /// Flatten to the frozen 9-column schema.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![String::new(); CHANGELOG_HEADER.len()];
        row[0] = self.timestamp().to_string();
        row[1] = self.kind().as_str().to_string();
        match self {
            Transaction::Closing { path, blake3, .. } => {
                row[2] = path.clone();
                row[8] = blake3.clone();
            }
            Transaction::New {
                path,
                category,
                meta,
                ..
            }
            | Transaction::Changed {
                path,
                category,
                meta,
                ..
            }
            | Transaction::Duplicate {
                path,
                category,
                meta,
                ..
            } => {
                row[2] = path.clone();
                row[3] = category.clone();
                row[4] = meta.size.to_string();
                row[5] = meta.ctime.clone();
                row[6] = meta.mtime.clone();
                row[7] = meta.sha256.clone();
                row[8] = meta.blake3.clone();
            }
            Transaction::Move {
                path,
                category,
                old_path,
                size,
                ctime,
                mtime,
                sha256,
                ..
            } => {
                row[2] = path.clone();
                row[3] = category.clone();
                row[4] = size.to_string();
                row[5] = ctime.clone();
                row[6] = mtime.clone();
                row[7] = sha256.clone();
                row[8] = old_path.clone();
            }
            Transaction::Deleted { path, category, .. } => {
                row[2] = path.clone();
                row[3] = category.clone();
            }
            Transaction::Comment { message, .. } => {
                row[8] = message.clone();
            }
            Transaction::Config { key, value, .. } => {
                row[2] = key.clone();
                row[8] = value.clone();
            }
        }
        row
    }

    /// Validate and lift a raw row back into the variant.
    pub fn from_row(row: &[String]) -> Result<Transaction, SchemaError> {
        if row.len() != CHANGELOG_HEADER.len() {
            return Err(SchemaError::MalformedRow {
                file: Default::default(),
                reason: format!("{} columns, expected {}", row.len(), CHANGELOG_HEADER.len()),
            });
        }
        let kind: TransactionKind = row[1].parse()?;
        let timestamp = row[0].clone();
        let parse_size = |s: &str| -> Result<u64, SchemaError> {
            if s.is_empty() {
                return Ok(0);
            }
            s.parse().map_err(|_| SchemaError::MalformedRow {
                file: Default::default(),
                reason: format!("invalid size: {s}"),
            })
        };
        let meta = || -> Result<FileMeta, SchemaError> {
            Ok(FileMeta {
                size: parse_size(&row[4])?,
                ctime: row[5].clone(),
                mtime: row[6].clone(),
                sha256: row[7].clone(),
                blake3: row[8].clone(),
            })
        };
        Ok(match kind {
            TransactionKind::Closing => Transaction::Closing {
                timestamp,
                path: row[2].clone(),
                blake3: row[8].clone(),
            },
            TransactionKind::New => Transaction::New {
                timestamp,
                path: row[2].clone(),
                category: row[3].clone(),
                meta: meta()?,
            },
            TransactionKind::Changed => Transaction::Changed {
                timestamp,
                path: row[2].clone(),
                category: row[3].clone(),
                meta: meta()?,
            },
            TransactionKind::Move => Transaction::Move {
                timestamp,
                path: row[2].clone(),
                category: row[3].clone(),
                old_path: row[8].clone(),
                size: parse_size(&row[4])?,
                ctime: row[5].clone(),
                mtime: row[6].clone(),
                sha256: row[7].clone(),
            },
            TransactionKind::Deleted => Transaction::Deleted {
                timestamp,
                path: row[2].clone(),
                category: row[3].clone(),
            },
            TransactionKind::Duplicate => Transaction::Duplicate {
                timestamp,
                path: row[2].clone(),
                category: row[3].clone(),
                meta: meta()?,
            },
            TransactionKind::Comment => Transaction::Comment {
                timestamp,
                message: row[8].clone(),
            },
            TransactionKind::Config => Transaction::Config {
                timestamp,
                key: row[2].clone(),
                value: row[8].clone(),
            },
        })
    }
}
