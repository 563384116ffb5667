//! Integrity index
//!
//! A flat CSV caching, for each historical changelog, its digest, signature
//! file name, and verification state. Derived state: fully reconstructible
//! from the chain, so writes here are fire-and-forget for callers and the
//! verifier may atomically replace the whole file.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::csv_store::{self, INTEGRITY_HEADER};
use crate::error::HistorifyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityRecord {
    pub changelog_file: String,
    pub blake3: String,
    pub signature_file: String,
    pub verified: bool,
    pub verified_timestamp: String,
}

impl IntegrityRecord {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.changelog_file.clone(),
            self.blake3.clone(),
            self.signature_file.clone(),
            if self.verified { "1" } else { "0" }.to_string(),
            self.verified_timestamp.clone(),
        ]
    }

    fn from_row(row: &[String]) -> IntegrityRecord {
        IntegrityRecord {
            changelog_file: row[0].clone(),
            blake3: row[1].clone(),
            signature_file: row[2].clone(),
            verified: row[3] == "1",
            verified_timestamp: row[4].clone(),
        }
    }
}

pub struct IntegrityIndex {
    path: PathBuf,
}

impl IntegrityIndex {
    pub fn new(path: PathBuf) -> Self {
        IntegrityIndex { path }
    }

    pub fn read(&self) -> Result<Vec<IntegrityRecord>, HistorifyError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let rows = csv_store::read_all(&self.path, &INTEGRITY_HEADER)?;
        Ok(rows.iter().map(|r| IntegrityRecord::from_row(r)).collect())
    }

    /// Insert or replace the record for one changelog.
    pub fn upsert(&self, record: IntegrityRecord) -> Result<(), HistorifyError> {
        let mut records = self.read()?;
        match records
            .iter_mut()
            .find(|r| r.changelog_file == record.changelog_file)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.replace_all(&records)
    }

    /// Atomically overwrite the index with freshly computed rows.
    pub fn replace_all(&self, records: &[IntegrityRecord]) -> Result<(), HistorifyError> {
        let mut buf = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            writer.write_record(INTEGRITY_HEADER).map_err(|e| {
                HistorifyError::io(
                    &self.path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            })?;
            for record in records {
                writer.write_record(record.to_row()).map_err(|e| {
                    HistorifyError::io(
                        &self.path,
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    )
                })?;
            }
            writer
                .flush()
                .map_err(|e| HistorifyError::io(&self.path, e))?;
        }

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| HistorifyError::io(&self.path, e))?;
        tmp.write_all(&buf)
            .map_err(|e| HistorifyError::io(&self.path, e))?;
        tmp.flush().map_err(|e| HistorifyError::io(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| HistorifyError::io(&self.path, e.error))?;
        Ok(())
    }
}
