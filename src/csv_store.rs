//! Append-only CSV storage with whole-file locking
//!
//! All changelog and index files share this store: a frozen, ordered header
//! and one record per row. Writers take an OS-level exclusive lock on the
//! whole file for the duration of the append, readers take a shared lock.
//! Writes are flushed to the OS before the lock is released; durability
//! beyond that is the caller's decision.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::{HistorifyError, SchemaError};

/// Frozen changelog schema, in column order.
pub const CHANGELOG_HEADER: [&str; 9] = [
    "timestamp",
    "transaction_type",
    "path",
    "category",
    "size",
    "ctime",
    "mtime",
    "sha256",
    "blake3",
];

/// Integrity index schema.
pub const INTEGRITY_HEADER: [&str; 5] = [
    "changelog_file",
    "blake3",
    "signature_file",
    "verified",
    "verified_timestamp",
];

/// Flat configuration mirror schema.
pub const CONFIG_HEADER: [&str; 2] = ["key", "value"];

/// Create a new CSV file containing only the canonical header.
///
/// Fails if the file already exists.
pub fn create(path: &Path, header: &[&str]) -> Result<(), HistorifyError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| HistorifyError::io(path, e))?;
    file.lock_exclusive()
        .map_err(|e| HistorifyError::io(path, e))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&file);
    writer
        .write_record(header)
        .map_err(|e| csv_io(path, e))?;
    writer.flush().map_err(|e| HistorifyError::io(path, e))?;
    drop(writer);

    let _ = file.unlock();
    Ok(())
}

/// Read every row of a CSV file, validating the header against the schema.
///
/// Rows come back in file order, one `Vec<String>` per record aligned with
/// the header columns.
pub fn read_all(path: &Path, header: &[&str]) -> Result<Vec<Vec<String>>, HistorifyError> {
    let file = File::open(path).map_err(|e| HistorifyError::io(path, e))?;
    file.lock_shared()
        .map_err(|e| HistorifyError::io(path, e))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(&file);

    let mut records = reader.records();
    let first = match records.next() {
        Some(r) => r.map_err(|e| csv_io(path, e))?,
        None => {
            let _ = file.unlock();
            return Err(SchemaError::MissingHeader {
                file: path.to_path_buf(),
            }
            .into());
        }
    };
    if first.iter().collect::<Vec<_>>() != header {
        let _ = file.unlock();
        return Err(SchemaError::HeaderMismatch {
            file: path.to_path_buf(),
            found: first.iter().collect::<Vec<_>>().join(","),
        }
        .into());
    }

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        let record = record.map_err(|e| csv_io(path, e))?;
        if record.len() != header.len() {
            let _ = file.unlock();
            return Err(SchemaError::ColumnCount {
                file: path.to_path_buf(),
                row: i + 2,
                expected: header.len(),
                found: record.len(),
            }
            .into());
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    let _ = file.unlock();
    Ok(rows)
}

/// Append one row, holding an exclusive whole-file lock for the duration.
///
/// The file must already carry the canonical header. Values are written in
/// schema order; the caller supplies exactly one value per column.
pub fn append(path: &Path, header: &[&str], row: &[String]) -> Result<(), HistorifyError> {
    debug_assert_eq!(row.len(), header.len());

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| HistorifyError::io(path, e))?;
    file.lock_exclusive()
        .map_err(|e| HistorifyError::io(path, e))?;

    let result = append_locked(path, header, row, &mut file);
    let _ = file.unlock();
    result
}

fn append_locked(
    path: &Path,
    header: &[&str],
    row: &[String],
    file: &mut File,
) -> Result<(), HistorifyError> {
    // Validate the header under the lock so a concurrent truncation is caught.
    file.seek(SeekFrom::Start(0))
        .map_err(|e| HistorifyError::io(path, e))?;
    let mut first_line = String::new();
    BufReader::new(&*file)
        .read_line(&mut first_line)
        .map_err(|e| HistorifyError::io(path, e))?;
    if first_line.trim_end() != header.join(",") {
        if first_line.is_empty() {
            return Err(SchemaError::MissingHeader {
                file: path.to_path_buf(),
            }
            .into());
        }
        return Err(SchemaError::HeaderMismatch {
            file: path.to_path_buf(),
            found: first_line.trim_end().to_string(),
        }
        .into());
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&*file);
    writer.write_record(row).map_err(|e| csv_io(path, e))?;
    writer.flush().map_err(|e| HistorifyError::io(path, e))?;
    drop(writer);
    file.flush().map_err(|e| HistorifyError::io(path, e))?;
    Ok(())
}

fn csv_io(path: &Path, e: csv::Error) -> HistorifyError {
    HistorifyError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row9(values: [&str; 9]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_create_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.csv");
        create(&path, &CHANGELOG_HEADER).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.trim_end(),
            "timestamp,transaction_type,path,category,size,ctime,mtime,sha256,blake3"
        );
        assert!(read_all(&path, &CHANGELOG_HEADER).unwrap().is_empty());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.csv");
        create(&path, &CHANGELOG_HEADER).unwrap();
        assert!(create(&path, &CHANGELOG_HEADER).is_err());
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.csv");
        create(&path, &CHANGELOG_HEADER).unwrap();

        let row = row9([
            "2025-04-22 12:00:00 UTC",
            "comment",
            "",
            "",
            "",
            "",
            "",
            "",
            "quarterly audit, with a comma",
        ]);
        append(&path, &CHANGELOG_HEADER, &row).unwrap();

        let rows = read_all(&path, &CHANGELOG_HEADER).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], row);
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.csv");
        create(&path, &CHANGELOG_HEADER).unwrap();

        for i in 0..5 {
            let row = row9([
                "2025-04-22 12:00:00 UTC",
                "comment",
                "",
                "",
                "",
                "",
                "",
                "",
                &format!("message {i}"),
            ]);
            append(&path, &CHANGELOG_HEADER, &row).unwrap();
        }

        let rows = read_all(&path, &CHANGELOG_HEADER).unwrap();
        let messages: Vec<_> = rows.iter().map(|r| r[8].as_str()).collect();
        assert_eq!(
            messages,
            vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
        );
    }

    #[test]
    fn test_missing_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();

        let err = read_all(&path, &CHANGELOG_HEADER).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::Schema(SchemaError::MissingHeader { .. })
        ));

        let row = row9(["", "comment", "", "", "", "", "", "", "x"]);
        let err = append(&path, &CHANGELOG_HEADER, &row).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::Schema(SchemaError::MissingHeader { .. })
        ));
    }

    #[test]
    fn test_header_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrong.csv");
        std::fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        let err = read_all(&path, &CHANGELOG_HEADER).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::Schema(SchemaError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn test_short_row_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        let mut content = CHANGELOG_HEADER.join(",");
        content.push_str("\n2025-04-22 12:00:00 UTC,comment\n");
        std::fs::write(&path, content).unwrap();

        let err = read_all(&path, &CHANGELOG_HEADER).unwrap_err();
        assert!(matches!(
            err,
            HistorifyError::Schema(SchemaError::ColumnCount { .. })
        ));
    }
}
