//! Spreadsheet reading: file validation, row counting, chunked row access
//!
//! Supports .xlsx/.xls through calamine and .csv through the csv crate.
//! CSV rows stream straight off the reader, one chunk at a time; Excel
//! ranges are materialized by calamine and drained through the same
//! interface. The validator is the first fail point of the pipeline:
//! nothing is counted or processed until the artifact has proven readable.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::warn;

use crate::services::error::ImportError;
use crate::services::transform::{normalize_heading, RawRow};

/// Extensions accepted by the upload endpoint and the validator alike
pub const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// One data row as read from the sheet. `cells` is Err when the underlying
/// reader could not decode the record; the engine counts those against the
/// transformation-error ceiling instead of aborting the read.
#[derive(Debug, Clone)]
pub struct RowRecord {
    /// 1-based sheet position; the header is row 1
    pub number: i64,
    pub cells: Result<Vec<String>, String>,
}

/// An open sheet: normalized headings up front, data rows pulled on demand
pub struct SheetReader {
    headings: Vec<String>,
    rows: Box<dyn Iterator<Item = RowRecord> + Send>,
}

impl SheetReader {
    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    /// Pull up to `size` rows off the underlying reader. An empty vec means
    /// the sheet is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Vec<RowRecord> {
        self.rows.by_ref().take(size).collect()
    }

    /// Zip one record's cells with the headings. Surplus cells are dropped,
    /// missing ones read as blank.
    pub fn raw_row(&self, cells: &[String]) -> RawRow {
        self.headings
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
            .collect()
    }
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn is_blank_cells(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_excel(path: &Path) -> Result<Vec<Vec<String>>, ImportError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ImportError::Corrupted(e.to_string()))?;

    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ImportError::Corrupted("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| ImportError::Corrupted(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, ImportError> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ImportError::Corrupted(e.to_string()))
}

fn open_csv(path: &Path) -> Result<SheetReader, ImportError> {
    let mut records = csv_reader(path)?.into_records();

    let headings = match records.next() {
        Some(Ok(rec)) => rec.iter().map(normalize_heading).collect(),
        Some(Err(e)) => return Err(ImportError::Corrupted(e.to_string())),
        None => return Err(ImportError::EmptyFile),
    };

    // Records stream lazily off the file; a broken record is a per-row
    // fault, not a dead file
    let rows = records.enumerate().map(|(i, rec)| RowRecord {
        number: i as i64 + 2,
        cells: rec
            .map(|r| r.iter().map(|c| c.trim().to_string()).collect())
            .map_err(|e| e.to_string()),
    });

    Ok(SheetReader {
        headings,
        rows: Box::new(rows),
    })
}

fn open_excel(path: &Path) -> Result<SheetReader, ImportError> {
    let mut all = read_excel(path)?.into_iter();

    let headings = match all.next() {
        Some(cells) => cells.iter().map(|h| normalize_heading(h)).collect(),
        None => return Err(ImportError::EmptyFile),
    };

    let rows = all.enumerate().map(|(i, cells)| RowRecord {
        number: i as i64 + 2,
        cells: Ok(cells),
    });

    Ok(SheetReader {
        headings,
        rows: Box::new(rows),
    })
}

/// Open the sheet for reading: header row normalized into lookup keys,
/// everything after it available as data rows (blank ones included; the
/// transformer skips them so that counting and processing agree on what a
/// row is).
pub fn open_sheet(path: &Path) -> Result<SheetReader, ImportError> {
    match file_extension(path).as_str() {
        "csv" => open_csv(path),
        "xlsx" | "xls" => open_excel(path),
        other => Err(ImportError::UnsupportedFormat(other.to_string())),
    }
}

/// Confirm the artifact is a readable, non-empty spreadsheet of a supported
/// format. Checks run in order: extension, readability, at least a header
/// row. Any failure halts the run before the row counter is invoked.
pub fn validate_file(path: &Path) -> Result<(), ImportError> {
    if !path.exists() {
        return Err(ImportError::FileMissing(path.display().to_string()));
    }

    let ext = file_extension(path);
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ImportError::UnsupportedFormat(ext));
    }

    open_sheet(path).map(|_| ())
}

/// Count data rows for progress math: rows after the header with at least
/// one non-blank cell. Unreadable records count too (they will be processed
/// and reported, so they must be part of the total).
///
/// Falls back to a cheap "sheet height minus header" scan when the full
/// read fails; if both strategies fail the run fails with an undetermined
/// row count.
pub fn count_data_rows(path: &Path) -> Result<i32, ImportError> {
    match open_sheet(path) {
        Ok(sheet) => {
            let count = sheet
                .rows
                .filter(|r| match &r.cells {
                    Ok(cells) => !is_blank_cells(cells),
                    Err(_) => true,
                })
                .count();
            Ok(count as i32)
        }
        Err(primary) => {
            warn!("Primary row count failed ({}), trying raw scan", primary);
            match raw_row_count(path) {
                Ok(count) => Ok(count),
                Err(fallback) => Err(ImportError::RowCountUndetermined(fallback.to_string())),
            }
        }
    }
}

/// Cheap fallback: raw sheet rows minus the header, no blank filtering.
/// Broken records still occupy a sheet position, so they count too.
fn raw_row_count(path: &Path) -> Result<i32, ImportError> {
    match file_extension(path).as_str() {
        "csv" => Ok(csv_reader(path)?.into_records().count().saturating_sub(1) as i32),
        "xlsx" | "xls" => Ok(read_excel(path)?.len().saturating_sub(1) as i32),
        other => Err(ImportError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const SAMPLE: &str = "Cargo No,Cargo Type,Cargo Size,Weight (kg),Penalty Days\n\
                          CN-1,container,40,1000,2\n\
                          CN-2,bulk,20,,0\n\
                          ,,,,\n\
                          CN-3,container,40,500,1\n";

    #[test]
    fn test_validate_accepts_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        assert!(validate_file(&path).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.pdf", SAMPLE);
        assert!(matches!(
            validate_file(&path),
            Err(ImportError::UnsupportedFormat(ext)) if ext == "pdf"
        ));
    }

    #[test]
    fn test_validate_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.csv");
        assert!(matches!(
            validate_file(&path),
            Err(ImportError::FileMissing(_))
        ));
    }

    #[test]
    fn test_validate_rejects_renamed_non_spreadsheet() {
        let dir = tempfile::tempdir().unwrap();
        // Plain text renamed to .xlsx; calamine cannot open it
        let path = write_csv(&dir, "fake.xlsx", "this is not a workbook");
        assert!(matches!(
            validate_file(&path),
            Err(ImportError::Corrupted(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "empty.csv", "");
        assert!(matches!(validate_file(&path), Err(ImportError::EmptyFile)));
    }

    #[test]
    fn test_open_sheet_normalizes_headings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        let mut sheet = open_sheet(&path).unwrap();
        assert_eq!(
            sheet.headings(),
            ["cargo_no", "cargo_type", "cargo_size", "weight_kg", "penalty_days"]
        );
        let rows = sheet.next_chunk(usize::MAX);
        assert_eq!(rows.len(), 4);
        // Data rows are numbered from 2 (header is row 1)
        assert_eq!(rows[0].number, 2);
    }

    #[test]
    fn test_chunks_are_bounded_and_drain_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        let mut sheet = open_sheet(&path).unwrap();

        let first = sheet.next_chunk(3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].number, 2);

        let second = sheet.next_chunk(3);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].number, 5);

        assert!(sheet.next_chunk(3).is_empty());
    }

    #[test]
    fn test_raw_row_maps_headings_to_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        let mut sheet = open_sheet(&path).unwrap();
        let rows = sheet.next_chunk(1);
        let cells = rows[0].cells.as_ref().unwrap();
        let raw = sheet.raw_row(cells);
        assert_eq!(raw["cargo_no"], "CN-1");
        assert_eq!(raw["weight_kg"], "1000");
    }

    #[test]
    fn test_count_excludes_blank_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        // 4 physical data rows, one entirely blank
        assert_eq!(count_data_rows(&path).unwrap(), 3);
    }

    #[test]
    fn test_count_includes_malformed_but_nonempty_rows() {
        let dir = tempfile::tempdir().unwrap();
        // Row with empty cargo_no still parses as non-empty, so it counts
        let content = "Cargo No,Cargo Type,Cargo Size\n\
                       ,container,40\n\
                       CN-2,bulk,20\n";
        let path = write_csv(&dir, "cargo.csv", content);
        assert_eq!(count_data_rows(&path).unwrap(), 2);
    }

    #[test]
    fn test_count_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "cargo.csv", SAMPLE);
        assert_eq!(
            count_data_rows(&path).unwrap(),
            count_data_rows(&path).unwrap()
        );
    }

    #[test]
    fn test_count_fails_when_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.csv");
        assert!(matches!(
            count_data_rows(&path),
            Err(ImportError::RowCountUndetermined(_))
        ));
    }
}
