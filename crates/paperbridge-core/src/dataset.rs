//! CSV dataset loader.
//!
//! The dataset is read fresh on every sync pass. A header row is required;
//! only `paper_id` must be present, other columns default to blank.

use crate::error::ErrorCode;
use crate::model::DatasetRecord;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Failure to produce the record sequence for a pass.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read dataset {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed dataset row at line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("dataset row at line {line} has an empty paper_id")]
    MissingPaperId { line: u64 },
}

impl DatasetError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) | Self::Io { .. } => ErrorCode::DatasetMissing,
            Self::Malformed { .. } | Self::MissingPaperId { .. } => ErrorCode::DatasetMalformed,
        }
    }
}

/// Load every record from the CSV file at `path`.
///
/// # Errors
///
/// Returns [`DatasetError::NotFound`] when the file does not exist, and a
/// malformed/missing-key error for the first bad row. A bad row fails the
/// whole load: a partial dataset would make reconciliation misleading.
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRecord>, DatasetError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DatasetError::NotFound(path.to_path_buf())
        } else {
            DatasetError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let records = read_dataset(file)?;
    tracing::debug!(path = %path.display(), rows = records.len(), "loaded dataset");
    Ok(records)
}

/// Parse CSV rows from any reader.
///
/// # Errors
///
/// See [`load_dataset`].
pub fn read_dataset<R: Read>(input: R) -> Result<Vec<DatasetRecord>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<DatasetRecord>().enumerate() {
        // Line 1 is the header.
        let fallback_line = u64::try_from(index).unwrap_or(u64::MAX).saturating_add(2);
        let record = row.map_err(|err| DatasetError::Malformed {
            line: err
                .position()
                .map_or(fallback_line, csv::Position::line),
            message: err.to_string(),
        })?;

        let record = record.normalized();
        if record.paper_id.is_empty() {
            return Err(DatasetError::MissingPaperId {
                line: fallback_line,
            });
        }
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "paper_id,paper,coder,coder_id,supervisor,supervisor_id,paper_coder\n";

    #[test]
    fn reads_full_rows() {
        let csv = format!(
            "{HEADER}101,Trade and Growth,Ana,c-1,Ben,s-9,101_c-1\n\
             102,Labor Markets,Cy,c-2,Dee,s-8,102_c-2\n"
        );
        let records = read_dataset(csv.as_bytes()).expect("dataset parses");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].paper_id, "101");
        assert_eq!(records[0].paper.as_deref(), Some("Trade and Growth"));
        assert_eq!(records[1].supervisor_id.as_deref(), Some("s-8"));
        assert_eq!(records[1].paper_coder.as_deref(), Some("102_c-2"));
    }

    #[test]
    fn blank_optional_cells_become_none() {
        let csv = format!("{HEADER}P1,,Ana,,,,\n");
        let records = read_dataset(csv.as_bytes()).expect("dataset parses");

        assert_eq!(records[0].paper, None);
        assert_eq!(records[0].coder.as_deref(), Some("Ana"));
        assert_eq!(records[0].supervisor, None);
    }

    #[test]
    fn missing_optional_columns_default() {
        let records = read_dataset("paper_id,coder\nP1,Ana\n".as_bytes()).expect("parses");
        assert_eq!(records[0].coder.as_deref(), Some("Ana"));
        assert_eq!(records[0].supervisor_id, None);
    }

    #[test]
    fn missing_paper_id_column_is_malformed() {
        let err = read_dataset("coder,supervisor\nAna,Ben\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { .. }), "{err}");
        assert_eq!(err.code(), ErrorCode::DatasetMalformed);
    }

    #[test]
    fn blank_paper_id_reports_line() {
        let csv = format!("{HEADER}P1,a,b,c,d,e,f\n  ,a,b,c,d,e,f\n");
        let err = read_dataset(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingPaperId { line: 3 }), "{err}");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_dataset(&dir.path().join("papers.csv")).unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
        assert_eq!(err.code(), ErrorCode::DatasetMissing);
    }

    #[test]
    fn ragged_row_is_malformed() {
        let csv = format!("{HEADER}P1,a,b\n");
        let err = read_dataset(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { .. }), "{err}");
    }
}
