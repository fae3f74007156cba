//! CSV and TSV extracts, optionally gzipped.

use anyhow::Context;
use csv::{ReaderBuilder, Trim};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::SourceError;
use crate::normalize::RawRecord;

/// Read a delimited-text government export (optionally gzipped).
///
/// Tab-separated when the name ends in `.tsv` / `.tsv.gz`, comma otherwise.
/// Rows that fail to parse are skipped with a warning.
pub fn read_csv(path: &Path, source: &str) -> Result<Vec<RawRecord>, SourceError> {
    info!("Reading delimited source {}", path.display());

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let gzipped = path.extension().map_or(false, |e| e == "gz");
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter_for(path))
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .with_context(|| format!("Failed to read header row of {}", path.display()))?
        .clone();

    let mut records = Vec::new();
    let mut bad_rows = 0usize;
    for (line, result) in csv_reader.records().enumerate() {
        match result {
            Ok(row) if row.iter().any(|cell| !cell.is_empty()) => {
                records.push(RawRecord::from_csv(&headers, &row, source));
            }
            Ok(_) => {}
            Err(e) => {
                bad_rows += 1;
                warn!("{}: skipping row {}: {}", path.display(), line + 2, e);
            }
        }
    }

    if records.is_empty() {
        return Err(SourceError::NoUsableRows(path.to_path_buf()));
    }
    info!(
        "Read {} rows from {} ({} malformed)",
        records.len(),
        path.display(),
        bad_rows
    );
    Ok(records)
}

fn delimiter_for(path: &Path) -> u8 {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if name.ends_with(".tsv") || name.ends_with(".tsv.gz") {
        b'\t'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::Value;
    use std::io::Write;

    #[test]
    fn test_quoted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permits.csv");
        std::fs::write(
            &path,
            "Site_Name,Address,Latitude,Longitude\n\"Acme, Inc. Landfill\",\"100 County Rd 12\",31.5,-97.1\n,,,\n",
        )
        .unwrap();

        let records = read_csv(&path, "tceq").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fields.get("site_name"),
            Some(&Value::String("Acme, Inc. Landfill".to_string()))
        );
        assert_eq!(records[0].source, "tceq");
    }

    #[test]
    fn test_gzipped_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"name\tcity\nTransfer Yard\tTemple\n").unwrap();
        encoder.finish().unwrap();

        let records = read_csv(&path, "gz").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fields.get("city"),
            Some(&Value::String("Temple".to_string()))
        );
    }

    #[test]
    fn test_header_only_has_no_usable_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "name,lat,lng\n").unwrap();

        let err = read_csv(&path, "x").unwrap_err();
        assert!(matches!(err, SourceError::NoUsableRows(_)));
    }
}
