//! Readers for source extracts.
//!
//! Each reader turns one file into [`RawRecord`]s. A file that cannot be
//! used yields a [`SourceError`] that the caller logs and tallies; only a
//! missing source path is fatal.

pub mod csv_source;
pub mod json_source;
pub mod pbf_source;

use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{SourceConfig, SourceKind};
use crate::error::{FatalError, SourceError};
use crate::normalize::RawRecord;

pub use csv_source::read_csv;
pub use json_source::{
    annotate_with_ids, read_override, read_place_keyed, read_seed_list, OverrideDocument,
};
pub use pbf_source::read_pbf;

/// A file that contributed nothing, and why
#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: SourceError,
}

/// Everything read from one configured source
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<SkippedFile>,
}

impl SourceKind {
    fn matches(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match self {
            SourceKind::Csv => [".csv", ".csv.gz", ".tsv", ".tsv.gz"]
                .iter()
                .any(|ext| name.ends_with(ext)),
            SourceKind::Json => name.ends_with(".json"),
            SourceKind::Pbf => name.ends_with(".pbf"),
        }
    }

    fn read(&self, path: &Path, source: &str) -> Result<Vec<RawRecord>, SourceError> {
        match self {
            SourceKind::Csv => read_csv(path, source),
            SourceKind::Json => read_place_keyed(path, source),
            SourceKind::Pbf => read_pbf(path, source),
        }
    }
}

/// Files a source path stands for, sorted so iteration order is stable
pub fn source_files(kind: SourceKind, path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| kind.matches(p))
        .collect();
    files.sort();
    files
}

/// Read every file of one configured source.
pub fn read_source(
    group: &str,
    config: &SourceConfig,
    data_dir: &Path,
) -> Result<SourceBatch, FatalError> {
    let path = config.resolve_path(data_dir);
    if !path.exists() {
        return Err(FatalError::MissingSourceDir {
            group: group.to_string(),
            source_id: config.id.clone(),
            path,
        });
    }

    let mut batch = SourceBatch::default();
    for file in source_files(config.kind, &path) {
        match config.kind.read(&file, &config.id) {
            Ok(records) => batch.records.extend(records),
            Err(error) => {
                warn!(group = %group, source = %config.id, "Skipping source file: {}", error);
                batch.skipped.push(SkippedFile { path: file, error });
            }
        }
    }
    Ok(batch)
}
