use std::path::PathBuf;
use thiserror::Error;

use crate::classify::RejectReason;

/// Conditions under which a run cannot produce meaningful output
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("data directory {0} does not exist")]
    MissingDataDir(PathBuf),

    #[error("source {source_id} of group {group}: {path} does not exist")]
    MissingSourceDir {
        group: String,
        source_id: String,
        path: PathBuf,
    },

    #[error("seed list {0} is missing and group {1} has no overrides")]
    MissingSeedList(PathBuf, String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a single source file contributed nothing. Never fatal.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}: not an array source")]
    NotArraySource(PathBuf),

    #[error("{0}: no usable rows")]
    NoUsableRows(PathBuf),

    #[error(transparent)]
    Unreadable(#[from] anyhow::Error),
}

impl SourceError {
    pub fn reason(&self) -> RejectReason {
        match self {
            SourceError::NotArraySource(_) | SourceError::Unreadable(_) => {
                RejectReason::NotArraySource
            }
            SourceError::NoUsableRows(_) => RejectReason::NoUsableRows,
        }
    }
}
