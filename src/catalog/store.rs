//! On-disk catalog layout and byte-stable JSON I/O.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::PlaceRef;

/// Pretty JSON with a trailing newline
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    text.push('\n');
    Ok(text)
}

/// Write `contents` unless the file already holds exactly these bytes.
/// Returns true if the file was written.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == contents.as_bytes() {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(true)
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    write_if_changed(path, &to_pretty_json(value)?)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Paths of every catalog artifact under the data directory
#[derive(Debug, Clone)]
pub struct CatalogLayout {
    pub data_dir: PathBuf,
}

impl CatalogLayout {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    pub fn facilities_dir(&self) -> PathBuf {
        self.catalog_dir().join("facilities")
    }

    pub fn facility_file(&self, id: &str) -> PathBuf {
        self.facilities_dir().join(format!("{}.json", id))
    }

    pub fn index_file(&self) -> PathBuf {
        self.catalog_dir().join("facilities.json")
    }

    pub fn places_dir(&self) -> PathBuf {
        self.catalog_dir().join("places")
    }

    pub fn place_file(&self, place: &PlaceRef) -> PathBuf {
        self.places_dir()
            .join(crate::models::slugify(&place.place_group))
            .join(format!("{}.json", place.place_slug()))
    }

    pub fn neighbors_file(&self) -> PathBuf {
        self.catalog_dir().join("neighbors.json")
    }

    pub fn quality_report_file(&self) -> PathBuf {
        self.catalog_dir().join("quality_report.json")
    }

    pub fn last_seen_file(&self) -> PathBuf {
        self.catalog_dir().join("last_seen.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.catalog_dir().join(".lock")
    }

    pub fn seeds_file(&self) -> PathBuf {
        self.data_dir.join("seeds").join("places.json")
    }

    pub fn overrides_dir(&self) -> PathBuf {
        self.data_dir.join("overrides")
    }

    pub fn rules_file(&self) -> PathBuf {
        self.data_dir.join("rules.toml")
    }

    pub fn geocode_cache_file(&self) -> PathBuf {
        self.data_dir.join("cache").join("reverse_geocode.json")
    }
}

/// Advisory single-writer lock on the catalog, released on drop.
///
/// Only guards against a second `ingest` started by mistake; a crashed run
/// leaves the file behind and it must be removed by hand.
#[derive(Debug)]
pub struct CatalogLock {
    path: PathBuf,
}

impl CatalogLock {
    pub fn acquire(layout: &CatalogLayout) -> Result<Self> {
        let path = layout.lock_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "Catalog is locked by another run (remove {} if stale)",
                    path.display()
                )
            })?;
        info!("Acquired catalog lock {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release catalog lock {}: {}", self.path.display(), e);
        }
    }
}
