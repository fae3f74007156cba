//! JSON extracts, curated override documents and the seed list.

use anyhow::Context;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::catalog::store::{read_json, write_json};
use crate::error::SourceError;
use crate::models::PlaceRef;
use crate::normalize::RawRecord;

/// Keys under which a per-place document may hold its facility array
pub const CONTAINER_KEYS: [&str; 5] = ["facilities", "sites", "landfills", "locations", "items"];

/// Key written back into curated entries once resolved
pub const FACILITY_ID_KEY: &str = "facility_id";

/// A curated per-place document from `overrides/<group>/<place-slug>.json`
#[derive(Debug, Clone)]
pub struct OverrideDocument {
    pub path: PathBuf,
    /// `place` field of the document when present, otherwise the file stem
    pub place: String,
    /// `(entry index, record)` for every object entry
    pub entries: Vec<(usize, RawRecord)>,
}

fn entries(doc: &Value) -> Option<&Vec<Value>> {
    match doc {
        Value::Array(items) => Some(items),
        Value::Object(object) => CONTAINER_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

fn entries_mut(doc: &mut Value) -> Option<&mut Vec<Value>> {
    match doc {
        Value::Array(items) => Some(items),
        Value::Object(object) => {
            let key = CONTAINER_KEYS
                .iter()
                .find(|key| object.get(**key).map_or(false, Value::is_array))?;
            object.get_mut(*key).and_then(Value::as_array_mut)
        }
        _ => None,
    }
}

fn read_value(path: &Path) -> Result<Value, SourceError> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(value)
}

/// Read a place-keyed extract: `{ "<place>": [ {...}, ... ], ... }`.
///
/// A document holding a bare array (or one under a container key) is read
/// as records with no place hint.
pub fn read_place_keyed(path: &Path, source: &str) -> Result<Vec<RawRecord>, SourceError> {
    let doc = read_value(path)?;
    let mut records = Vec::new();

    if let Some(items) = entries(&doc) {
        records.extend(objects(items).map(|(_, object)| RawRecord::from_json(object, source)));
    } else if let Value::Object(places) = &doc {
        for (place, items) in places {
            let Some(items) = items.as_array() else {
                warn!("{}: value for {:?} is not an array", path.display(), place);
                continue;
            };
            records.extend(objects(items).map(|(_, object)| {
                RawRecord::from_json(object, source).with_place_hint(Some(place.as_str()))
            }));
        }
    } else {
        return Err(SourceError::NotArraySource(path.to_path_buf()));
    }

    if records.is_empty() {
        return Err(SourceError::NoUsableRows(path.to_path_buf()));
    }
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Read one curated override document. Its records are manual.
pub fn read_override(path: &Path) -> Result<OverrideDocument, SourceError> {
    let doc = read_value(path)?;
    let items = entries(&doc).ok_or_else(|| SourceError::NotArraySource(path.to_path_buf()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let place = doc
        .get("place")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| stem.replace('-', " "));

    let entries: Vec<(usize, RawRecord)> = objects(items)
        .map(|(index, object)| {
            let mut record =
                RawRecord::from_json(object, "override").with_place_hint(Some(place.as_str()));
            record.manual = true;
            (index, record)
        })
        .collect();
    if entries.is_empty() {
        return Err(SourceError::NoUsableRows(path.to_path_buf()));
    }

    Ok(OverrideDocument {
        path: path.to_path_buf(),
        place,
        entries,
    })
}

fn objects(items: &[Value]) -> impl Iterator<Item = (usize, &Map<String, Value>)> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| item.as_object().map(|object| (index, object)))
}

/// Write each resolved FacilityID into its override entry.
///
/// `ids` maps entry index → ID. The file is rewritten only if some entry
/// changed. Returns true if it was.
pub fn annotate_with_ids(path: &Path, ids: &BTreeMap<usize, String>) -> anyhow::Result<bool> {
    let mut doc: Value = read_json(path)?;
    let Some(items) = entries_mut(&mut doc) else {
        return Ok(false);
    };

    let mut changed = false;
    for (index, id) in ids {
        let Some(Value::Object(entry)) = items.get_mut(*index) else {
            continue;
        };
        if entry.get(FACILITY_ID_KEY).and_then(Value::as_str) != Some(id.as_str()) {
            entry.insert(FACILITY_ID_KEY.to_string(), Value::String(id.clone()));
            changed = true;
        }
    }

    if !changed {
        return Ok(false);
    }
    write_json(path, &doc)
}

/// Read `seeds/places.json`: an array of `{place_group, place}`
pub fn read_seed_list(path: &Path) -> anyhow::Result<Vec<PlaceRef>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_place_keyed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "extract.json",
            &json!({
                "Waco": [{"name": "A"}, {"name": "B"}],
                "Temple": [{"name": "C"}, "junk"],
                "meta": {"version": 2}
            }),
        );

        let records = read_place_keyed(&path, "extract").unwrap();
        assert_eq!(records.len(), 3);
        let temple: Vec<_> = records
            .iter()
            .filter(|r| r.place_hint.as_deref() == Some("Temple"))
            .collect();
        assert_eq!(temple.len(), 1);
    }

    #[test]
    fn test_non_array_document_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.json", &json!("just a string"));
        assert!(matches!(
            read_place_keyed(&path, "x"),
            Err(SourceError::NotArraySource(_))
        ));

        let path = write(dir.path(), "bad-override.json", &json!({"name": "not a list"}));
        assert!(matches!(read_override(&path), Err(SourceError::NotArraySource(_))));
    }

    #[test]
    fn test_unparseable_document_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_override(&path), Err(SourceError::Unreadable(_))));
    }

    #[test]
    fn test_override_container_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "el-paso.json",
            &json!({"landfills": [{"name": "Clint Landfill", "lat": 31.6, "lng": -106.2}]}),
        );

        let doc = read_override(&path).unwrap();
        assert_eq!(doc.place, "el paso");
        assert_eq!(doc.entries.len(), 1);
        assert!(doc.entries[0].1.manual);
        assert_eq!(doc.entries[0].1.place_hint.as_deref(), Some("el paso"));
    }

    #[test]
    fn test_annotation_only_writes_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "waco.json",
            &json!({"place": "Waco", "facilities": [{"name": "A"}, 7, {"name": "B"}]}),
        );

        let mut ids = BTreeMap::new();
        ids.insert(0, "m_aaaaaaaaaaaa".to_string());
        ids.insert(2, "m_bbbbbbbbbbbb".to_string());

        assert!(annotate_with_ids(&path, &ids).unwrap());
        assert!(!annotate_with_ids(&path, &ids).unwrap());

        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["facilities"][0][FACILITY_ID_KEY], "m_aaaaaaaaaaaa");
        assert_eq!(doc["facilities"][1], 7);
        assert_eq!(doc["facilities"][2][FACILITY_ID_KEY], "m_bbbbbbbbbbbb");
        assert_eq!(read_override(&path).unwrap().place, "Waco");
    }
}
