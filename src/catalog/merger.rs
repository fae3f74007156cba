//! Merge-on-write of resolved facilities into the durable catalog.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::store::{read_json, write_json, CatalogLayout};
use crate::identity::IdCollision;
use crate::models::{CanonicalFacility, NeighborEdge, PlaceDocument, PlaceRef};
use crate::neighbors::{build_neighbor_graph, centroids};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub places_written: usize,
    /// Incoming facilities whose ID is already held by a different fingerprint on disk
    pub collisions: Vec<IdCollision>,
}

/// Writes per-facility files, the global index and per-place documents.
///
/// Previously stored values are loaded first and only improved, never
/// regressed, so a partial run cannot lose what an earlier run learned.
pub struct CatalogMerger {
    layout: CatalogLayout,
}

impl CatalogMerger {
    pub fn new(layout: CatalogLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    /// Merge `incoming` into the catalog and rewrite derived documents.
    /// Returns the stats and the full merged catalog.
    pub fn merge(
        &self,
        incoming: &BTreeMap<String, CanonicalFacility>,
    ) -> Result<(MergeStats, BTreeMap<String, CanonicalFacility>)> {
        let mut stats = MergeStats::default();

        for (id, facility) in incoming {
            let path = self.layout.facility_file(id);
            let existed = path.exists();
            let merged = if existed {
                match read_json::<CanonicalFacility>(&path) {
                    Ok(stored) if is_collision(&stored, facility) => {
                        error!(
                            id = %id,
                            kept = %stored.fingerprint,
                            dropped = %facility.fingerprint,
                            "Facility ID already held by another facility; keeping the stored one"
                        );
                        stats.collisions.push(IdCollision {
                            id: id.clone(),
                            kept: stored.fingerprint,
                            dropped: facility.fingerprint.clone(),
                        });
                        continue;
                    }
                    Ok(mut stored) => {
                        stored.absorb(facility);
                        stored
                    }
                    Err(e) => {
                        warn!("Replacing unreadable facility file {}: {:#}", path.display(), e);
                        facility.clone()
                    }
                }
            } else {
                facility.clone()
            };

            match (existed, write_json(&path, &merged)?) {
                (false, _) => stats.created += 1,
                (true, true) => stats.updated += 1,
                (true, false) => stats.unchanged += 1,
            }
        }

        let catalog = self.load_all()?;
        let index: Vec<&CanonicalFacility> = catalog.values().collect();
        write_json(&self.layout.index_file(), &index)?;

        let places = self.write_place_documents(&catalog)?;
        stats.places_written = places.len();

        info!(
            "Catalog merge: {} created, {} updated, {} unchanged, {} facilities total, {} places",
            stats.created,
            stats.updated,
            stats.unchanged,
            catalog.len(),
            places.len()
        );
        Ok((stats, catalog))
    }

    /// Rewrite the index, place documents and neighbor graph from the
    /// facility files alone, after facilities were removed.
    pub fn rebuild(&self, neighbors_k: usize) -> Result<BTreeMap<String, CanonicalFacility>> {
        let (_, catalog) = self.merge(&BTreeMap::new())?;
        self.write_neighbors(&place_documents(&catalog), neighbors_k)?;
        Ok(catalog)
    }

    /// `k` nearest places per place, written to `neighbors.json`
    pub fn write_neighbors(
        &self,
        documents: &BTreeMap<PlaceRef, PlaceDocument>,
        k: usize,
    ) -> Result<BTreeMap<String, Vec<NeighborEdge>>> {
        let graph = build_neighbor_graph(&centroids(documents), k);
        write_json(&self.layout.neighbors_file(), &graph)?;
        Ok(graph)
    }

    /// Every facility file on disk, keyed by ID
    pub fn load_all(&self) -> Result<BTreeMap<String, CanonicalFacility>> {
        let dir = self.layout.facilities_dir();
        let mut catalog = BTreeMap::new();
        if !dir.exists() {
            return Ok(catalog);
        }
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            match read_json::<CanonicalFacility>(&path) {
                Ok(facility) => {
                    catalog.insert(facility.id.clone(), facility);
                }
                Err(e) => warn!("Skipping unreadable facility file {}: {:#}", path.display(), e),
            }
        }
        Ok(catalog)
    }

    /// Recompute each place's membership from `appears_in` and write its document.
    pub fn write_place_documents(
        &self,
        catalog: &BTreeMap<String, CanonicalFacility>,
    ) -> Result<BTreeMap<PlaceRef, PlaceDocument>> {
        let documents = place_documents(catalog);
        for (place, document) in &documents {
            write_json(&self.layout.place_file(place), document)?;
        }

        let current: BTreeSet<_> = documents.keys().map(|p| self.layout.place_file(p)).collect();
        self.remove_stale_place_documents(&current)?;
        Ok(documents)
    }

    fn remove_stale_place_documents(&self, current: &BTreeSet<PathBuf>) -> Result<()> {
        let dir = self.layout.places_dir();
        if !dir.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
            let path = entry?.into_path();
            if path.extension().map_or(false, |e| e == "json") && !current.contains(&path) {
                info!("Removing place document with no members: {}", path.display());
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Record which IDs the latest run saw in any source.
    ///
    /// Absence only counts when `complete` (every group read without a
    /// skipped file or failed lookup). Otherwise `seen` is added to the
    /// previous list, or to every catalog ID when there is no previous list.
    pub fn write_last_seen(
        &self,
        seen: &BTreeSet<String>,
        complete: bool,
        catalog: &BTreeMap<String, CanonicalFacility>,
    ) -> Result<()> {
        let path = self.layout.last_seen_file();
        let mut ids = seen.clone();
        if !complete {
            if path.exists() {
                ids.extend(read_json::<BTreeSet<String>>(&path)?);
            } else {
                ids.extend(catalog.keys().cloned());
            }
            info!("Incomplete run; last_seen.json only grows");
        }
        write_json(&path, &ids)?;
        Ok(())
    }
}

/// Both sides carry a fingerprint and they differ
fn is_collision(stored: &CanonicalFacility, incoming: &CanonicalFacility) -> bool {
    !stored.fingerprint.is_empty()
        && !incoming.fingerprint.is_empty()
        && stored.fingerprint != incoming.fingerprint
}

/// Per-place documents derived from `appears_in`, facilities sorted by name then ID.
///
/// Spellings of one place that share a slug ("McAllen", "Mcallen") publish as
/// a single document under the first spelling in order.
pub fn place_documents(
    catalog: &BTreeMap<String, CanonicalFacility>,
) -> BTreeMap<PlaceRef, PlaceDocument> {
    let mut members: BTreeMap<String, (PlaceRef, BTreeMap<&str, &CanonicalFacility>)> =
        BTreeMap::new();
    for facility in catalog.values() {
        for place in &facility.appears_in {
            let (name, facilities) = members
                .entry(place.key())
                .or_insert_with(|| (place.clone(), BTreeMap::new()));
            if *place < *name {
                *name = place.clone();
            }
            facilities.insert(facility.id.as_str(), facility);
        }
    }

    members
        .into_values()
        .map(|(place, facilities)| {
            let mut facilities: Vec<&CanonicalFacility> = facilities.into_values().collect();
            facilities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            let document = PlaceDocument {
                place_group: place.place_group.clone(),
                place: place.place.clone(),
                slug: place.place_slug(),
                facilities: facilities.iter().map(|f| f.summary()).collect(),
            };
            (place, document)
        })
        .collect()
}
