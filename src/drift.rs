//! Drift and coverage audit between the canonical catalog and generated artifacts.
//!
//! [`DriftAuditor::audit`] only reads. Deletion happens in
//! [`DriftAuditor::prune`], and only when asked to apply.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::store::{read_json, CatalogLayout};
use crate::catalog::CatalogMerger;
use crate::models::{slugify, PlaceDocument, PlaceRef};

/// Generated per-facility artifacts live under this directory name
pub const FACILITY_ARTIFACT_DIR: &str = "facility";
pub const DEFAULT_SAMPLE: usize = 10;

/// Count plus a bounded, sorted sample
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftList {
    pub count: usize,
    pub sample: Vec<String>,
    #[serde(skip)]
    pub all: Vec<String>,
}

impl DriftList {
    fn new(items: BTreeSet<String>, sample: usize) -> Self {
        let all: Vec<String> = items.into_iter().collect();
        Self {
            count: all.len(),
            sample: all.iter().take(sample).cloned().collect(),
            all,
        }
    }

    fn retain(&self, keep: impl Fn(&str) -> bool, sample: usize) -> Self {
        let items = self.all.iter().filter(|item| keep(item.as_str())).cloned().collect();
        Self::new(items, sample)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupDrift {
    /// Generated place artifacts no longer backed by renderable data
    pub stale_artifacts: DriftList,
    /// Places on the seed list with no renderable data
    pub listed_without_data: DriftList,
    /// Renderable places never generated
    pub not_generated: DriftList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub groups: BTreeMap<String, GroupDrift>,
    pub stale_facility_artifacts: DriftList,
    pub facilities_not_generated: DriftList,
    /// Canonical facilities absent from every source in the latest run
    pub orphaned_facilities: DriftList,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.stale_facility_artifacts.count == 0
            && self.orphaned_facilities.count == 0
            && self
                .groups
                .values()
                .all(|g| g.stale_artifacts.count == 0 && g.listed_without_data.count == 0)
    }
}

/// What a prune pass removed (or would remove)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub applied: bool,
    pub place_artifacts: usize,
    pub facility_artifacts: usize,
    pub catalog_facilities: usize,
}

pub struct DriftAuditor {
    layout: CatalogLayout,
    generated_dir: PathBuf,
    sample: usize,
}

impl DriftAuditor {
    pub fn new(layout: CatalogLayout, generated_dir: PathBuf, sample: usize) -> Self {
        Self {
            layout,
            generated_dir,
            sample,
        }
    }

    /// Compare the catalog (and seed list) against generated artifacts.
    pub fn audit(&self, listed: &[PlaceRef]) -> Result<DriftReport> {
        let renderable = self.renderable_places()?;
        let generated = self.generated_places()?;

        let mut listed_by_group: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for place in listed {
            listed_by_group
                .entry(slugify(&place.place_group))
                .or_default()
                .insert(place.place_slug());
        }

        let groups: BTreeSet<&String> = renderable
            .keys()
            .chain(generated.keys())
            .chain(listed_by_group.keys())
            .collect();
        let empty = BTreeSet::new();

        let mut report = DriftReport::default();
        for group in groups {
            let expected = renderable.get(group).unwrap_or(&empty);
            let actual = generated.get(group).unwrap_or(&empty);
            let wanted = listed_by_group.get(group).unwrap_or(&empty);
            let drift = GroupDrift {
                stale_artifacts: DriftList::new(difference(actual, expected), self.sample),
                listed_without_data: DriftList::new(difference(wanted, expected), self.sample),
                not_generated: DriftList::new(difference(expected, actual), self.sample),
            };
            if drift.stale_artifacts.count > 0 || drift.listed_without_data.count > 0 {
                warn!(
                    group = %group,
                    stale = drift.stale_artifacts.count,
                    listed_without_data = drift.listed_without_data.count,
                    "Place drift"
                );
            }
            report.groups.insert(group.clone(), drift);
        }

        let catalog_ids = self.catalog_ids()?;
        let generated_ids = list_dirs(&self.generated_dir.join(FACILITY_ARTIFACT_DIR))?;
        report.stale_facility_artifacts =
            DriftList::new(difference(&generated_ids, &catalog_ids), self.sample);
        report.facilities_not_generated =
            DriftList::new(difference(&catalog_ids, &generated_ids), self.sample);

        let last_seen_path = self.layout.last_seen_file();
        if last_seen_path.exists() {
            let seen: BTreeSet<String> = read_json(&last_seen_path)?;
            report.orphaned_facilities = DriftList::new(difference(&catalog_ids, &seen), self.sample);
        }

        info!(
            "Audit: {} groups, {} stale facility artifacts, {} orphaned facilities",
            report.groups.len(),
            report.stale_facility_artifacts.count,
            report.orphaned_facilities.count
        );
        Ok(report)
    }

    /// [`audit`](Self::audit) narrowed to one group. Facility findings keep
    /// only catalog facilities that appear in the group; generated artifacts
    /// with no catalog record cannot be attributed and are left out.
    pub fn audit_group(&self, listed: &[PlaceRef], group: &str) -> Result<DriftReport> {
        let wanted = slugify(group);
        let mut report = self.audit(listed)?;
        report.groups.retain(|name, _| *name == wanted);

        let catalog = CatalogMerger::new(self.layout.clone()).load_all()?;
        let in_group = |id: &str| {
            catalog.get(id).map_or(false, |f| {
                f.appears_in
                    .iter()
                    .any(|p| slugify(&p.place_group) == wanted)
            })
        };
        report.stale_facility_artifacts = DriftList::default();
        report.facilities_not_generated = report.facilities_not_generated.retain(&in_group, self.sample);
        report.orphaned_facilities = report.orphaned_facilities.retain(&in_group, self.sample);
        Ok(report)
    }

    /// Delete what `report` flagged as stale. Without `apply` this only logs.
    pub fn prune(&self, report: &DriftReport, apply: bool) -> Result<PruneOutcome> {
        let mut outcome = PruneOutcome {
            applied: apply,
            ..Default::default()
        };

        for (group, drift) in &report.groups {
            for slug in &drift.stale_artifacts.all {
                let path = self.generated_dir.join(group).join(slug);
                remove_path(&path, apply)?;
                outcome.place_artifacts += 1;
            }
        }
        for id in &report.stale_facility_artifacts.all {
            let path = self.generated_dir.join(FACILITY_ARTIFACT_DIR).join(id);
            remove_path(&path, apply)?;
            outcome.facility_artifacts += 1;
        }
        for id in &report.orphaned_facilities.all {
            remove_path(&self.layout.facility_file(id), apply)?;
            outcome.catalog_facilities += 1;
        }

        if apply {
            info!(
                "Pruned {} place artifacts, {} facility artifacts, {} catalog facilities",
                outcome.place_artifacts, outcome.facility_artifacts, outcome.catalog_facilities
            );
        } else {
            info!("Dry run: nothing deleted (pass --apply to prune)");
        }
        Ok(outcome)
    }

    /// group slug → place slugs with at least one coordinate-bearing facility
    fn renderable_places(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut places: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for group in list_dirs(&self.layout.places_dir())? {
            let dir = self.layout.places_dir().join(&group);
            for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
                let path = entry?.path();
                if path.extension().map_or(true, |e| e != "json") {
                    continue;
                }
                match read_json::<PlaceDocument>(&path) {
                    Ok(doc) if doc.is_renderable() => {
                        places.entry(group.clone()).or_default().insert(doc.slug);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable place document {}: {:#}", path.display(), e),
                }
            }
        }
        Ok(places)
    }

    /// group slug → generated place directories
    fn generated_places(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut places = BTreeMap::new();
        for group in list_dirs(&self.generated_dir)? {
            if group == FACILITY_ARTIFACT_DIR {
                continue;
            }
            let slugs = list_dirs(&self.generated_dir.join(&group))?;
            places.insert(group, slugs);
        }
        Ok(places)
    }

    fn catalog_ids(&self) -> Result<BTreeSet<String>> {
        let dir = self.layout.facilities_dir();
        if !dir.exists() {
            return Ok(BTreeSet::new());
        }
        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.insert(stem.to_string());
                }
            }
        }
        Ok(ids)
    }
}

fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.difference(b).cloned().collect()
}

/// Names of immediate subdirectories; a missing directory is empty
fn list_dirs(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.exists() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

fn remove_path(path: &Path, apply: bool) -> Result<()> {
    if !apply {
        info!("Would remove {}", path.display());
        return Ok(());
    }
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))?;
    info!("Removed {}", path.display());
    Ok(())
}
