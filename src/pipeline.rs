//! One parameterized rebuild shared by both source modes.
//!
//! sources → normalize → validate coordinates → assign place → resolve
//! identity → merge catalog → neighbor graph → quality report.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::catalog::{place_documents, CatalogLayout, CatalogLock, CatalogMerger, MergeStats};
use crate::classify::{Acceptance, ClassifierRules, PlaceClassifier, RuleTable, Verdict};
use crate::config::{Config, GroupConfig, SourceKind, SourceMode};
use crate::error::FatalError;
use crate::geocode::{AreaFeatureSource, ReverseGeocodeCache, ReverseGeocoder};
use crate::identity::IdentityResolver;
use crate::models::{slugify, CanonicalFacility, NormalizedRecord, PlaceRef};
use crate::normalize::{normalize, validate_coords, FieldSynonyms, RawRecord};
use crate::report::QualityReport;
use crate::sources::{annotate_with_ids, read_override, read_seed_list, read_source, source_files};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only this place group
    pub group: Option<String>,
    pub mode: SourceMode,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub merge: MergeStats,
    pub facilities: usize,
    pub places: usize,
    pub report: QualityReport,
}

/// Records gathered across all groups before identity resolution
#[derive(Default)]
struct Collected {
    records: Vec<(NormalizedRecord, Option<PlaceRef>)>,
    /// `(override file index, entry index)` for curated records
    origins: Vec<Option<(usize, usize)>>,
    override_files: Vec<PathBuf>,
}

impl Collected {
    fn push(
        &mut self,
        record: NormalizedRecord,
        place: Option<PlaceRef>,
        origin: Option<(usize, usize)>,
    ) {
        self.records.push((record, place));
        self.origins.push(origin);
    }
}

/// Unplaced record awaiting place assignment
struct Pending {
    record: NormalizedRecord,
    origin: Option<(usize, usize)>,
}

/// The rebuild pipeline. `services` is `None` when running offline; cached
/// reverse-geocode answers are still used then.
pub struct Pipeline<S> {
    config: Config,
    layout: CatalogLayout,
    base_rules: ClassifierRules,
    services: Option<S>,
    cache: ReverseGeocodeCache,
    report: QualityReport,
}

impl<S: ReverseGeocoder + AreaFeatureSource> Pipeline<S> {
    pub fn new(config: Config, services: Option<S>) -> Result<Self> {
        let layout = CatalogLayout::new(&config.global.data_dir);
        if !layout.data_dir.is_dir() {
            return Err(FatalError::MissingDataDir(layout.data_dir.clone()).into());
        }

        let table = RuleTable::load_or_default(layout.rules_file())?;
        let base_rules = ClassifierRules::compile(&table)?;
        let cache = ReverseGeocodeCache::load(layout.geocode_cache_file());

        Ok(Self {
            config,
            layout,
            base_rules,
            services,
            cache,
            report: QualityReport::default(),
        })
    }

    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    pub async fn run(&mut self, options: &RunOptions) -> Result<RunSummary> {
        let _lock = CatalogLock::acquire(&self.layout)?;
        self.report = QualityReport::default();

        let config = self.config.clone();
        let groups = config.selected_groups(options.group.as_deref())?;
        let seeds = self.load_seeds()?;
        let merger = CatalogMerger::new(self.layout.clone());
        let existing = merger.load_all()?;

        let mut collected = Collected::default();
        for group in groups {
            self.collect_group(group, seeds.as_deref(), &existing, options.mode, &mut collected)
                .await?;
        }

        let mut resolver = IdentityResolver::new();
        let ids = resolver.observe_batch(&collected.records);
        self.annotate_overrides(&collected, &ids);

        let (merge, catalog) = merger.merge(resolver.facilities())?;
        let seen: BTreeSet<String> = resolver.facilities().keys().cloned().collect();
        let complete = options.group.is_none() && self.report.is_complete();
        merger.write_last_seen(&seen, complete, &catalog)?;

        let documents = place_documents(&catalog);
        merger.write_neighbors(&documents, config.global.neighbors_k)?;

        self.report.skipped_records += resolver.skipped();
        self.report.collisions = resolver.collisions().to_vec();
        self.report.collisions.extend(merge.collisions.iter().cloned());
        self.report.write(&self.layout.quality_report_file())?;

        self.cache.save()?;
        let stats = self.cache.stats();
        info!(
            "Reverse geocode cache: {} entries, {} hits, {} misses, {} failures",
            self.cache.len(),
            stats.hits,
            stats.misses,
            stats.failures
        );

        Ok(RunSummary {
            merge,
            facilities: catalog.len(),
            places: documents.len(),
            report: self.report.clone(),
        })
    }

    /// `None` when the seed list does not exist
    fn load_seeds(&self) -> Result<Option<Vec<PlaceRef>>> {
        let path = self.layout.seeds_file();
        if !path.exists() {
            warn!("No seed list at {}", path.display());
            return Ok(None);
        }
        let seeds = read_seed_list(&path)?;
        info!("Loaded {} seed places", seeds.len());
        Ok(Some(seeds))
    }

    async fn collect_group(
        &mut self,
        group: &GroupConfig,
        seeds: Option<&[PlaceRef]>,
        existing: &BTreeMap<String, CanonicalFacility>,
        mode: SourceMode,
        collected: &mut Collected,
    ) -> Result<()> {
        let group_slug = slugify(&group.name);
        info!(group = %group.name, "Processing group");

        let group_seeds: Vec<&PlaceRef> = seeds
            .unwrap_or_default()
            .iter()
            .filter(|p| slugify(&p.place_group) == group_slug)
            .collect();

        let override_dir = self.layout.overrides_dir().join(&group_slug);
        let override_paths = if override_dir.is_dir() {
            source_files(SourceKind::Json, &override_dir)
        } else {
            Vec::new()
        };
        if seeds.is_none() && override_paths.is_empty() {
            let seeds_file = self.layout.seeds_file();
            return Err(FatalError::MissingSeedList(seeds_file, group.name.clone()).into());
        }

        let mut documents = Vec::new();
        for path in override_paths {
            match read_override(&path) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    warn!(group = %group.name, "Skipping override: {}", e);
                    self.report.group_mut(&group.name).skip_file(&path, e.reason());
                }
            }
        }

        let mut rules = self.base_rules.clone();
        rules.trust(group_seeds.iter().map(|p| p.place.as_str()));
        rules.trust(documents.iter().map(|d| d.place.as_str()));
        let catalog_places: BTreeSet<&str> = existing
            .values()
            .flat_map(|f| f.appears_in.iter())
            .filter(|p| slugify(&p.place_group) == group_slug)
            .map(|p| p.place.as_str())
            .collect();
        rules.know(catalog_places);
        let mut classifier = PlaceClassifier::new(rules);

        let mut pending = Vec::new();
        let defaults = FieldSynonyms::default();

        for doc in documents {
            let file_index = collected.override_files.len();
            collected.override_files.push(doc.path.clone());
            for (entry, raw) in &doc.entries {
                self.normalize_into(group, raw, &defaults, Some((file_index, *entry)), &mut pending);
            }
        }

        for source in &group.sources {
            let batch = read_source(&group.name, source, &self.layout.data_dir)?;
            for skipped in &batch.skipped {
                self.report
                    .group_mut(&group.name)
                    .skip_file(&skipped.path, skipped.error.reason());
            }
            let synonyms = FieldSynonyms::with_overrides(&source.fields);
            for raw in &batch.records {
                self.normalize_into(group, raw, &synonyms, None, &mut pending);
            }
        }

        if mode == SourceMode::MapExtract {
            let region = group.label.as_deref().unwrap_or(&group.name);
            let mut fetched = Vec::new();
            match self.services.as_mut() {
                Some(services) => {
                    for place in &group_seeds {
                        match services.features_near(place, region).await {
                            Ok(records) => fetched.extend(records),
                            Err(e) => {
                                error!(group = %group.name, place = %place.place, "Map lookup failed: {:#}", e);
                                self.report
                                    .group_mut(&group.name)
                                    .external_failures
                                    .insert(place.place.clone());
                            }
                        }
                    }
                }
                None => warn!(group = %group.name, "Offline; skipping map extract"),
            }
            for raw in &fetched {
                self.normalize_into(group, raw, &defaults, None, &mut pending);
            }
        }

        // Labels accepted as written become salvage targets for the whole batch
        let written: BTreeSet<String> = pending
            .iter()
            .flat_map(|item| labels(&item.record))
            .filter_map(|label| classifier.classify_direct(label))
            .map(|acceptance| acceptance.name)
            .collect();
        know_places(&mut classifier, &written);

        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                )
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        let mut answers = Vec::with_capacity(pending.len());
        for item in &pending {
            pb.inc(1);
            let labelled = labels(&item.record).any(|label| classifier.classify(label).accepted().is_some());
            let answer = if labelled {
                None
            } else {
                self.reverse_geocode(&item.record).await
            };
            answers.push(answer);
        }
        pb.finish_with_message("Places resolved");

        let geocoded: BTreeSet<String> = answers
            .iter()
            .flatten()
            .filter_map(|name| classifier.classify(name).accepted().map(|a| a.name.clone()))
            .collect();
        know_places(&mut classifier, &geocoded);

        for (item, answer) in pending.into_iter().zip(answers) {
            let place = self.assign_place(&classifier, group, &item.record, answer.as_deref());
            collected.push(item.record, place, item.origin);
        }

        let quality = self.report.group_mut(&group.name);
        info!(
            group = %group.name,
            "{} places accepted, {} labels rejected, {} records without a place",
            quality.accepted,
            quality.rejected,
            quality.unplaced_records
        );
        Ok(())
    }

    /// Normalize, validate coordinates and queue; unidentifiable records are tallied
    fn normalize_into(
        &mut self,
        group: &GroupConfig,
        raw: &RawRecord,
        synonyms: &FieldSynonyms,
        origin: Option<(usize, usize)>,
        pending: &mut Vec<Pending>,
    ) {
        let Some(mut record) = normalize(raw, synonyms) else {
            self.report.group_mut(&group.name).skip_record();
            return;
        };
        let point = validate_coords(record.lat, record.lng);
        record.lat = point.map(|p| p.lat);
        record.lng = point.map(|p| p.lng);
        if record.is_unidentifiable() {
            self.report.group_mut(&group.name).skip_record();
            return;
        }
        pending.push(Pending { record, origin });
    }

    /// Place hint, then the city field, then the reverse-geocode answer.
    fn assign_place(
        &mut self,
        classifier: &PlaceClassifier,
        group: &GroupConfig,
        record: &NormalizedRecord,
        answer: Option<&str>,
    ) -> Option<PlaceRef> {
        for label in labels(record).chain(answer) {
            match classifier.classify(label) {
                Verdict::Accepted(acceptance) => {
                    return Some(self.accept(classifier, group, &acceptance));
                }
                Verdict::Rejected(reason) => {
                    self.report.group_mut(&group.name).reject(label, reason);
                }
            }
        }

        self.report.group_mut(&group.name).unplaced_records += 1;
        None
    }

    /// Cached answer when offline or disabled, otherwise a live lookup
    async fn reverse_geocode(&mut self, record: &NormalizedRecord) -> Option<String> {
        let point = record.point()?;
        match (self.config.global.reverse_geocode, self.services.as_mut()) {
            (true, Some(services)) => self.cache.resolve(services, point.lat, point.lng).await,
            _ => self
                .cache
                .get(point.lat, point.lng)
                .flatten()
                .map(str::to_string),
        }
    }

    /// Collapse onto the canonical slug and its one display name. Every
    /// accepted slug is trusted or known by now, so spellings never split a place.
    fn accept(
        &mut self,
        classifier: &PlaceClassifier,
        group: &GroupConfig,
        acceptance: &Acceptance,
    ) -> PlaceRef {
        let canonical = classifier.canonical_slug(&acceptance.slug);
        let rules = classifier.rules();
        let name = rules
            .trusted_name(&canonical)
            .or_else(|| rules.known_name(&canonical))
            .unwrap_or(&acceptance.name)
            .to_string();
        self.report.group_mut(&group.name).accept(&name);
        PlaceRef::new(&group.name, &name)
    }

    /// Write resolved IDs back into the curated override files
    fn annotate_overrides(&self, collected: &Collected, ids: &[Option<String>]) {
        let mut by_file: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
        for (origin, id) in collected.origins.iter().zip(ids) {
            if let (Some((file, entry)), Some(id)) = (origin, id) {
                by_file.entry(*file).or_default().insert(*entry, id.clone());
            }
        }
        for (file, entries) in by_file {
            let path = &collected.override_files[file];
            match annotate_with_ids(path, &entries) {
                Ok(true) => info!("Annotated {} with facility IDs", path.display()),
                Ok(false) => {}
                Err(e) => warn!("Failed to annotate {}: {:#}", path.display(), e),
            }
        }
    }
}

/// Make accepted names salvage targets, fewest tokens first. Names that
/// collapse onto a known suffix stay unknown so they keep collapsing.
fn know_places(classifier: &mut PlaceClassifier, names: &BTreeSet<String>) {
    let mut names: Vec<&String> = names.iter().collect();
    names.sort_by_key(|name| slugify(name).split('-').count());
    for name in names {
        let slug = slugify(name);
        if classifier.canonical_slug(&slug) == slug {
            classifier.rules_mut().know([name.as_str()]);
        }
    }
}

fn labels(record: &NormalizedRecord) -> impl Iterator<Item = &str> {
    [record.place_hint.as_deref(), record.city.as_deref()]
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use crate::models::FacilityType;
    use anyhow::bail;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    /// Answers from a fixed table; fails for anything else
    #[derive(Default)]
    struct FakeServices {
        places: BTreeMap<String, String>,
        features: BTreeMap<String, Vec<RawRecord>>,
        calls: usize,
    }

    impl ReverseGeocoder for FakeServices {
        async fn reverse(&mut self, lat: f64, lng: f64) -> Result<Option<String>> {
            self.calls += 1;
            Ok(self.places.get(&ReverseGeocodeCache::key(lat, lng)).cloned())
        }
    }

    impl AreaFeatureSource for FakeServices {
        async fn features_near(&mut self, place: &PlaceRef, _region: &str) -> Result<Vec<RawRecord>> {
            self.calls += 1;
            match self.features.get(&place.place) {
                Some(records) => Ok(records
                    .iter()
                    .cloned()
                    .map(|r| r.with_place_hint(Some(place.place.as_str())))
                    .collect()),
                None => bail!("service unavailable"),
            }
        }
    }

    fn config(data_dir: &Path, sources: Vec<crate::config::SourceConfig>) -> Config {
        let toml = format!(
            "[global]\ndata_dir = {:?}\nmin_request_delay_ms = 0\n[[groups]]\nname = \"texas\"\nlabel = \"Texas\"\n",
            data_dir.display().to_string()
        );
        let mut config: Config = toml::from_str(&toml).unwrap();
        config.groups[0].sources = sources;
        config
    }

    fn write(path: &Path, value: &serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn seed(data: &Path) {
        write(
            &data.join("seeds/places.json"),
            &json!([
                {"place_group": "texas", "place": "Waco"},
                {"place_group": "texas", "place": "Brownwood"}
            ]),
        );
    }

    #[tokio::test]
    async fn test_missing_data_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = Pipeline::<FakeServices>::new(config(&dir.path().join("nope"), vec![]), None);
        let err = result.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::MissingDataDir(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_seed_list_without_overrides_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::<FakeServices>::new(config(dir.path(), vec![]), None).unwrap();
        let err = pipeline.run(&RunOptions::default()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::MissingSeedList(..))
        ));
    }

    #[tokio::test]
    async fn test_overrides_and_city_field() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        write(
            &data.join("overrides/texas/waco.json"),
            &json!({"facilities": [
                {"name": "Waco City Landfill", "type": "MSW landfill", "lat": 31.55, "lng": -97.15},
                {"note": "no identifiers at all"}
            ]}),
        );
        write(
            &data.join("sources/extract.json"),
            &json!([
                {"name": "Brownwood Transfer", "city": "S Brownwood", "lat": 31.7, "lng": -98.99},
                {"name": "Roadside Drop", "city": "Main St", "lat": 0, "lng": 0}
            ]),
        );
        let source = crate::config::SourceConfig {
            id: "extract".to_string(),
            kind: SourceKind::Json,
            path: PathBuf::from("sources/extract.json"),
            fields: Default::default(),
        };

        let mut pipeline = Pipeline::<FakeServices>::new(config(data, vec![source]), None).unwrap();
        let summary = pipeline.run(&RunOptions::default()).await.unwrap();

        assert_eq!(summary.facilities, 3);
        let texas = &summary.report.groups["texas"];
        assert!(texas.places.contains("Waco"));
        assert!(texas.places.contains("Brownwood"));
        assert_eq!(texas.skipped_records, 1);
        assert_eq!(texas.unplaced_records, 1);
        assert!(texas.rejected_labels.contains_key("Main St"));

        let merger = CatalogMerger::new(pipeline.layout().clone());
        let catalog = merger.load_all().unwrap();
        let waco = catalog.values().find(|f| f.name == "Waco City Landfill").unwrap();
        assert!(waco.id.starts_with("m_"));
        assert_eq!(waco.facility_type, FacilityType::Landfill);
        let roadside = catalog.values().find(|f| f.name == "Roadside Drop").unwrap();
        assert_eq!(roadside.point(), None);
        assert!(roadside.appears_in.is_empty());

        let annotated: serde_json::Value =
            crate::catalog::store::read_json(&data.join("overrides/texas/waco.json")).unwrap();
        assert_eq!(annotated["facilities"][0]["facility_id"], waco.id.as_str());
    }

    #[tokio::test]
    async fn test_reverse_geocode_fallback_and_map_extract() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        write(
            &data.join("sources/extract.json"),
            &json!([{"name": "Hill County Landfill", "lat": 32.0, "lng": -97.5}]),
        );
        let source = crate::config::SourceConfig {
            id: "extract".to_string(),
            kind: SourceKind::Json,
            path: PathBuf::from("sources/extract.json"),
            fields: Default::default(),
        };

        let mut raw = RawRecord::new("osm");
        raw.insert("name", json!("County Recycling"));
        raw.insert("amenity", json!("recycling"));
        raw.insert("lat", json!(31.5));
        raw.insert("lon", json!(-97.1));

        let mut services = FakeServices::default();
        services.features.insert("Waco".to_string(), vec![raw]);
        services.features.insert("Brownwood".to_string(), Vec::new());
        services
            .places
            .insert(ReverseGeocodeCache::key(32.0, -97.5), "Hillsboro".to_string());

        let mut pipeline = Pipeline::new(config(data, vec![source]), Some(services)).unwrap();
        let options = RunOptions {
            group: None,
            mode: SourceMode::MapExtract,
        };
        let summary = pipeline.run(&options).await.unwrap();

        assert_eq!(summary.facilities, 2);
        let texas = &summary.report.groups["texas"];
        assert!(texas.places.contains("Waco"));
        assert!(texas.places.contains("Hillsboro"));
        assert!(texas.external_failures.is_empty());

        let cache = ReverseGeocodeCache::load(pipeline.layout().geocode_cache_file());
        assert_eq!(cache.get(32.0, -97.5), Some(Some("Hillsboro")));
        assert!(pipeline.layout().neighbors_file().exists());
        assert!(pipeline.layout().last_seen_file().exists());
    }

    #[tokio::test]
    async fn test_external_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let mut services = FakeServices::default();
        let mut raw = RawRecord::new("osm");
        raw.insert("name", json!("Waco Transfer"));
        raw.insert("lat", json!(31.5));
        raw.insert("lon", json!(-97.1));
        services.features.insert("Waco".to_string(), vec![raw]);

        let mut pipeline = Pipeline::new(config(data, vec![]), Some(services)).unwrap();
        let options = RunOptions {
            group: None,
            mode: SourceMode::MapExtract,
        };
        let summary = pipeline.run(&options).await.unwrap();

        let texas = &summary.report.groups["texas"];
        assert!(texas.external_failures.contains("Brownwood"));
        assert_eq!(summary.facilities, 1);
    }

    #[tokio::test]
    async fn test_offline_uses_cached_answers() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let mut cached = BTreeMap::new();
        cached.insert(ReverseGeocodeCache::key(31.5, -97.1), "Waco".to_string());
        write(&data.join("cache/reverse_geocode.json"), &json!(cached));
        write(
            &data.join("sources/extract.json"),
            &json!([{"name": "Somewhere Landfill", "lat": 31.5, "lng": -97.1}]),
        );
        let source = crate::config::SourceConfig {
            id: "extract".to_string(),
            kind: SourceKind::Json,
            path: PathBuf::from("sources/extract.json"),
            fields: Default::default(),
        };

        let mut pipeline = Pipeline::<FakeServices>::new(config(data, vec![source]), None).unwrap();
        let summary = pipeline.run(&RunOptions::default()).await.unwrap();
        assert!(summary.report.groups["texas"].places.contains("Waco"));
        assert_eq!(summary.places, 1);
    }

    fn json_source(data: &Path, records: serde_json::Value) -> crate::config::SourceConfig {
        write(&data.join("sources/extract.json"), &records);
        crate::config::SourceConfig {
            id: "extract".to_string(),
            kind: SourceKind::Json,
            path: PathBuf::from("sources/extract.json"),
            fields: Default::default(),
        }
    }

    fn catalog_snapshot(data: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        walkdir::WalkDir::new(data.join("catalog"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), fs::read(e.path()).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_salvage_target_from_same_batch_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let source = json_source(
            data,
            json!([
                {"name": "Dalhart Landfill", "city": "Dalhart", "lat": 36.06, "lng": -102.52},
                {"name": "XIT Transfer", "city": "Mi NW Of Dalhart Dalhart", "lat": 36.1, "lng": -102.6}
            ]),
        );

        let mut pipeline = Pipeline::<FakeServices>::new(config(data, vec![source]), None).unwrap();
        let first = pipeline.run(&RunOptions::default()).await.unwrap();
        let texas = &first.report.groups["texas"];
        assert_eq!(texas.unplaced_records, 0);
        assert!(texas.rejected_labels.is_empty());

        let catalog = CatalogMerger::new(pipeline.layout().clone()).load_all().unwrap();
        let xit = catalog.values().find(|f| f.name == "XIT Transfer").unwrap();
        assert!(xit.appears_in.contains(&PlaceRef::new("texas", "Dalhart")));

        let before = catalog_snapshot(data);
        pipeline.run(&RunOptions::default()).await.unwrap();
        assert_eq!(before, catalog_snapshot(data));
    }

    #[tokio::test]
    async fn test_case_variant_labels_share_one_place() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let source = json_source(
            data,
            json!([
                {"name": "McAllen Landfill", "city": "McAllen", "lat": 26.2, "lng": -98.23},
                {"name": "Valley Transfer", "city": "MCALLEN", "lat": 26.25, "lng": -98.2}
            ]),
        );

        let mut pipeline = Pipeline::<FakeServices>::new(config(data, vec![source]), None).unwrap();
        let summary = pipeline.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.places, 1);
        assert_eq!(summary.report.groups["texas"].accepted, 1);

        let doc: crate::models::PlaceDocument = crate::catalog::store::read_json(
            &pipeline
                .layout()
                .place_file(&PlaceRef::new("texas", "McAllen")),
        )
        .unwrap();
        assert_eq!(doc.place, "McAllen");
        assert_eq!(doc.facilities.len(), 2);
    }

    #[tokio::test]
    async fn test_group_run_facilities_survive_prune() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let old = json!({"name": "Old Landfill", "city": "Waco", "lat": 31.55, "lng": -97.15});
        let new = json!({"name": "New Transfer", "city": "Waco", "lat": 31.6, "lng": -97.2});

        let source = json_source(data, json!([old.clone()]));
        let mut pipeline = Pipeline::<FakeServices>::new(config(data, vec![source]), None).unwrap();
        pipeline.run(&RunOptions::default()).await.unwrap();

        json_source(data, json!([old, new.clone()]));
        let restricted = RunOptions {
            group: Some("texas".to_string()),
            mode: SourceMode::Government,
        };
        pipeline.run(&restricted).await.unwrap();

        let layout = pipeline.layout().clone();
        let auditor = crate::drift::DriftAuditor::new(layout.clone(), data.join("site"), 10);
        let report = auditor.audit(&[]).unwrap();
        assert_eq!(report.orphaned_facilities.count, 0);
        let outcome = auditor.prune(&report, true).unwrap();
        assert_eq!(outcome.catalog_facilities, 0);
        assert_eq!(CatalogMerger::new(layout.clone()).load_all().unwrap().len(), 2);

        // A complete run is what confirms absence
        json_source(data, json!([new]));
        pipeline.run(&RunOptions::default()).await.unwrap();
        let report = auditor.audit(&[]).unwrap();
        assert_eq!(report.orphaned_facilities.count, 1);
        let catalog = CatalogMerger::new(layout).load_all().unwrap();
        assert_eq!(
            catalog[&report.orphaned_facilities.sample[0]].name,
            "Old Landfill"
        );
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_orphan_facilities() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path();
        seed(data);
        let mut raw = RawRecord::new("osm");
        raw.insert("name", json!("Brownwood Recycling"));
        raw.insert("amenity", json!("recycling"));
        raw.insert("lat", json!(31.7));
        raw.insert("lon", json!(-98.99));
        let mut services = FakeServices::default();
        services.features.insert("Waco".to_string(), Vec::new());
        services.features.insert("Brownwood".to_string(), vec![raw]);

        let options = RunOptions {
            group: None,
            mode: SourceMode::MapExtract,
        };
        let mut pipeline = Pipeline::new(config(data, vec![]), Some(services)).unwrap();
        pipeline.run(&options).await.unwrap();

        // Brownwood's lookup now fails; its facility must not be treated as gone
        let mut failing = FakeServices::default();
        failing.features.insert("Waco".to_string(), Vec::new());
        let mut pipeline = Pipeline::new(config(data, vec![]), Some(failing)).unwrap();
        let summary = pipeline.run(&options).await.unwrap();
        assert!(!summary.report.is_complete());

        let auditor =
            crate::drift::DriftAuditor::new(pipeline.layout().clone(), data.join("site"), 10);
        assert_eq!(auditor.audit(&[]).unwrap().orphaned_facilities.count, 0);
    }

    #[test]
    fn test_global_defaults() {
        let global: GlobalConfig = toml::from_str("data_dir = \"d\"").unwrap();
        assert!(global.reverse_geocode);
        assert_eq!(global.mode, SourceMode::Government);
    }
}
