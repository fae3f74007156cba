//! Memoized reverse geocoding, persisted between runs.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::nominatim::ReverseGeocoder;
use crate::catalog::store::{read_json, write_json};

/// Cache lookups and outcomes for the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub failures: usize,
}

/// Coordinate bucket (4 decimals, ~11 m) → resolved place, or `""` when the
/// service found nothing. Negative answers are cached; failures are not.
#[derive(Debug)]
pub struct ReverseGeocodeCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
    stats: CacheStats,
}

impl ReverseGeocodeCache {
    /// Load the cache file; a missing or unreadable file starts an empty cache.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            match read_json::<BTreeMap<String, String>>(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring unreadable geocode cache {}: {:#}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        info!("Reverse-geocode cache: {} entries", entries.len());
        Self {
            path,
            entries,
            dirty: false,
            stats: CacheStats::default(),
        }
    }

    pub fn key(lat: f64, lng: f64) -> String {
        format!("{:.4},{:.4}", lat, lng)
    }

    /// `Some(None)` is a cached negative result
    pub fn get(&self, lat: f64, lng: f64) -> Option<Option<&str>> {
        self.entries
            .get(&Self::key(lat, lng))
            .map(|place| (!place.is_empty()).then_some(place.as_str()))
    }

    /// Resolve from cache, or make exactly one external call on a miss.
    pub async fn resolve<G: ReverseGeocoder>(
        &mut self,
        geocoder: &mut G,
        lat: f64,
        lng: f64,
    ) -> Option<String> {
        if let Some(cached) = self.get(lat, lng).map(|place| place.map(str::to_string)) {
            self.stats.hits += 1;
            return cached;
        }

        self.stats.misses += 1;
        match geocoder.reverse(lat, lng).await {
            Ok(place) => {
                debug!("Reverse geocoded ({}, {}) -> {:?}", lat, lng, place);
                self.entries
                    .insert(Self::key(lat, lng), place.clone().unwrap_or_default());
                self.dirty = true;
                place
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!("Reverse geocode failed for ({}, {}): {:#}", lat, lng, e);
                None
            }
        }
    }

    /// Write the cache back if anything was added
    pub fn save(&mut self) -> Result<()> {
        if self.dirty {
            write_json(&self.path, &self.entries)?;
            self.dirty = false;
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// Answers from a fixed script and counts calls
    struct ScriptedGeocoder {
        answers: Vec<Result<Option<String>>>,
        calls: usize,
    }

    impl ReverseGeocoder for ScriptedGeocoder {
        async fn reverse(&mut self, _lat: f64, _lng: f64) -> Result<Option<String>> {
            self.calls += 1;
            if self.answers.is_empty() {
                bail!("no scripted answer");
            }
            self.answers.remove(0)
        }
    }

    #[tokio::test]
    async fn test_hit_short_circuits_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ReverseGeocodeCache::load(dir.path().join("cache.json"));
        let mut geocoder = ScriptedGeocoder {
            answers: vec![Ok(Some("Dalhart".to_string()))],
            calls: 0,
        };

        let first = cache.resolve(&mut geocoder, 36.06012, -102.51234).await;
        // same 4-decimal bucket
        let second = cache.resolve(&mut geocoder, 36.06009, -102.51231).await;

        assert_eq!(first.as_deref(), Some("Dalhart"));
        assert_eq!(second.as_deref(), Some("Dalhart"));
        assert_eq!(geocoder.calls, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_negative_result_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ReverseGeocodeCache::load(dir.path().join("cache.json"));
        let mut geocoder = ScriptedGeocoder {
            answers: vec![Ok(None)],
            calls: 0,
        };

        assert_eq!(cache.resolve(&mut geocoder, 31.0, -100.0).await, None);
        assert_eq!(cache.resolve(&mut geocoder, 31.0, -100.0).await, None);
        assert_eq!(geocoder.calls, 1);
        assert_eq!(cache.get(31.0, -100.0), Some(None));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ReverseGeocodeCache::load(dir.path().join("cache.json"));
        let mut geocoder = ScriptedGeocoder {
            answers: vec![Err(anyhow::anyhow!("503")), Ok(Some("Pecos".to_string()))],
            calls: 0,
        };

        assert_eq!(cache.resolve(&mut geocoder, 31.4, -103.5).await, None);
        assert_eq!(cache.get(31.4, -103.5), None);
        assert_eq!(
            cache.resolve(&mut geocoder, 31.4, -103.5).await.as_deref(),
            Some("Pecos")
        );
        assert_eq!(geocoder.calls, 2);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_persisted_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("reverse_geocode.json");
        {
            let mut cache = ReverseGeocodeCache::load(&path);
            let mut geocoder = ScriptedGeocoder {
                answers: vec![Ok(Some("Dalhart".to_string())), Ok(None)],
                calls: 0,
            };
            cache.resolve(&mut geocoder, 36.06, -102.51).await;
            cache.resolve(&mut geocoder, 35.0, -101.0).await;
            cache.save().unwrap();
        }

        let cache = ReverseGeocodeCache::load(&path);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(36.06, -102.51), Some(Some("Dalhart")));
        assert_eq!(cache.get(35.0, -101.0), Some(None));
    }
}
