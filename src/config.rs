//! TOML run configuration: global settings plus one table per place group.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FatalError;
use crate::geocode::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Which sources feed a run
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Configured government exports and curated overrides
    #[default]
    Government,
    /// Additionally query map data around every seeded place
    MapExtract,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_neighbors_k")]
    pub neighbors_k: usize,
    #[serde(default = "default_true")]
    pub reverse_geocode: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
    #[serde(default = "default_overpass_url")]
    pub overpass_url: String,
    #[serde(default = "default_min_request_delay_ms")]
    pub min_request_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupConfig {
    /// Place-group slug, e.g. `texas`
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub abbr: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Csv,
    Json,
    Pbf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// A file, or a directory whose matching files are all read
    pub path: PathBuf,
    /// Canonical field → source column
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from("site")
}

fn default_neighbors_k() -> usize {
    crate::neighbors::DEFAULT_NEIGHBORS
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("wastemap/{}", env!("CARGO_PKG_VERSION"))
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_overpass_url() -> String {
    "https://overpass-api.de/api/interpreter".to_string()
}

fn default_min_request_delay_ms() -> u64 {
    1100
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    2500
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FatalError> {
        if self.global.neighbors_k == 0 {
            return Err(FatalError::InvalidConfig("neighbors_k must be at least 1".into()));
        }
        if self.global.max_attempts == 0 {
            return Err(FatalError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(FatalError::InvalidConfig("group with an empty name".into()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(FatalError::InvalidConfig(format!(
                    "group {} is defined twice",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Groups to process: all of them, or only `name`
    pub fn selected_groups(&self, name: Option<&str>) -> Result<Vec<&GroupConfig>, FatalError> {
        match name {
            None => Ok(self.groups.iter().collect()),
            Some(name) => self
                .groups
                .iter()
                .find(|g| g.name == name)
                .map(|g| vec![g])
                .ok_or_else(|| FatalError::InvalidConfig(format!("unknown group {}", name))),
        }
    }
}

impl GlobalConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            min_delay: Duration::from_millis(self.min_request_delay_ms),
        }
    }
}

impl SourceConfig {
    /// Source path, resolved against the data directory when relative
    pub fn resolve_path(&self, data_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            data_dir.join(&self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[global]
data_dir = "data"
mode = "map_extract"

[[groups]]
name = "texas"
label = "Texas"
abbr = "TX"

[[groups.sources]]
id = "tceq"
kind = "csv"
path = "sources/tx/msw_permits.csv"
[groups.sources.fields]
name = "site_name"

[[groups]]
name = "oklahoma"
"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.global.mode, SourceMode::MapExtract);
        assert_eq!(config.global.neighbors_k, 10);
        assert_eq!(config.global.generated_dir, PathBuf::from("site"));
        assert_eq!(config.groups.len(), 2);

        let source = &config.groups[0].sources[0];
        assert_eq!(source.kind, SourceKind::Csv);
        assert_eq!(source.fields.get("name").map(String::as_str), Some("site_name"));
        assert_eq!(
            source.resolve_path(Path::new("/srv/data")),
            PathBuf::from("/srv/data/sources/tx/msw_permits.csv")
        );

        let policy = config.global.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.min_delay, Duration::from_millis(1100));
    }

    #[test]
    fn test_group_selection() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.selected_groups(None).unwrap().len(), 2);
        assert_eq!(config.selected_groups(Some("oklahoma")).unwrap()[0].name, "oklahoma");
        assert!(matches!(
            config.selected_groups(Some("utah")),
            Err(FatalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let text = "[global]\ndata_dir = \"d\"\n[[groups]]\nname = \"a\"\n[[groups]]\nname = \"a\"\n";
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.validate().is_err());
    }
}
