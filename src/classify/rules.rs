//! Rule tables for the place-name quality gate.
//!
//! The tables are plain data: built-in defaults, optionally replaced field by
//! field from `rules.toml`, then compiled once into [`ClassifierRules`].

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::models::slugify;

const BLOCKED_TOKENS: &[&str] = &[
    "road", "rd", "street", "st", "highway", "hwy", "avenue", "ave", "blvd", "boulevard", "lane",
    "ln", "drive", "dr", "route", "rte", "fm", "cr", "pkwy", "parkway", "loop", "exit",
    "intersection", "junction", "landfill", "dump", "facility", "site", "station", "transfer",
    "recycling", "center", "mile", "miles", "mi", "of", "near", "county", "unit", "suite", "box",
    "n", "s", "e", "w", "ne", "nw", "se", "sw",
];

const DIRECTIONAL_TOKENS: &[&str] = &["n", "s", "e", "w", "ne", "nw", "se", "sw"];

const FRAGMENT_PATTERNS: &[&str] = &[
    r"\bmi(les?)?\s+(n|s|e|w|ne|nw|se|sw)\s+of\b",
    r"\b(north|south|east|west)\s+of\b",
    r"\badjacent\s+to\b",
    r"\b(corner|junction)\s+of\b",
    r"\bintersection\b",
    r"\bnear\b",
];

/// Places that are always real, even when their name trips a blocked token
const HARD_INCLUDE: &[&str] = &[
    "Houston",
    "Dallas",
    "San Antonio",
    "Austin",
    "Fort Worth",
    "El Paso",
    "Corpus Christi",
    "Lubbock",
    "Center",
    "Loop",
];

const ALIASES: &[(&str, &str)] = &[
    ("paso", "El Paso"),
    ("antonio", "San Antonio"),
    ("christi", "Corpus Christi"),
    ("worth", "Fort Worth"),
];

/// Serializable rule table; every field falls back to the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuleTable {
    pub blocked_tokens: Vec<String>,
    pub directional_tokens: Vec<String>,
    pub fragment_patterns: Vec<String>,
    pub hard_include: Vec<String>,
    /// Malformed token → canonical place name
    pub aliases: BTreeMap<String, String>,
    pub max_len: usize,
    pub max_tokens: usize,
}

impl Default for RuleTable {
    fn default() -> Self {
        let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            blocked_tokens: owned(BLOCKED_TOKENS),
            directional_tokens: owned(DIRECTIONAL_TOKENS),
            fragment_patterns: owned(FRAGMENT_PATTERNS),
            hard_include: owned(HARD_INCLUDE),
            aliases: ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            max_len: 40,
            max_tokens: 4,
        }
    }
}

impl RuleTable {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
        let table: RuleTable = toml::from_str(&content)
            .with_context(|| format!("Failed to parse rules file: {}", path.display()))?;
        info!(
            "Loaded classifier rules from {} ({} blocked tokens, {} aliases)",
            path.display(),
            table.blocked_tokens.len(),
            table.aliases.len()
        );
        Ok(table)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Compiled rules plus the trusted and known place sets, keyed by slug.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub(crate) blocked: HashSet<String>,
    pub(crate) directional: HashSet<String>,
    pub(crate) fragments: Vec<Regex>,
    /// slug → display name; accepted unconditionally
    pub(crate) trusted: BTreeMap<String, String>,
    /// slug → canonical display name
    pub(crate) aliases: BTreeMap<String, String>,
    /// slug → display name of places already in the catalog
    pub(crate) known: BTreeMap<String, String>,
    pub(crate) max_len: usize,
    pub(crate) max_tokens: usize,
}

impl ClassifierRules {
    pub fn compile(table: &RuleTable) -> Result<Self> {
        let lower = |list: &[String]| list.iter().map(|s| s.trim().to_lowercase()).collect();
        let fragments = table
            .fragment_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p))
                    .with_context(|| format!("Invalid fragment pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rules = Self {
            blocked: lower(&table.blocked_tokens),
            directional: lower(&table.directional_tokens),
            fragments,
            trusted: BTreeMap::new(),
            aliases: table
                .aliases
                .iter()
                .map(|(k, v)| (slugify(k), v.trim().to_string()))
                .collect(),
            known: BTreeMap::new(),
            max_len: table.max_len,
            max_tokens: table.max_tokens,
        };
        rules.trust(table.hard_include.iter().map(String::as_str));
        Ok(rules)
    }

    /// Add seed-list and curated place names to the trusted set
    pub fn trust<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            let slug = slugify(name);
            if !slug.is_empty() {
                self.trusted
                    .entry(slug)
                    .or_insert_with(|| name.trim().to_string());
            }
        }
    }

    /// Add places already present in the catalog as salvage targets
    pub fn know<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            let slug = slugify(name);
            if !slug.is_empty() {
                self.known
                    .entry(slug)
                    .or_insert_with(|| name.trim().to_string());
            }
        }
    }

    pub fn is_blocked(&self, token: &str) -> bool {
        self.blocked.contains(&token.to_lowercase())
    }

    pub fn is_directional(&self, token: &str) -> bool {
        self.directional
            .contains(&token.trim_end_matches('.').to_lowercase())
    }

    pub fn matches_fragment(&self, text: &str) -> bool {
        self.fragments.iter().any(|re| re.is_match(text))
    }

    /// Canonical name when `slug` is trusted directly or through an alias
    pub fn trusted_name(&self, slug: &str) -> Option<&str> {
        self.trusted
            .get(slug)
            .or_else(|| self.aliases.get(slug))
            .map(String::as_str)
    }

    pub fn known_name(&self, slug: &str) -> Option<&str> {
        self.known.get(slug).map(String::as_str)
    }

    pub fn trusted_count(&self) -> usize {
        self.trusted.len()
    }
}
