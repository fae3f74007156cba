//! Facility records at each stage of the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::place::{slugify, PlaceRef};

/// Names that carry no information and may be replaced by any real name.
pub const PLACEHOLDER_NAMES: &[&str] = &["unnamed site", "unnamed facility", "unknown", "n/a"];

/// Name given to features that only carry coordinates
pub const UNNAMED_SITE: &str = "Unnamed site";

/// Addresses shorter than this are treated as a bare locality, not a street address.
pub const MIN_STREET_ADDRESS_LEN: usize = 6;

/// Canonical facility taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityType {
    Landfill,
    TransferStation,
    RecyclingCenter,
    HazardousWaste,
    Compost,
    ConstructionDebris,
    Other,
}

impl FacilityType {
    /// Map a raw source label ("MSW Type I", "amenity=recycling", ...) onto the taxonomy.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| label.contains(n));

        if label.trim().is_empty() {
            return FacilityType::Other;
        }
        if has(&["hazardous", "hhw", "household chemical"]) {
            return FacilityType::HazardousWaste;
        }
        if has(&["transfer"]) {
            return FacilityType::TransferStation;
        }
        if has(&["recycl", "drop-off", "drop off", "convenience center"]) {
            return FacilityType::RecyclingCenter;
        }
        if has(&["compost", "mulch", "yard waste", "green waste"]) {
            return FacilityType::Compost;
        }
        if has(&["c&d", "construction", "demolition", "debris", "type iv"]) {
            return FacilityType::ConstructionDebris;
        }
        if has(&["landfill", "msw", "type i", "dump", "waste_disposal", "disposal"]) {
            return FacilityType::Landfill;
        }
        FacilityType::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::Landfill => "landfill",
            FacilityType::TransferStation => "transfer_station",
            FacilityType::RecyclingCenter => "recycling_center",
            FacilityType::HazardousWaste => "hazardous_waste",
            FacilityType::Compost => "compost",
            FacilityType::ConstructionDebris => "construction_debris",
            FacilityType::Other => "other",
        }
    }
}

impl std::fmt::Display for FacilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic point (lat/lng), always validated before construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// One source record mapped onto the shared shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub name: String,
    /// Raw type label as the source wrote it
    #[serde(rename = "type")]
    pub type_label: String,
    pub address: String,
    /// Raw city text; often absent or junk
    pub city: Option<String>,
    pub state: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub website: Option<String>,
    pub source: String,
    pub source_url: Option<String>,
    /// Place the source itself attributes this record to (document key, override file)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_hint: Option<String>,
    /// Curated by hand rather than ingested automatically
    #[serde(default)]
    pub manual: bool,
}

impl NormalizedRecord {
    pub fn point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }

    pub fn facility_type(&self) -> FacilityType {
        FacilityType::from_label(&self.type_label)
    }

    /// Nothing to identify the facility by
    pub fn is_unidentifiable(&self) -> bool {
        is_placeholder_name(&self.name) && self.address.trim().is_empty() && self.point().is_none()
    }
}

/// The merged, durable facility record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFacility {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub facility_type: FacilityType,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub website: Option<String>,
    pub external_reference_url: Option<String>,
    pub appears_in: BTreeSet<PlaceRef>,
    /// Fingerprint the ID was minted from; empty in catalogs written before it was kept
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
}

impl CanonicalFacility {
    /// First sighting of a facility
    pub fn from_record(id: String, record: &NormalizedRecord, place: Option<PlaceRef>) -> Self {
        let mut appears_in = BTreeSet::new();
        if let Some(place) = place {
            appears_in.insert(place);
        }
        Self {
            slug: facility_slug(&record.name, &id),
            id,
            name: record.name.trim().to_string(),
            facility_type: record.facility_type(),
            address: record.address.trim().to_string(),
            lat: record.lat,
            lng: record.lng,
            website: non_empty(record.website.as_deref()),
            external_reference_url: non_empty(record.source_url.as_deref()),
            appears_in,
            fingerprint: String::new(),
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        }
    }

    /// Absorb another observation of the same facility.
    ///
    /// Set fields are only overwritten when the new value is an improvement:
    /// a placeholder name, an address that is probably just a locality, or an
    /// empty link/coordinate. `appears_in` is unioned. Returns true if anything changed.
    pub fn absorb(&mut self, other: &CanonicalFacility) -> bool {
        let before = self.clone();

        if is_placeholder_name(&self.name) && !is_placeholder_name(&other.name) {
            self.name = other.name.clone();
            self.slug = facility_slug(&self.name, &self.id);
        }
        if address_is_improvement(&self.address, &other.address) {
            self.address = other.address.clone();
        }
        if self.website.is_none() && other.website.is_some() {
            self.website = other.website.clone();
        }
        if self.external_reference_url.is_none() && other.external_reference_url.is_some() {
            self.external_reference_url = other.external_reference_url.clone();
        }
        if self.point().is_none() && other.point().is_some() {
            self.lat = other.lat;
            self.lng = other.lng;
        }
        if self.facility_type == FacilityType::Other && other.facility_type != FacilityType::Other
        {
            self.facility_type = other.facility_type;
        }
        if self.fingerprint.is_empty() {
            self.fingerprint = other.fingerprint.clone();
        }
        self.appears_in.extend(other.appears_in.iter().cloned());

        *self != before
    }

    pub fn summary(&self) -> FacilitySummary {
        FacilitySummary {
            id: self.id.clone(),
            slug: self.slug.clone(),
            name: self.name.clone(),
            facility_type: self.facility_type,
            address: self.address.clone(),
            lat: self.lat,
            lng: self.lng,
            website: self.website.clone(),
        }
    }
}

/// Display subset of a facility carried in per-place documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitySummary {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub facility_type: FacilityType,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

pub fn is_placeholder_name(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    name.is_empty() || PLACEHOLDER_NAMES.contains(&name.as_str())
}

/// A stored address is replaceable when it is empty, shorter than a street
/// address can be, or has no house number while the candidate does.
pub fn address_is_improvement(current: &str, candidate: &str) -> bool {
    let current = current.trim();
    let candidate = candidate.trim();
    if candidate.is_empty() || current == candidate {
        return false;
    }
    if current.chars().count() < MIN_STREET_ADDRESS_LEN {
        return candidate.chars().count() > current.chars().count();
    }
    let has_digit = |s: &str| s.chars().any(|c| c.is_ascii_digit());
    !has_digit(current) && has_digit(candidate)
}

fn facility_slug(name: &str, id: &str) -> String {
    let base = slugify(name);
    let suffix = id.split('_').nth(1).unwrap_or(id);
    let suffix = &suffix[..suffix.len().min(6)];
    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{}-{}", base, suffix)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
