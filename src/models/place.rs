//! Places (localities) that group facilities for publishing.

use serde::{Deserialize, Serialize};

use super::facility::FacilitySummary;

/// A `{place_group, place}` pair, e.g. `{texas, Dalhart}`.
///
/// Ordering is by group then place so sets of references serialize stably.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaceRef {
    pub place_group: String,
    pub place: String,
}

impl PlaceRef {
    pub fn new(place_group: &str, place: &str) -> Self {
        Self {
            place_group: place_group.trim().to_string(),
            place: place.trim().to_string(),
        }
    }

    /// Slug of the place name alone
    pub fn place_slug(&self) -> String {
        slugify(&self.place)
    }

    /// Key unique across groups: `<group>/<place-slug>`
    pub fn key(&self) -> String {
        format!("{}/{}", slugify(&self.place_group), self.place_slug())
    }
}

impl std::fmt::Display for PlaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.place_group, self.place)
    }
}

/// Per-place document written to `catalog/places/<group>/<slug>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDocument {
    pub place_group: String,
    pub place: String,
    pub slug: String,
    pub facilities: Vec<FacilitySummary>,
}

impl PlaceDocument {
    /// A place is renderable iff it has a facility with valid coordinates
    pub fn is_renderable(&self) -> bool {
        self.facilities
            .iter()
            .any(|f| f.lat.is_some() && f.lng.is_some())
    }
}

/// One ranked neighbor of a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEdge {
    pub slug: String,
    /// Great-circle distance in miles, rounded to 0.1
    pub distance: f64,
}

/// Lowercase ASCII slug: runs of non-alphanumerics collapse to one hyphen.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c == '\'' {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
