//! Record normalization.
//!
//! Maps each source's raw field names onto one [`NormalizedRecord`] shape.
//! Pure: no I/O, no coordinate validation (see [`coords`]).

pub mod coords;

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::models::facility::UNNAMED_SITE;
use crate::models::NormalizedRecord;
use coords::coerce_f64;

pub use coords::{validate_coords, validate_values};

/// An untyped bag of fields from one source.
///
/// Keys are lower-cased on construction so synonym lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub fields: BTreeMap<String, Value>,
    pub source: String,
    /// Place the source attributes this record to (document key, override file)
    pub place_hint: Option<String>,
    pub manual: bool,
}

impl RawRecord {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    /// Build from a JSON object, flattening OSM-style `tags` and `center` objects.
    pub fn from_json(object: &Map<String, Value>, source: &str) -> Self {
        let mut record = Self::new(source);
        for (key, value) in object {
            match (key.as_str(), value) {
                ("tags", Value::Object(tags)) => {
                    for (k, v) in tags {
                        record.insert_if_absent(k, v.clone());
                    }
                }
                ("center", Value::Object(center)) => {
                    for (k, v) in center {
                        record.insert_if_absent(k, v.clone());
                    }
                }
                _ => record.insert(key, value.clone()),
            }
        }
        record
    }

    /// Build from one delimited-text row
    pub fn from_csv(headers: &csv::StringRecord, row: &csv::StringRecord, source: &str) -> Self {
        let mut record = Self::new(source);
        for (header, cell) in headers.iter().zip(row.iter()) {
            record.insert(header, Value::String(cell.to_string()));
        }
        record
    }

    pub fn with_place_hint(mut self, place: Option<&str>) -> Self {
        self.place_hint = place.map(str::to_string);
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.trim().to_lowercase(), value);
    }

    fn insert_if_absent(&mut self, key: &str, value: Value) {
        self.fields
            .entry(key.trim().to_lowercase())
            .or_insert(value);
    }

    /// First non-empty string value under any of `keys`
    fn text(&self, keys: &[String]) -> Option<String> {
        keys.iter().find_map(|key| {
            let text = match self.fields.get(key)? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            (!text.is_empty()).then_some(text)
        })
    }

    fn number(&self, keys: &[String]) -> Option<f64> {
        keys.iter()
            .find_map(|key| self.fields.get(key).and_then(coerce_f64))
    }
}

/// Canonical field → source keys, in priority order
#[derive(Debug, Clone)]
pub struct FieldSynonyms {
    pub name: Vec<String>,
    pub type_label: Vec<String>,
    pub address: Vec<String>,
    pub housenumber: Vec<String>,
    pub street: Vec<String>,
    pub city: Vec<String>,
    pub state: Vec<String>,
    pub zip: Vec<String>,
    pub lat: Vec<String>,
    pub lng: Vec<String>,
    pub website: Vec<String>,
    pub source_url: Vec<String>,
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

impl Default for FieldSynonyms {
    fn default() -> Self {
        Self {
            name: keys(&["name", "site_name", "facility_name", "permittee", "site", "title"]),
            type_label: keys(&[
                "type",
                "facility_type",
                "site_type",
                "category",
                "permit_type",
                "landuse",
                "amenity",
            ]),
            address: keys(&[
                "address",
                "full_address",
                "site_address",
                "street_address",
                "location_address",
            ]),
            housenumber: keys(&["addr:housenumber", "housenumber", "house_number"]),
            street: keys(&["street", "addr:street", "address1", "address_1", "site_street"]),
            city: keys(&["city", "addr:city", "site_city", "town", "municipality"]),
            state: keys(&["state", "addr:state", "site_state"]),
            zip: keys(&["zip", "zipcode", "zip_code", "postcode", "addr:postcode", "postal_code"]),
            lat: keys(&["lat", "latitude", "lat_dd", "y"]),
            lng: keys(&["lng", "lon", "long", "longitude", "lng_dd", "x"]),
            website: keys(&["website", "contact:website", "url", "homepage", "web"]),
            source_url: keys(&[
                "source_url",
                "external_reference_url",
                "reference_url",
                "permit_url",
                "osm_url",
                "link",
            ]),
        }
    }
}

impl FieldSynonyms {
    /// Per-source overrides: `{canonical field: source column}` moves the
    /// column to the front of that field's key list.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut synonyms = Self::default();
        for (field, column) in overrides {
            let column = column.trim().to_lowercase();
            let list = match field.as_str() {
                "name" => &mut synonyms.name,
                "type" => &mut synonyms.type_label,
                "address" => &mut synonyms.address,
                "housenumber" => &mut synonyms.housenumber,
                "street" => &mut synonyms.street,
                "city" => &mut synonyms.city,
                "state" => &mut synonyms.state,
                "zip" => &mut synonyms.zip,
                "lat" => &mut synonyms.lat,
                "lng" => &mut synonyms.lng,
                "website" => &mut synonyms.website,
                "source_url" => &mut synonyms.source_url,
                _ => continue,
            };
            list.retain(|k| *k != column);
            list.insert(0, column);
        }
        synonyms
    }
}

/// Map one raw record onto the canonical shape.
///
/// Returns `None` when neither a name, an address nor coordinates are derivable.
/// A record with coordinates but no name or address is kept as an unnamed site.
pub fn normalize(raw: &RawRecord, synonyms: &FieldSynonyms) -> Option<NormalizedRecord> {
    let city = raw.text(&synonyms.city);
    let state = raw.text(&synonyms.state);
    let address = raw
        .text(&synonyms.address)
        .unwrap_or_else(|| compose_address(raw, synonyms, city.as_deref(), state.as_deref()));
    let lat = raw.number(&synonyms.lat);
    let lng = raw.number(&synonyms.lng);

    let name = match raw.text(&synonyms.name) {
        Some(name) => name,
        None if !address.is_empty() => address.clone(),
        None if lat.is_some() && lng.is_some() => UNNAMED_SITE.to_string(),
        None => return None,
    };

    Some(NormalizedRecord {
        name: collapse_whitespace(&name),
        type_label: raw.text(&synonyms.type_label).unwrap_or_default(),
        address: collapse_whitespace(&address),
        city,
        state,
        lat,
        lng,
        website: raw.text(&synonyms.website),
        source: raw.source.clone(),
        source_url: raw.text(&synonyms.source_url),
        place_hint: raw.place_hint.clone(),
        manual: raw.manual,
    })
}

/// `"<number> <street>, <city>, <state> <zip>"` from whatever parts exist
fn compose_address(
    raw: &RawRecord,
    synonyms: &FieldSynonyms,
    city: Option<&str>,
    state: Option<&str>,
) -> String {
    let street = match (raw.text(&synonyms.housenumber), raw.text(&synonyms.street)) {
        (Some(number), Some(street)) => Some(format!("{} {}", number, street)),
        (None, Some(street)) => Some(street),
        _ => None,
    };
    let region = match (state, raw.text(&synonyms.zip)) {
        (Some(state), Some(zip)) => Some(format!("{} {}", state, zip)),
        (Some(state), None) => Some(state.to_string()),
        (None, Some(zip)) => Some(zip),
        (None, None) => None,
    };

    // A city/state alone is not an address
    if street.is_none() {
        return String::new();
    }

    [street, city.map(str::to_string), region]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        RawRecord::from_json(value.as_object().unwrap(), "test")
    }

    #[test]
    fn test_field_synonyms() {
        let record = raw(json!({
            "Permittee": "Dalhart Landfill",
            "Latitude": "36.06",
            "LONGITUDE": -102.51,
            "Site_Type": "MSW Type I",
        }));
        let n = normalize(&record, &FieldSynonyms::default()).unwrap();
        assert_eq!(n.name, "Dalhart Landfill");
        assert_eq!(n.lat, Some(36.06));
        assert_eq!(n.lng, Some(-102.51));
        assert_eq!(n.type_label, "MSW Type I");
    }

    #[test]
    fn test_composed_address() {
        let record = raw(json!({
            "name": "Transfer Station",
            "street": "100  County Road 12",
            "city": "Dalhart",
            "state": "TX",
            "zip": "79022",
        }));
        let n = normalize(&record, &FieldSynonyms::default()).unwrap();
        assert_eq!(n.address, "100 County Road 12, Dalhart, TX 79022");
        assert_eq!(n.city.as_deref(), Some("Dalhart"));
    }

    #[test]
    fn test_osm_tags_flattened() {
        let record = raw(json!({
            "center": {"lat": 31.1, "lon": -97.3},
            "tags": {
                "name": "Recycle Yard",
                "amenity": "recycling",
                "addr:housenumber": "12",
                "addr:street": "Elm St",
                "addr:city": "Temple",
            }
        }));
        let n = normalize(&record, &FieldSynonyms::default()).unwrap();
        assert_eq!(n.name, "Recycle Yard");
        assert_eq!(n.type_label, "recycling");
        assert_eq!(n.address, "12 Elm St, Temple");
        assert_eq!(n.lat, Some(31.1));
        assert_eq!(n.lng, Some(-97.3));
    }

    #[test]
    fn test_coordinates_only_becomes_unnamed_site() {
        let record = raw(json!({"lat": 31.1, "lon": -97.3, "landuse": "landfill"}));
        let n = normalize(&record, &FieldSynonyms::default()).unwrap();
        assert_eq!(n.name, UNNAMED_SITE);
    }

    #[test]
    fn test_nothing_derivable_is_skipped() {
        let record = raw(json!({"city": "Temple", "state": "TX"}));
        assert!(normalize(&record, &FieldSynonyms::default()).is_none());
    }

    #[test]
    fn test_source_overrides_take_priority() {
        let mut overrides = HashMap::new();
        overrides.insert("name".to_string(), "OPERATOR".to_string());
        let synonyms = FieldSynonyms::with_overrides(&overrides);

        let record = raw(json!({"name": "Site 4", "operator": "Acme Disposal"}));
        let n = normalize(&record, &synonyms).unwrap();
        assert_eq!(n.name, "Acme Disposal");
    }
}
