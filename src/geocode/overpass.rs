//! Overpass area-feature query for waste facilities inside a bounding box.

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;

use super::nominatim::BoundingBox;
use super::retry::{send_with_retry, Pacer, RetryPolicy};
use crate::normalize::RawRecord;

/// Tag filters selecting waste-disposal features
const FEATURE_FILTERS: &[&str] = &[
    r#"["landuse"="landfill"]"#,
    r#"["amenity"="waste_transfer_station"]"#,
    r#"["amenity"="recycling"]["recycling_type"="centre"]"#,
    r#"["amenity"="waste_disposal"]["access"!="private"]"#,
];

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Map<String, Value>>,
}

pub struct OverpassClient {
    client: Client,
    url: String,
    policy: RetryPolicy,
    pacer: Pacer,
}

impl OverpassClient {
    pub fn new(url: &str, user_agent: &str, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            pacer: Pacer::new(policy.min_delay),
            policy,
        })
    }

    /// Fetch waste features in `bbox` as raw records from source `source`
    pub async fn fetch_features(&mut self, bbox: &BoundingBox, source: &str) -> Result<Vec<RawRecord>> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("data", &build_query(bbox))
            .finish();
        let client = self.client.clone();
        let url = self.url.clone();
        let response = send_with_retry(&self.policy, &mut self.pacer, "Overpass query", || {
            client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.clone())
        })
        .await?;

        let body: OverpassResponse = response
            .json()
            .await
            .context("Failed to parse Overpass response")?;
        debug!("Overpass returned {} elements", body.elements.len());

        Ok(body
            .elements
            .iter()
            .map(|element| record_from_element(element, source))
            .collect())
    }
}

fn build_query(bbox: &BoundingBox) -> String {
    let area = format!("({},{},{},{})", bbox.south, bbox.west, bbox.north, bbox.east);
    let mut query = String::from("[out:json][timeout:90];\n(\n");
    for filter in FEATURE_FILTERS {
        query.push_str(&format!("  nwr{}{};\n", filter, area));
    }
    query.push_str(");\nout center tags;\n");
    query
}

/// Overpass element → raw record. The element's own `type`/`id` become an
/// OSM reference URL so they are not mistaken for a facility type.
pub fn record_from_element(element: &Map<String, Value>, source: &str) -> RawRecord {
    let mut fields = element.clone();
    let osm_type = fields.remove("type");
    let osm_id = fields.remove("id");

    let mut record = RawRecord::from_json(&fields, source);
    if let (Some(Value::String(kind)), Some(Value::Number(id))) = (osm_type, osm_id) {
        record.insert(
            "osm_url",
            Value::String(format!("https://www.openstreetmap.org/{}/{}", kind, id)),
        );
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize, FieldSynonyms};
    use serde_json::json;

    #[test]
    fn test_query_contains_every_filter() {
        let bbox = BoundingBox {
            south: 36.0,
            west: -102.6,
            north: 36.1,
            east: -102.4,
        };
        let query = build_query(&bbox);
        assert!(query.starts_with("[out:json]"));
        assert_eq!(query.matches("(36,-102.6,36.1,-102.4)").count(), FEATURE_FILTERS.len());
        assert!(query.contains("out center tags;"));
    }

    #[test]
    fn test_element_to_record() {
        let element = json!({
            "type": "way",
            "id": 123456,
            "center": {"lat": 36.05, "lon": -102.5},
            "tags": {"landuse": "landfill", "name": "Dalhart Landfill"}
        });
        let record = record_from_element(element.as_object().unwrap(), "osm");
        let n = normalize(&record, &FieldSynonyms::default()).unwrap();
        assert_eq!(n.type_label, "landfill");
        assert_eq!(n.name, "Dalhart Landfill");
        assert_eq!(
            n.source_url.as_deref(),
            Some("https://www.openstreetmap.org/way/123456")
        );
        assert_eq!(n.lat, Some(36.05));
    }
}
