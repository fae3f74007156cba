//! Nominatim client: place → bounding box, and coordinates → place name.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::retry::{send_with_retry, Pacer, RetryPolicy};

/// Address keys that name a locality, most specific first
const LOCALITY_KEYS: &[&str] = &["city", "town", "village", "hamlet", "municipality"];

/// Resolves a place name from coordinates
#[allow(async_fn_in_trait)]
pub trait ReverseGeocoder {
    /// `Ok(None)` means the service answered but found no place.
    async fn reverse(&mut self, lat: f64, lng: f64) -> Result<Option<String>>;
}

/// Area in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: HashMap<String, String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    /// `[south, north, west, east]` as strings
    boundingbox: Vec<String>,
}

pub struct NominatimClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    pacer: Pacer,
}

impl NominatimClient {
    pub fn new(base_url: &str, user_agent: &str, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pacer: Pacer::new(policy.min_delay),
            policy,
        })
    }

    /// Geocode `"<place>, <region>"` to its bounding box
    pub async fn search_bbox(&mut self, query: &str) -> Result<Option<BoundingBox>> {
        let url = Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[("q", query), ("format", "jsonv2"), ("limit", "1")],
        )
        .context("Invalid Nominatim URL")?;
        let client = self.client.clone();
        let response = send_with_retry(&self.policy, &mut self.pacer, "Nominatim search", || {
            client.get(url.clone())
        })
        .await?;

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .context("Failed to parse Nominatim search response")?;
        Ok(hits.first().and_then(|hit| parse_bbox(&hit.boundingbox)))
    }
}

impl ReverseGeocoder for NominatimClient {
    async fn reverse(&mut self, lat: f64, lng: f64) -> Result<Option<String>> {
        let (lat_s, lng_s) = (lat.to_string(), lng.to_string());
        let url = Url::parse_with_params(
            &format!("{}/reverse", self.base_url),
            &[
                ("lat", lat_s.as_str()),
                ("lon", lng_s.as_str()),
                ("format", "jsonv2"),
                ("zoom", "10"),
                ("addressdetails", "1"),
            ],
        )
        .context("Invalid Nominatim URL")?;
        let client = self.client.clone();
        let response = send_with_retry(&self.policy, &mut self.pacer, "Nominatim reverse", || {
            client.get(url.clone())
        })
        .await?;

        let body: ReverseResponse = response
            .json()
            .await
            .context("Failed to parse Nominatim reverse response")?;
        if let Some(err) = body.error {
            debug!("Nominatim reverse ({}, {}): {}", lat, lng, err);
            return Ok(None);
        }
        Ok(locality_from_address(&body.address))
    }
}

fn locality_from_address(address: &HashMap<String, String>) -> Option<String> {
    LOCALITY_KEYS
        .iter()
        .find_map(|key| address.get(*key))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_bbox(raw: &[String]) -> Option<BoundingBox> {
    let values: Vec<f64> = raw.iter().filter_map(|v| v.parse().ok()).collect();
    match values.as_slice() {
        [south, north, west, east] => Some(BoundingBox {
            south: *south,
            west: *west,
            north: *north,
            east: *east,
        }),
        _ => None,
    }
}
