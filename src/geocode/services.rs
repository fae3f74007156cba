//! Live map services behind the pipeline's geocoder and area-feature seams.

use anyhow::Result;
use tracing::{info, warn};

use super::nominatim::{NominatimClient, ReverseGeocoder};
use super::overpass::OverpassClient;
use super::retry::RetryPolicy;
use crate::models::PlaceRef;
use crate::normalize::RawRecord;

/// Source identifier recorded on map-extract records
pub const MAP_SOURCE: &str = "osm";

/// Looks up waste features around a named place
#[allow(async_fn_in_trait)]
pub trait AreaFeatureSource {
    /// `region` qualifies the place name for the geocoder, e.g. `"Texas"`.
    async fn features_near(&mut self, place: &PlaceRef, region: &str) -> Result<Vec<RawRecord>>;
}

/// The live map services: Nominatim for geocoding, Overpass for features
pub struct MapServices {
    nominatim: NominatimClient,
    overpass: OverpassClient,
}

impl MapServices {
    pub fn new(
        nominatim_url: &str,
        overpass_url: &str,
        user_agent: &str,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            nominatim: NominatimClient::new(nominatim_url, user_agent, policy.clone())?,
            overpass: OverpassClient::new(overpass_url, user_agent, policy)?,
        })
    }
}

impl ReverseGeocoder for MapServices {
    async fn reverse(&mut self, lat: f64, lng: f64) -> Result<Option<String>> {
        self.nominatim.reverse(lat, lng).await
    }
}

impl AreaFeatureSource for MapServices {
    async fn features_near(&mut self, place: &PlaceRef, region: &str) -> Result<Vec<RawRecord>> {
        let query = format!("{}, {}", place.place, region);
        let Some(bbox) = self.nominatim.search_bbox(&query).await? else {
            warn!(place = %place, "Geocoder found no area for {:?}", query);
            return Ok(Vec::new());
        };
        let records = self.overpass.fetch_features(&bbox, MAP_SOURCE).await?;
        info!(place = %place, "{} map features", records.len());
        Ok(records
            .into_iter()
            .map(|r| r.with_place_hint(Some(place.place.as_str())))
            .collect())
    }
}
