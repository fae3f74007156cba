//! External map and geocoding services, and the reverse-geocode cache.
//!
//! All outbound calls share one retry/pacing policy; see [`retry`].

pub mod cache;
pub mod nominatim;
pub mod overpass;
pub mod retry;
pub mod services;

pub use cache::{CacheStats, ReverseGeocodeCache};
pub use nominatim::{BoundingBox, NominatimClient, ReverseGeocoder};
pub use overpass::OverpassClient;
pub use retry::{Pacer, RetryPolicy};
pub use services::{AreaFeatureSource, MapServices, MAP_SOURCE};
