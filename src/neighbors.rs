//! Place centroids and the k-nearest-neighbor graph between places.

use geo::Centroid;
use geo_types::{MultiPoint, Point};
use std::collections::BTreeMap;
use tracing::info;

use crate::models::{NeighborEdge, PlaceDocument, PlaceRef};

/// Spherical Earth radius used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const KM_PER_MILE: f64 = 1.609344;
pub const DEFAULT_NEIGHBORS: usize = 10;

/// Haversine distance in miles between two `(lng, lat)` points
pub fn haversine_miles(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lat1, lat2) = (a.y().to_radians(), b.y().to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.x() - a.x()).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_KM * c / KM_PER_MILE
}

/// Mean of member coordinates per place key. Places without a single
/// coordinate-bearing facility are left out.
pub fn centroids(places: &BTreeMap<PlaceRef, PlaceDocument>) -> BTreeMap<String, Point<f64>> {
    places
        .iter()
        .filter_map(|(place, doc)| {
            let points: MultiPoint<f64> = doc
                .facilities
                .iter()
                .filter_map(|f| Some(Point::new(f.lng?, f.lat?)))
                .collect::<Vec<_>>()
                .into();
            points.centroid().map(|c| (place.key(), c))
        })
        .collect()
}

/// Each place's `k` nearest other places, nearest first, distances rounded
/// to 0.1 mile. Ties break by slug.
pub fn build_neighbor_graph(
    centroids: &BTreeMap<String, Point<f64>>,
    k: usize,
) -> BTreeMap<String, Vec<NeighborEdge>> {
    let graph: BTreeMap<String, Vec<NeighborEdge>> = centroids
        .iter()
        .map(|(slug, &from)| {
            let mut edges: Vec<NeighborEdge> = centroids
                .iter()
                .filter(|(other, _)| *other != slug)
                .map(|(other, &to)| NeighborEdge {
                    slug: other.clone(),
                    distance: round_tenth(haversine_miles(from, to)),
                })
                .collect();
            edges.sort_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| a.slug.cmp(&b.slug))
            });
            edges.truncate(k);
            (slug.clone(), edges)
        })
        .collect();

    info!(
        "Neighbor graph: {} places, k = {}",
        graph.len(),
        k
    );
    graph
}

fn round_tenth(miles: f64) -> f64 {
    (miles * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FacilitySummary, FacilityType};

    /// Miles per degree of latitude on the 6371 km sphere
    const MILES_PER_DEG: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0 / KM_PER_MILE;

    fn summary(lat: Option<f64>, lng: Option<f64>) -> FacilitySummary {
        FacilitySummary {
            id: "f_1".to_string(),
            slug: "x".to_string(),
            name: "x".to_string(),
            facility_type: FacilityType::Landfill,
            address: String::new(),
            lat,
            lng,
            website: None,
        }
    }

    fn doc(place: &str, facilities: Vec<FacilitySummary>) -> (PlaceRef, PlaceDocument) {
        let place = PlaceRef::new("texas", place);
        let document = PlaceDocument {
            place_group: place.place_group.clone(),
            place: place.place.clone(),
            slug: place.place_slug(),
            facilities,
        };
        (place, document)
    }

    #[test]
    fn test_right_triangle_hypotenuse() {
        let lat0: f64 = 30.0;
        let lng0: f64 = -97.0;
        let north = Point::new(lng0, lat0 + 3.0 / MILES_PER_DEG);
        let east = Point::new(lng0 + 4.0 / (MILES_PER_DEG * lat0.to_radians().cos()), lat0);

        let mut points = BTreeMap::new();
        points.insert("texas/a".to_string(), Point::new(lng0, lat0));
        points.insert("texas/b".to_string(), north);
        points.insert("texas/c".to_string(), east);

        let graph = build_neighbor_graph(&points, 10);
        let from_b = &graph["texas/b"];
        assert_eq!(from_b[0], NeighborEdge { slug: "texas/a".to_string(), distance: 3.0 });
        let to_c = from_b.iter().find(|e| e.slug == "texas/c").unwrap();
        assert!((to_c.distance - 5.0).abs() <= 0.1, "{}", to_c.distance);

        let from_a = &graph["texas/a"];
        assert_eq!(from_a.len(), 2);
        assert_eq!(from_a[1].distance, 4.0);
    }

    #[test]
    fn test_centroid_is_mean_and_skips_empty_places() {
        let places: BTreeMap<_, _> = vec![
            doc(
                "Waco",
                vec![summary(Some(31.0), Some(-97.0)), summary(Some(32.0), Some(-98.0)), summary(None, None)],
            ),
            doc("Nowhere", vec![summary(None, None)]),
        ]
        .into_iter()
        .collect();

        let c = centroids(&places);
        assert_eq!(c.len(), 1);
        let waco = c["texas/waco"];
        assert!((waco.y() - 31.5).abs() < 1e-9);
        assert!((waco.x() + 97.5).abs() < 1e-9);
    }

    #[test]
    fn test_k_limits_neighbors() {
        let points: BTreeMap<String, Point<f64>> = (0..5)
            .map(|i| (format!("texas/p{}", i), Point::new(-97.0, 30.0 + i as f64 * 0.1)))
            .collect();
        let graph = build_neighbor_graph(&points, 2);
        assert!(graph.values().all(|edges| edges.len() == 2));
        assert_eq!(graph["texas/p0"][0].slug, "texas/p1");
        assert!(graph["texas/p2"].iter().all(|e| e.slug != "texas/p2"));
    }
}
