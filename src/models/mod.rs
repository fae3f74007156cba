//! Core data models for the facility pipeline.

pub mod facility;
pub mod place;

pub use facility::{
    CanonicalFacility, FacilitySummary, FacilityType, GeoPoint, NormalizedRecord,
};
pub use place::{slugify, NeighborEdge, PlaceDocument, PlaceRef};
