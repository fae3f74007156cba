//! wastemap - waste-facility catalog builder
//!
//! Reconciles facility records from government exports, map extracts and
//! curated overrides into a deduplicated on-disk catalog, a quality-gated
//! list of places and a nearest-neighbor graph between them. Shared by the
//! `ingest` and `audit` binaries.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod drift;
pub mod error;
pub mod geocode;
pub mod identity;
pub mod models;
pub mod neighbors;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod sources;

pub use models::{CanonicalFacility, NormalizedRecord, PlaceRef};
