//! Durable canonical catalog on disk.

pub mod merger;
pub mod store;

pub use merger::{place_documents, CatalogMerger, MergeStats};
pub use store::{CatalogLayout, CatalogLock};
