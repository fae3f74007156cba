//! Fingerprinting and identity resolution.

pub mod fingerprint;
pub mod resolver;

pub use fingerprint::{facility_id, Fingerprint, IdOrigin};
pub use resolver::{IdCollision, IdentityResolver};
