//! Place (city) classification.
//!
//! Decides whether a free-text label is a real place, using rule tables that
//! are data rather than code.

pub mod classifier;
pub mod rules;

pub use classifier::{AcceptBasis, Acceptance, PlaceClassifier, RejectReason, Verdict};
pub use rules::{ClassifierRules, RuleTable};
