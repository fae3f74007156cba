//! Quality-gate report for operator review.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

use crate::catalog::store::write_json;
use crate::classify::RejectReason;
use crate::identity::IdCollision;

/// Outcome of one place group's run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupQuality {
    pub accepted: usize,
    pub rejected: usize,
    /// Accepted place names
    pub places: BTreeSet<String>,
    pub rejection_counts: BTreeMap<RejectReason, usize>,
    /// Rejected raw label → reason
    pub rejected_labels: BTreeMap<String, RejectReason>,
    /// Source files that contributed nothing → reason
    pub skipped_files: BTreeMap<String, RejectReason>,
    /// Records kept in the catalog without any place
    pub unplaced_records: usize,
    /// Records dropped as unidentifiable
    pub skipped_records: usize,
    /// Places whose external lookups failed this run
    pub external_failures: BTreeSet<String>,
}

impl GroupQuality {
    pub fn accept(&mut self, place: &str) {
        if self.places.insert(place.to_string()) {
            self.accepted += 1;
        }
    }

    /// Record a rejected label. Each distinct label counts once.
    pub fn reject(&mut self, label: &str, reason: RejectReason) {
        let label = label.trim().to_string();
        if self.rejected_labels.contains_key(&label) {
            return;
        }
        self.rejected_labels.insert(label, reason);
        self.rejected += 1;
        *self.rejection_counts.entry(reason).or_insert(0) += 1;
    }

    /// A record with no name, address or coordinates
    pub fn skip_record(&mut self) {
        self.skipped_records += 1;
        *self
            .rejection_counts
            .entry(RejectReason::NoIdentifiers)
            .or_insert(0) += 1;
    }

    pub fn skip_file(&mut self, path: &Path, reason: RejectReason) {
        self.skipped_files.insert(path.display().to_string(), reason);
        *self.rejection_counts.entry(reason).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub groups: BTreeMap<String, GroupQuality>,
    /// Records dropped as unidentifiable
    pub skipped_records: usize,
    pub collisions: Vec<IdCollision>,
}

impl QualityReport {
    pub fn group_mut(&mut self, name: &str) -> &mut GroupQuality {
        self.groups.entry(name.to_string()).or_default()
    }

    /// No group skipped a source file or lost an external lookup
    pub fn is_complete(&self) -> bool {
        self.groups
            .values()
            .all(|g| g.skipped_files.is_empty() && g.external_failures.is_empty())
    }

    pub fn write(&self, path: &Path) -> Result<bool> {
        let written = write_json(path, self)?;
        for (name, group) in &self.groups {
            info!(
                group = %name,
                "Quality gate: {} places accepted, {} labels rejected, {} files skipped",
                group.accepted,
                group.rejected,
                group.skipped_files.len()
            );
        }
        info!(
            "{} unidentifiable records skipped, {} ID collisions",
            self.skipped_records,
            self.collisions.len()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_distinct_labels() {
        let mut report = QualityReport::default();
        let group = report.group_mut("texas");
        group.accept("Waco");
        group.accept("Waco");
        group.reject("Main St", RejectReason::FailedQualityGate);
        group.reject(" Main St ", RejectReason::FailedQualityGate);
        group.reject("", RejectReason::Empty);
        group.skip_file(Path::new("x.json"), RejectReason::NotArraySource);
        group.skip_record();

        let group = &report.groups["texas"];
        assert_eq!(group.accepted, 1);
        assert_eq!(group.rejected, 2);
        assert_eq!(group.skipped_records, 1);
        assert_eq!(group.rejection_counts[&RejectReason::NoIdentifiers], 1);
        assert_eq!(group.rejection_counts[&RejectReason::FailedQualityGate], 1);
        assert_eq!(group.rejection_counts[&RejectReason::NotArraySource], 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_external_failure_makes_run_incomplete() {
        let mut report = QualityReport::default();
        report.group_mut("texas").accept("Waco");
        assert!(report.is_complete());
        report
            .group_mut("oklahoma")
            .external_failures
            .insert("Guymon".to_string());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_serialized_reason_names() {
        let mut report = QualityReport::default();
        report.group_mut("texas").reject("Hwy 287", RejectReason::FailedQualityGate);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json["groups"]["texas"]["rejected_labels"]["Hwy 287"],
            "failed-quality-gate"
        );
        assert_eq!(json["groups"]["texas"]["rejection_counts"]["failed-quality-gate"], 1);
    }
}
