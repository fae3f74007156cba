//! Merges repeated observations of one facility into a single canonical record.

use hashbrown::HashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, error};

use super::fingerprint::{facility_id, Fingerprint, IdOrigin};
use crate::models::{CanonicalFacility, NormalizedRecord, PlaceRef};

/// Two distinct fingerprints that hashed to the same short ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdCollision {
    pub id: String,
    pub kept: String,
    pub dropped: String,
}

/// Fingerprint → FacilityID map plus the canonical facilities built so far.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_fingerprint: HashMap<Fingerprint, String>,
    fingerprint_of: HashMap<String, Fingerprint>,
    facilities: BTreeMap<String, CanonicalFacility>,
    collisions: Vec<IdCollision>,
    skipped: usize,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the catalog, returning its FacilityID.
    ///
    /// Records with no name, address or coordinates are dropped and counted.
    pub fn observe(&mut self, record: &NormalizedRecord, place: Option<PlaceRef>) -> Option<String> {
        if record.is_unidentifiable() {
            self.skipped += 1;
            return None;
        }

        let fingerprint = Fingerprint::of(record);
        let id = match self.by_fingerprint.get(&fingerprint) {
            Some(id) => id.clone(),
            None => {
                let origin = if record.manual {
                    IdOrigin::Manual
                } else {
                    IdOrigin::Automated
                };
                let id = facility_id(&fingerprint, origin);
                if let Some(existing) = self.fingerprint_of.get(&id) {
                    error!(
                        id = %id,
                        kept = %existing,
                        dropped = %fingerprint,
                        "Facility ID collision; dropping record"
                    );
                    self.collisions.push(IdCollision {
                        id,
                        kept: existing.to_string(),
                        dropped: fingerprint.to_string(),
                    });
                    return None;
                }
                debug!(id = %id, "New facility");
                self.fingerprint_of.insert(id.clone(), fingerprint.clone());
                self.by_fingerprint.insert(fingerprint.clone(), id.clone());
                id
            }
        };

        let mut observed = CanonicalFacility::from_record(id.clone(), record, place);
        observed.fingerprint = fingerprint.to_string();
        match self.facilities.get_mut(&id) {
            Some(existing) => {
                existing.absorb(&observed);
            }
            None => {
                self.facilities.insert(id.clone(), observed);
            }
        }
        Some(id)
    }

    /// Observe a whole batch in canonical order so the outcome does not depend
    /// on file iteration order. IDs are returned in input order.
    pub fn observe_batch(
        &mut self,
        batch: &[(NormalizedRecord, Option<PlaceRef>)],
    ) -> Vec<Option<String>> {
        let mut order: Vec<usize> = (0..batch.len()).collect();
        order.sort_by(|&a, &b| canonical_order(&batch[a], &batch[b]));

        let mut ids = vec![None; batch.len()];
        for index in order {
            let (record, place) = &batch[index];
            ids[index] = self.observe(record, place.clone());
        }
        ids
    }

    pub fn facilities(&self) -> &BTreeMap<String, CanonicalFacility> {
        &self.facilities
    }

    pub fn into_facilities(self) -> BTreeMap<String, CanonicalFacility> {
        self.facilities
    }

    /// Records dropped as unidentifiable
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn collisions(&self) -> &[IdCollision] {
        &self.collisions
    }
}

/// Manual entries first, then by every field that can differ between records
/// sharing a fingerprint.
fn canonical_order(
    a: &(NormalizedRecord, Option<PlaceRef>),
    b: &(NormalizedRecord, Option<PlaceRef>),
) -> Ordering {
    let (ra, pa) = a;
    let (rb, pb) = b;
    rb.manual
        .cmp(&ra.manual)
        .then_with(|| ra.source.cmp(&rb.source))
        .then_with(|| Fingerprint::of(ra).cmp(&Fingerprint::of(rb)))
        .then_with(|| ra.name.cmp(&rb.name))
        .then_with(|| ra.address.cmp(&rb.address))
        .then_with(|| ra.type_label.cmp(&rb.type_label))
        .then_with(|| ra.website.cmp(&rb.website))
        .then_with(|| ra.source_url.cmp(&rb.source_url))
        .then_with(|| cmp_coord(ra.lat, rb.lat))
        .then_with(|| cmp_coord(ra.lng, rb.lng))
        .then_with(|| pa.cmp(pb))
}

fn cmp_coord(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}
