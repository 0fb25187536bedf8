//! Prescription resolution: one prescription + one user = concrete sets.

use crate::{
    Catalog, Error, ErrorKind, Lift, LiftLookup, LiftMax, MaxLookup, MaxType, PlannedSet,
    Prescription, Result, SetLoad,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;

/// A prescription resolved for one user
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ResolvedPrescription {
    pub prescription_id: String,
    pub lift: Lift,
    pub sets: Vec<PlannedSet>,
    pub notes: String,
    pub rest_seconds: Option<u32>,
}

/// Outcome of one item in a batch
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItem {
    Success {
        prescription_id: String,
        result: ResolvedPrescription,
    },
    Error {
        prescription_id: String,
        kind: ErrorKind,
        error: String,
    },
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Success { .. })
    }
}

type MaxKey = (String, String, MaxType);

/// Memoizing [`MaxLookup`] for the lifetime of one call.
///
/// Misses are cached too, so a lift without a max is only looked up once.
pub struct CachedMaxLookup<'a> {
    inner: &'a dyn MaxLookup,
    cache: RefCell<HashMap<MaxKey, Option<LiftMax>>>,
}

impl<'a> CachedMaxLookup<'a> {
    pub fn new(inner: &'a dyn MaxLookup) -> Self {
        Self {
            inner,
            cache: RefCell::new(HashMap::new()),
        }
    }
}

impl MaxLookup for CachedMaxLookup<'_> {
    fn current_max(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
    ) -> Result<Option<LiftMax>> {
        let key = (user_id.to_string(), lift_id.to_string(), max_type);
        if let Some(hit) = self.cache.borrow().get(&key) {
            return Ok(hit.clone());
        }

        let fetched = self.inner.current_max(user_id, lift_id, max_type)?;
        self.cache.borrow_mut().insert(key, fetched.clone());
        Ok(fetched)
    }
}

/// Resolves prescriptions against the catalog and a max source.
///
/// Holds no mutable state between calls.
pub struct PrescriptionResolver<'a> {
    catalog: &'a Catalog,
    maxes: &'a dyn MaxLookup,
}

impl<'a> PrescriptionResolver<'a> {
    pub fn new(catalog: &'a Catalog, maxes: &'a dyn MaxLookup) -> Self {
        Self { catalog, maxes }
    }

    pub fn resolve(&self, prescription_id: &str, user_id: &str) -> Result<ResolvedPrescription> {
        let prescription = self.catalog.prescription(prescription_id)?;
        resolve_with(self.catalog, self.maxes, prescription, user_id)
    }

    /// Resolve many prescriptions; failures are reported per item.
    pub fn resolve_batch(&self, prescription_ids: &[String], user_id: &str) -> Vec<BatchItem> {
        let cached = CachedMaxLookup::new(self.maxes);

        prescription_ids
            .iter()
            .map(|id| {
                let outcome = self
                    .catalog
                    .prescription(id)
                    .and_then(|p| resolve_with(self.catalog, &cached, p, user_id));
                match outcome {
                    Ok(result) => BatchItem::Success {
                        prescription_id: id.clone(),
                        result,
                    },
                    Err(e) => {
                        tracing::debug!("Batch item {} failed for {}: {}", id, user_id, e);
                        BatchItem::Error {
                            prescription_id: id.clone(),
                            kind: e.kind(),
                            error: e.public_message(),
                        }
                    }
                }
            })
            .collect()
    }
}

/// Resolve one prescription using `maxes` for every weight it needs
pub(crate) fn resolve_with(
    lifts: &dyn LiftLookup,
    maxes: &dyn MaxLookup,
    prescription: &Prescription,
    user_id: &str,
) -> Result<ResolvedPrescription> {
    let lift = lifts
        .get_lift(&prescription.lift_id)?
        .ok_or_else(|| Error::not_found("lift", prescription.lift_id.as_str()))?;

    let strategy = &prescription.load_strategy;
    let sets = prescription.set_scheme.generate(|load| match load {
        SetLoad::Prescribed => strategy.weight(maxes, user_id, &lift.id),
        SetLoad::Percent(percentage) => strategy.weight_at(maxes, user_id, &lift.id, percentage),
    })?;

    Ok(ResolvedPrescription {
        prescription_id: prescription.id.clone(),
        lift,
        sets,
        notes: prescription.notes.clone(),
        rest_seconds: prescription.rest_seconds,
    })
}
