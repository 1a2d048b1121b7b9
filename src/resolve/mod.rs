//! Reference resolver: 1-based parent indices to stored record ids.
//!
//! One ordered id list per parent collection, filled as parent rows reach the
//! store (or seeded from the store when the parent table was not in the
//! dump). Lookups that miss fall back to the first parent.

use crate::normalize::{CandidateRecord, FieldValue};
use crate::schema::Collection;
use crate::store::RecordId;
use ahash::AHashMap;

/// Result of looking up one parent index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(RecordId),
    /// Index missing or out of range; first parent substituted
    Fallback(RecordId),
    /// The parent collection has no records at all
    Missing,
}

#[derive(Debug, Default)]
pub struct ReferenceResolver {
    parents: AHashMap<Collection, Vec<RecordId>>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the id of a parent row, in source order.
    pub fn push(&mut self, collection: Collection, id: RecordId) {
        self.parents.entry(collection).or_default().push(id);
    }

    /// Fill a collection's list from stored `(position, id)` pairs.
    pub fn seed(&mut self, collection: Collection, mut existing: Vec<(u64, RecordId)>) {
        existing.sort_by_key(|(position, _)| *position);
        let list = self.parents.entry(collection).or_default();
        list.clear();
        list.extend(existing.into_iter().map(|(_, id)| id));
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.parents.get(&collection).map_or(0, Vec::len)
    }

    /// Look up a 1-based index in a parent collection.
    pub fn lookup(&self, parent: Collection, index: Option<i64>) -> Resolution {
        let Some(list) = self.parents.get(&parent).filter(|l| !l.is_empty()) else {
            return Resolution::Missing;
        };

        let exact = index
            .filter(|&i| i >= 1)
            .and_then(|i| usize::try_from(i - 1).ok())
            .and_then(|i| list.get(i));

        match exact {
            Some(id) => Resolution::Exact(id.clone()),
            None => Resolution::Fallback(list[0].clone()),
        }
    }

    /// Replace every pending reference in a record. Returns the number of
    /// fallbacks taken (a missing parent collection counts as one).
    pub fn resolve_record(&self, record: &mut CandidateRecord) -> usize {
        let mut fallbacks = 0;
        for value in record.fields_mut() {
            let FieldValue::PendingRef { parent, index } = *value else {
                continue;
            };
            *value = match self.lookup(parent, index) {
                Resolution::Exact(id) => FieldValue::Ref(id),
                Resolution::Fallback(id) => {
                    fallbacks += 1;
                    FieldValue::Ref(id)
                }
                Resolution::Missing => {
                    fallbacks += 1;
                    FieldValue::Null
                }
            };
        }
        fallbacks
    }
}
