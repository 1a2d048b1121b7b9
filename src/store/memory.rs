use super::{
    Document, RecordId, StorageError, Store, StoredDocument, UpsertOutcome, UpsertPolicy,
    Upserted,
};
use crate::schema::Collection;
use ahash::{AHashMap, AHashSet};
use chrono::Utc;

#[derive(Debug, Default)]
struct CollectionData {
    docs: Vec<StoredDocument>,
    by_key: AHashMap<String, usize>,
}

/// Ordered in-memory collections.
///
/// Also the working set behind [`super::JsonStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: AHashMap<Collection, CollectionData>,
    failing_keys: AHashSet<(Collection, String)>,
    upsert_calls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of this natural key fail, for exercising the
    /// row-failure path.
    pub fn with_failure(mut self, collection: Collection, natural_key: &str) -> Self {
        self.failing_keys
            .insert((collection, natural_key.to_string()));
        self
    }

    /// Number of upsert calls received, including failed ones
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls
    }

    pub fn get(&self, collection: Collection, natural_key: &str) -> Option<&StoredDocument> {
        let data = self.collections.get(&collection)?;
        data.by_key.get(natural_key).map(|&i| &data.docs[i])
    }

    pub fn documents(&self, collection: Collection) -> &[StoredDocument] {
        self.collections
            .get(&collection)
            .map(|d| d.docs.as_slice())
            .unwrap_or(&[])
    }

    /// Snapshot every collection of another store.
    pub fn copy_of<S: Store + ?Sized>(source: &S) -> Result<Self, StorageError> {
        let mut store = Self::new();
        for collection in Collection::IMPORT_ORDER {
            let docs = source.export(collection)?;
            if !docs.is_empty() {
                store.load(collection, docs);
            }
        }
        Ok(store)
    }

    /// Replace a collection's contents with previously stored documents.
    pub(crate) fn load(&mut self, collection: Collection, mut docs: Vec<StoredDocument>) {
        docs.sort_by_key(|d| d.position);
        let by_key = docs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.natural_key.clone(), i))
            .collect();
        self.collections
            .insert(collection, CollectionData { docs, by_key });
    }
}

impl Store for MemoryStore {
    fn upsert(
        &mut self,
        collection: Collection,
        natural_key: &str,
        fields: &Document,
        policy: UpsertPolicy,
    ) -> Result<Upserted, StorageError> {
        self.upsert_calls += 1;

        if self
            .failing_keys
            .contains(&(collection, natural_key.to_string()))
        {
            return Err(StorageError::Unavailable(format!(
                "write rejected for {}/{}",
                collection, natural_key
            )));
        }

        let data = self.collections.entry(collection).or_default();
        let now = Utc::now();

        if let Some(&i) = data.by_key.get(natural_key) {
            let doc = &mut data.docs[i];
            let outcome = match policy {
                UpsertPolicy::Keep => UpsertOutcome::Skipped,
                UpsertPolicy::Replace if doc.fields == *fields => UpsertOutcome::Skipped,
                UpsertPolicy::Replace => {
                    doc.fields = fields.clone();
                    doc.updated_at = now;
                    UpsertOutcome::Updated
                }
            };
            return Ok(Upserted {
                id: doc.id.clone(),
                outcome,
            });
        }

        let id = RecordId::derive(collection, natural_key);
        data.by_key
            .insert(natural_key.to_string(), data.docs.len());
        data.docs.push(StoredDocument {
            id: id.clone(),
            natural_key: natural_key.to_string(),
            position: data.docs.len() as u64 + 1,
            created_at: now,
            updated_at: now,
            fields: fields.clone(),
        });

        Ok(Upserted {
            id,
            outcome: UpsertOutcome::Created,
        })
    }

    fn list_existing(&self, collection: Collection) -> Result<Vec<(u64, RecordId)>, StorageError> {
        Ok(self
            .documents(collection)
            .iter()
            .map(|d| (d.position, d.id.clone()))
            .collect())
    }

    fn count(&self, collection: Collection) -> Result<usize, StorageError> {
        Ok(self.documents(collection).len())
    }

    fn export(&self, collection: Collection) -> Result<Vec<StoredDocument>, StorageError> {
        Ok(self.documents(collection).to_vec())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
