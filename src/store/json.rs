use super::{
    Document, MemoryStore, RecordId, StorageError, Store, StoredDocument, UpsertOutcome,
    UpsertPolicy, Upserted,
};
use crate::schema::Collection;
use ahash::AHashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A directory of `<collection>.json` files.
///
/// Everything is loaded on open; changed collections are rewritten on
/// [`Store::flush`] through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonStore {
    dir: PathBuf,
    inner: MemoryStore,
    dirty: AHashSet<Collection>,
}

impl JsonStore {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let mut inner = MemoryStore::new();

        for collection in Collection::IMPORT_ORDER {
            let path = collection_path(dir, collection);
            if !path.exists() {
                continue;
            }
            let reader = BufReader::new(File::open(&path)?);
            let docs: Vec<StoredDocument> =
                serde_json::from_reader(reader).map_err(|e| StorageError::Corrupt {
                    collection,
                    message: format!("{}: {}", path.display(), e),
                })?;
            debug!(collection = %collection, documents = docs.len(), "loaded collection");
            inner.load(collection, docs);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            inner,
            dirty: AHashSet::new(),
        })
    }

    pub fn get(&self, collection: Collection, natural_key: &str) -> Option<&StoredDocument> {
        self.inner.get(collection, natural_key)
    }

    fn write_collection(&self, collection: Collection) -> Result<(), StorageError> {
        let path = collection_path(&self.dir, collection);
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, self.inner.documents(collection))?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection))
}

impl Store for JsonStore {
    fn upsert(
        &mut self,
        collection: Collection,
        natural_key: &str,
        fields: &Document,
        policy: UpsertPolicy,
    ) -> Result<Upserted, StorageError> {
        let upserted = self.inner.upsert(collection, natural_key, fields, policy)?;
        if upserted.outcome != UpsertOutcome::Skipped {
            self.dirty.insert(collection);
        }
        Ok(upserted)
    }

    fn list_existing(&self, collection: Collection) -> Result<Vec<(u64, RecordId)>, StorageError> {
        self.inner.list_existing(collection)
    }

    fn count(&self, collection: Collection) -> Result<usize, StorageError> {
        self.inner.count(collection)
    }

    fn export(&self, collection: Collection) -> Result<Vec<StoredDocument>, StorageError> {
        self.inner.export(collection)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let mut dirty: Vec<Collection> = self.dirty.iter().copied().collect();
        dirty.sort();
        for collection in dirty {
            self.write_collection(collection)?;
            self.dirty.remove(&collection);
            debug!(collection = %collection, dir = %self.dir.display(), "wrote collection");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "json"
    }
}
