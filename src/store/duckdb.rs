use super::{
    Document, RecordId, StorageError, Store, StoredDocument, UpsertOutcome, UpsertPolicy,
    Upserted,
};
use crate::schema::Collection;
use ::duckdb::{params, Connection};
use chrono::{DateTime, Utc};
use std::path::Path;

const CREATE_DOCUMENTS: &str = "CREATE TABLE IF NOT EXISTS documents (
    collection VARCHAR NOT NULL,
    natural_key VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    position BIGINT NOT NULL,
    body VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL,
    updated_at VARCHAR NOT NULL,
    PRIMARY KEY (collection, natural_key)
)";

/// Documents kept in one DuckDB table keyed by `(collection, natural_key)`.
/// Bodies are stored as JSON text.
pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(CREATE_DOCUMENTS, [])?;
        Ok(Self { conn })
    }

    /// Stored body for a natural key, if any
    pub fn get(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .find(collection, natural_key)?
            .map(|(_, body)| body))
    }

    fn find(
        &self,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Option<(RecordId, Document)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, body FROM documents WHERE collection = ? AND natural_key = ?",
        )?;
        let mut rows = stmt.query_map(params![collection.as_str(), natural_key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let first = rows.next().transpose()?;
        match first {
            Some((id, body)) => {
                let body: Document =
                    serde_json::from_str(&body).map_err(|e| StorageError::Corrupt {
                        collection,
                        message: format!("{}: {}", natural_key, e),
                    })?;
                Ok(Some((RecordId::from(id), body)))
            }
            None => Ok(None),
        }
    }
}

impl Store for DuckDbStore {
    fn upsert(
        &mut self,
        collection: Collection,
        natural_key: &str,
        fields: &Document,
        policy: UpsertPolicy,
    ) -> Result<Upserted, StorageError> {
        let now = Utc::now().to_rfc3339();

        if let Some((id, body)) = self.find(collection, natural_key)? {
            let outcome = match policy {
                UpsertPolicy::Keep => UpsertOutcome::Skipped,
                UpsertPolicy::Replace if body == *fields => UpsertOutcome::Skipped,
                UpsertPolicy::Replace => {
                    self.conn.execute(
                        "UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND natural_key = ?",
                        params![
                            serde_json::to_string(fields)?,
                            now,
                            collection.as_str(),
                            natural_key
                        ],
                    )?;
                    UpsertOutcome::Updated
                }
            };
            return Ok(Upserted { id, outcome });
        }

        let id = RecordId::derive(collection, natural_key);
        let position: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM documents WHERE collection = ?",
            params![collection.as_str()],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO documents VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                collection.as_str(),
                natural_key,
                id.as_str(),
                position,
                serde_json::to_string(fields)?,
                now,
                now
            ],
        )?;

        Ok(Upserted {
            id,
            outcome: UpsertOutcome::Created,
        })
    }

    fn list_existing(&self, collection: Collection) -> Result<Vec<(u64, RecordId)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT position, id FROM documents WHERE collection = ? ORDER BY position")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut existing = Vec::new();
        for row in rows {
            let (position, id) = row?;
            existing.push((position as u64, RecordId::from(id)));
        }
        Ok(existing)
    }

    fn count(&self, collection: Collection) -> Result<usize, StorageError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?",
            params![collection.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn export(&self, collection: Collection) -> Result<Vec<StoredDocument>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, natural_key, position, body, created_at, updated_at
             FROM documents WHERE collection = ? ORDER BY position",
        )?;
        let rows = stmt.query_map(params![collection.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let corrupt = |key: &str, e: &dyn std::fmt::Display| StorageError::Corrupt {
            collection,
            message: format!("{}: {}", key, e),
        };
        let timestamp = |key: &str, s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| corrupt(key, &e))
        };

        let mut docs = Vec::new();
        for row in rows {
            let (id, natural_key, position, body, created_at, updated_at) = row?;
            docs.push(StoredDocument {
                id: RecordId::from(id),
                fields: serde_json::from_str(&body).map_err(|e| corrupt(&natural_key, &e))?,
                position: position as u64,
                created_at: timestamp(&natural_key, &created_at)?,
                updated_at: timestamp(&natural_key, &updated_at)?,
                natural_key,
            });
        }
        Ok(docs)
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_and_list() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let a = json!({"name": "A"});
        let a = a.as_object().unwrap();

        let created = store
            .upsert(Collection::Batches, "Morning", a, UpsertPolicy::Keep)
            .unwrap();
        assert_eq!(created.outcome, UpsertOutcome::Created);
        store
            .upsert(Collection::Batches, "Evening", a, UpsertPolicy::Keep)
            .unwrap();

        let again = store
            .upsert(Collection::Batches, "Morning", a, UpsertPolicy::Keep)
            .unwrap();
        assert_eq!(again.outcome, UpsertOutcome::Skipped);
        assert_eq!(again.id, created.id);

        let existing = store.list_existing(Collection::Batches).unwrap();
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[0], (1, created.id));
        assert_eq!(store.count(Collection::Users).unwrap(), 0);
    }

    #[test]
    fn test_replace_updates_body() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let a = json!({"status": "pending"});
        let b = json!({"status": "paid"});
        store
            .upsert(Collection::Transactions, "T1", a.as_object().unwrap(), UpsertPolicy::Replace)
            .unwrap();
        let updated = store
            .upsert(Collection::Transactions, "T1", b.as_object().unwrap(), UpsertPolicy::Replace)
            .unwrap();
        assert_eq!(updated.outcome, UpsertOutcome::Updated);
        let body = store.get(Collection::Transactions, "T1").unwrap().unwrap();
        assert_eq!(body["status"], "paid");
    }

    #[test]
    fn test_export_in_position_order() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        for (key, title) in [("v2", "Second"), ("v1", "First")] {
            let body = json!({"title": title, "status": 1});
            store
                .upsert(Collection::Videos, key, body.as_object().unwrap(), UpsertPolicy::Keep)
                .unwrap();
        }

        let docs = store.export(Collection::Videos).unwrap();
        let keys: Vec<&str> = docs.iter().map(|d| d.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["v2", "v1"]);
        assert_eq!(docs[0].position, 1);
        assert_eq!(docs[0].id, RecordId::derive(Collection::Videos, "v2"));
        assert_eq!(docs[1].fields["title"], "First");
        assert!(store.export(Collection::Users).unwrap().is_empty());
    }
}
