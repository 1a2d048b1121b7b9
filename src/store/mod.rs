//! Storage upsert contract and its backends.
//!
//! The importer only sees the [`Store`] trait. Backends:
//!
//! - **memory**: [`MemoryStore`], used for tests and, preloaded from the
//!   configured store, for dry runs
//! - **json**: [`JsonStore`], one `<collection>.json` file per collection
//! - **duckdb**: [`DuckDbStore`], a single `documents` table in a DuckDB file

mod duckdb;
mod json;
mod memory;

pub use self::duckdb::DuckDbStore;
pub use json::JsonStore;
pub use memory::MemoryStore;

use crate::schema::Collection;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Document body: field name to JSON value, in schema order
/// (`serde_json` is built with `preserve_order`)
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Generated identifier of a stored record (24 hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Deterministic id for a natural key: the first 12 bytes of
    /// SHA-256(`collection` NUL `natural_key`), hex-encoded.
    pub fn derive(collection: Collection, natural_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(natural_key.as_bytes());
        let digest = hasher.finalize();
        RecordId(hex::encode(&digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an existing record with the same natural key is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpsertPolicy {
    /// Insert if absent, otherwise leave the stored record untouched
    #[default]
    Keep,
    /// Insert if absent, otherwise overwrite the stored fields
    Replace,
}

impl FromStr for UpsertPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(UpsertPolicy::Keep),
            "replace" => Ok(UpsertPolicy::Replace),
            _ => Err(format!(
                "Unknown policy: {}. Valid options: keep, replace",
                s
            )),
        }
    }
}

impl fmt::Display for UpsertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertPolicy::Keep => write!(f, "keep"),
            UpsertPolicy::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Record already existed and was left as stored
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub id: RecordId,
    pub outcome: UpsertOutcome,
}

/// Per-record storage failure. Fails the row, never the run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("corrupt document in {collection}: {message}")]
    Corrupt {
        collection: Collection,
        message: String,
    },
}

/// A stored record with its bookkeeping fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(rename = "_id")]
    pub id: RecordId,
    #[serde(rename = "_key")]
    pub natural_key: String,
    /// 1-based insertion position within the collection
    #[serde(rename = "_position")]
    pub position: u64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Document,
}

/// The storage upsert collaborator.
///
/// Calls are sequential; each completes before the next starts.
pub trait Store {
    /// Merge one record by natural key under the given policy.
    fn upsert(
        &mut self,
        collection: Collection,
        natural_key: &str,
        fields: &Document,
        policy: UpsertPolicy,
    ) -> Result<Upserted, StorageError>;

    /// Ids already stored for a collection, with their 1-based positions,
    /// in insertion order.
    fn list_existing(&self, collection: Collection) -> Result<Vec<(u64, RecordId)>, StorageError>;

    fn count(&self, collection: Collection) -> Result<usize, StorageError>;

    /// Every stored document of a collection, in insertion order
    fn export(&self, collection: Collection) -> Result<Vec<StoredDocument>, StorageError>;

    /// Persist buffered writes. Called after each table.
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn upsert(
        &mut self,
        collection: Collection,
        natural_key: &str,
        fields: &Document,
        policy: UpsertPolicy,
    ) -> Result<Upserted, StorageError> {
        (**self).upsert(collection, natural_key, fields, policy)
    }

    fn list_existing(&self, collection: Collection) -> Result<Vec<(u64, RecordId)>, StorageError> {
        (**self).list_existing(collection)
    }

    fn count(&self, collection: Collection) -> Result<usize, StorageError> {
        (**self).count(collection)
    }

    fn export(&self, collection: Collection) -> Result<Vec<StoredDocument>, StorageError> {
        (**self).export(collection)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        (**self).flush()
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Store backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Json,
    #[serde(rename = "duckdb")]
    DuckDb,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreKind::Memory),
            "json" => Ok(StoreKind::Json),
            "duckdb" | "duck" => Ok(StoreKind::DuckDb),
            _ => Err(format!(
                "Unknown store: {}. Valid options: memory, json, duckdb",
                s
            )),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Json => write!(f, "json"),
            StoreKind::DuckDb => write!(f, "duckdb"),
        }
    }
}

impl StoreKind {
    /// Default location under the user data directory
    pub fn default_path(&self) -> Result<PathBuf> {
        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .context("Could not determine data directory")?;
        let dir = base.join("dump-ingest");
        Ok(match self {
            StoreKind::Memory | StoreKind::Json => dir.join("documents"),
            StoreKind::DuckDb => dir.join("documents.duckdb"),
        })
    }
}

/// In-memory copy of the configured store for a dry run.
///
/// Nothing is created on disk: a store path that does not exist yet previews
/// as an empty store.
pub fn open_preview(kind: StoreKind, path: &Path) -> Result<MemoryStore> {
    if kind == StoreKind::Memory || !path.exists() {
        return Ok(MemoryStore::new());
    }
    let base = open(kind, path)?;
    MemoryStore::copy_of(&*base)
        .with_context(|| format!("Failed to read {} store: {}", kind, path.display()))
}

/// Open a store backend. `path` is ignored for the memory store.
pub fn open(kind: StoreKind, path: &Path) -> Result<Box<dyn Store>> {
    let store: Box<dyn Store> = match kind {
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::Json => Box::new(
            JsonStore::open(path)
                .with_context(|| format!("Failed to open JSON store: {}", path.display()))?,
        ),
        StoreKind::DuckDb => Box::new(
            DuckDbStore::open(path)
                .with_context(|| format!("Failed to open DuckDB store: {}", path.display()))?,
        ),
    };
    Ok(store)
}
