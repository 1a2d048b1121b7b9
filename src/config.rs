//! YAML configuration for the `import` command.
//!
//! ```yaml
//! store:
//!   backend: duckdb
//!   path: ./documents.duckdb
//! policy: keep
//! max_failure_reasons: 50
//! tables:
//!   users:
//!     source: legacy_users
//!   transactions:
//!     skip: true
//! ```
//!
//! Command-line flags take precedence over values from the file.

use crate::schema::{schema_for, Collection};
use crate::store::{StoreKind, UpsertPolicy};
use anyhow::{bail, Context};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: Option<StoreKind>,
    /// Directory (json) or database file (duckdb)
    pub path: Option<PathBuf>,
}

/// Per-collection overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    /// Source table name in the dump, replacing the built-in one
    pub source: Option<String>,
    /// Leave this collection out of the run
    pub skip: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    pub store: StoreConfig,
    pub policy: Option<UpsertPolicy>,
    pub max_failure_reasons: Option<usize>,
    pub tables: BTreeMap<Collection, TableConfig>,
}

impl ImportConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ImportConfig = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (collection, table) in &self.tables {
            if let Some(source) = &table.source {
                if source.trim().is_empty() {
                    bail!("tables.{}.source must not be empty", collection);
                }
            }
        }
        Ok(())
    }

    /// Source table to read for a collection
    pub fn source_table(&self, collection: Collection) -> &str {
        self.tables
            .get(&collection)
            .and_then(|t| t.source.as_deref())
            .unwrap_or(schema_for(collection).source_table)
    }

    pub fn is_skipped(&self, collection: Collection) -> bool {
        self.tables.get(&collection).is_some_and(|t| t.skip)
    }
}
