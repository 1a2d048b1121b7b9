//! Run orchestrator: walks the collections in dependency order.
//!
//! Owns the per-run state (resolver lists and table reports). Parents are
//! imported before children; a child's parent list is seeded from the store
//! when the parent table was absent from this dump.

use crate::config::ImportConfig;
use crate::import::{Importer, TableReport, DEFAULT_MAX_FAILURE_REASONS};
use crate::parser::TupleIndex;
use crate::progress::ImportProgress;
use crate::report::{RunReport, Totals};
use crate::resolve::ReferenceResolver;
use crate::schema::{schema_for, Collection};
use crate::store::{Store, UpsertPolicy};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub policy: UpsertPolicy,
    pub max_failure_reasons: usize,
    /// Restrict the run to these collections
    pub only: Option<Vec<Collection>>,
    pub source_overrides: BTreeMap<Collection, String>,
    pub skip: Vec<Collection>,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: UpsertPolicy::default(),
            max_failure_reasons: DEFAULT_MAX_FAILURE_REASONS,
            only: None,
            source_overrides: BTreeMap::new(),
            skip: Vec::new(),
            dry_run: false,
        }
    }
}

impl RunOptions {
    /// Options carried by a config file. CLI flags are applied on top.
    pub fn from_config(config: &ImportConfig) -> Self {
        let mut options = RunOptions {
            policy: config.policy.unwrap_or_default(),
            max_failure_reasons: config
                .max_failure_reasons
                .unwrap_or(DEFAULT_MAX_FAILURE_REASONS),
            ..Default::default()
        };
        for collection in Collection::IMPORT_ORDER {
            if config.is_skipped(collection) {
                options.skip.push(collection);
            }
            let source = config.source_table(collection);
            if source != schema_for(collection).source_table {
                options
                    .source_overrides
                    .insert(collection, source.to_string());
            }
        }
        options
    }

    pub fn source_table(&self, collection: Collection) -> &str {
        self.source_overrides
            .get(&collection)
            .map(String::as_str)
            .unwrap_or(schema_for(collection).source_table)
    }

    pub fn includes(&self, collection: Collection) -> bool {
        if self.skip.contains(&collection) {
            return false;
        }
        self.only
            .as_ref()
            .map_or(true, |only| only.contains(&collection))
    }
}

/// One import run over one dump.
pub struct ImportRun<'s, S: Store + ?Sized> {
    store: &'s mut S,
    options: RunOptions,
    resolver: ReferenceResolver,
    progress: Option<ImportProgress>,
}

impl<'s, S: Store + ?Sized> ImportRun<'s, S> {
    pub fn new(store: &'s mut S, options: RunOptions) -> Self {
        Self {
            store,
            options,
            resolver: ReferenceResolver::new(),
            progress: None,
        }
    }

    /// Report row progress per table
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Collection, u64, u64) + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Import every included collection from `dump`.
    pub fn run(&mut self, dump: &str, dump_name: &str) -> Result<RunReport> {
        if dump.trim().is_empty() {
            bail!("Dump is empty: {}", dump_name);
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let index = TupleIndex::build(dump);
        debug!(
            tables = index.tables().len(),
            tuples = index.total_tuples(),
            "indexed dump"
        );

        let mut tables = Vec::new();
        for collection in Collection::IMPORT_ORDER {
            if !self.options.includes(collection) {
                debug!(table = %collection, "collection excluded");
                continue;
            }
            let report = self.import_collection(collection, &index)?;
            tables.push(report);
        }

        Ok(RunReport {
            dump: dump_name.to_string(),
            store: self.store.backend_type().to_string(),
            policy: self.options.policy,
            dry_run: self.options.dry_run,
            started_at: started_at.to_rfc3339(),
            duration_secs: start.elapsed().as_secs_f64(),
            totals: Totals::from_tables(&tables),
            tables,
        })
    }

    fn import_collection(
        &mut self,
        collection: Collection,
        index: &TupleIndex<'_>,
    ) -> Result<TableReport> {
        let schema = schema_for(collection);
        let source_table = self.options.source_table(collection).to_string();

        for parent in schema.parents() {
            if self.resolver.is_empty(parent) {
                let existing = self
                    .store
                    .list_existing(parent)
                    .with_context(|| format!("Failed to list existing {}", parent))?;
                if !existing.is_empty() {
                    info!(table = %parent, records = existing.len(), "seeded parent lookup from store");
                }
                self.resolver.seed(parent, existing);
            }
        }

        let tuples = index.get(&source_table);
        let total = tuples.len() as u64;
        let mut report = TableReport::new(collection, source_table.as_str());

        let mut importer = Importer::new(&mut *self.store)
            .with_policy(self.options.policy)
            .with_max_failure_reasons(self.options.max_failure_reasons);

        for (i, tuple) in tuples.iter().enumerate() {
            importer.import_row(schema, tuple, &mut self.resolver, &mut report);
            if let Some(progress) = self.progress.as_mut() {
                progress(collection, i as u64 + 1, total);
            }
        }

        self.store
            .flush()
            .with_context(|| format!("Failed to persist {}", collection))?;

        info!(
            table = %collection,
            source = %source_table,
            attempted = report.attempted,
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            "table imported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordId};

    const DUMP: &str = "\
INSERT INTO `register_user` VALUES (1,'Ann','ann@x.io','1','p',1);
INSERT INTO `crm_course_details` VALUES (1,'Rust','<p>Intro</p>'),(2,'Go',NULL);
INSERT INTO `crm_subject_details` VALUES (1,2,'Traits','x'),(2,9,'Lifetimes',NULL);
";

    #[test]
    fn test_run_resolves_references() {
        let mut store = MemoryStore::new();
        let report = ImportRun::new(&mut store, RunOptions::default())
            .run(DUMP, "dump.sql")
            .unwrap();

        assert_eq!(report.tables.len(), 7);
        assert_eq!(report.totals.imported, 5);
        assert_eq!(report.table(Collection::Subjects).unwrap().fallback_refs, 1);

        let go = RecordId::derive(Collection::Courses, "Go");
        let rust = RecordId::derive(Collection::Courses, "Rust");
        let traits = store.get(Collection::Subjects, "Traits").unwrap();
        assert_eq!(traits.fields["course"], go.as_str());
        let lifetimes = store.get(Collection::Subjects, "Lifetimes").unwrap();
        assert_eq!(lifetimes.fields["course"], rust.as_str());
    }

    #[test]
    fn test_skip_and_only() {
        let mut store = MemoryStore::new();
        let options = RunOptions {
            only: Some(vec![Collection::Users, Collection::Courses]),
            skip: vec![Collection::Users],
            ..Default::default()
        };
        let report = ImportRun::new(&mut store, options).run(DUMP, "dump.sql").unwrap();
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].collection, Collection::Courses);
        // instructor falls back to null with no users at all
        let rust = store.get(Collection::Courses, "Rust").unwrap();
        assert!(rust.fields["instructor"].is_null());
    }

    #[test]
    fn test_source_override() {
        let dump = "INSERT INTO legacy_users VALUES (1,'Ann','ann@x.io','1','p',1);";
        let mut store = MemoryStore::new();
        let mut options = RunOptions::default();
        options
            .source_overrides
            .insert(Collection::Users, "legacy_users".into());
        let report = ImportRun::new(&mut store, options).run(dump, "d").unwrap();
        assert_eq!(report.table(Collection::Users).unwrap().imported, 1);
        assert_eq!(report.table(Collection::Users).unwrap().source_table, "legacy_users");
    }

    #[test]
    fn test_blank_dump_is_fatal() {
        let mut store = MemoryStore::new();
        assert!(ImportRun::new(&mut store, RunOptions::default())
            .run(" \n", "blank.sql")
            .is_err());
        assert_eq!(store.upsert_calls(), 0);
    }
}
