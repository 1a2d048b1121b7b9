//! Idempotent importer: one table's tuples into the store.
//!
//! Every tuple ends in exactly one of three buckets: imported (created or
//! updated), skipped (row-level skip or an existing record left as is) or
//! failed (coercion or storage error). The row never aborts the table.

use crate::normalize::{normalize, Normalized, SkipReason};
use crate::parser::{lex_tuple, RawTuple};
use crate::resolve::ReferenceResolver;
use crate::schema::{Collection, TableSchema};
use crate::store::{Store, UpsertOutcome, UpsertPolicy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default cap on failure reasons kept per table
pub const DEFAULT_MAX_FAILURE_REASONS: usize = 100;

/// One failed row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowFailure {
    /// Byte offset of the tuple in the dump
    pub offset: usize,
    /// Natural key, when the row got far enough to have one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub reason: String,
}

/// Counters for one imported table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableReport {
    pub collection: Collection,
    pub source_table: String,
    /// Tuples seen
    pub attempted: u64,
    /// Records created or updated
    pub imported: u64,
    /// Row-level skips plus existing records left untouched
    pub skipped: u64,
    /// Subset of `skipped` that already existed in the store
    pub existing: u64,
    /// Coercion and storage errors
    pub failed: u64,
    /// References that fell back to the first parent or to null
    pub fallback_refs: u64,
    /// First failure reasons, up to the configured limit
    pub failures: Vec<RowFailure>,
    /// Failures beyond the limit that were counted but not kept
    pub failures_omitted: u64,
}

impl TableReport {
    pub fn new(collection: Collection, source_table: impl Into<String>) -> Self {
        Self {
            collection,
            source_table: source_table.into(),
            attempted: 0,
            imported: 0,
            skipped: 0,
            existing: 0,
            failed: 0,
            fallback_refs: 0,
            failures: Vec::new(),
            failures_omitted: 0,
        }
    }

    /// `attempted == imported + skipped + failed`
    pub fn is_consistent(&self) -> bool {
        self.attempted == self.imported + self.skipped + self.failed
            && self.existing <= self.skipped
    }

    fn record_failure(&mut self, limit: usize, failure: RowFailure) {
        self.failed += 1;
        if self.failures.len() < limit {
            self.failures.push(failure);
        } else {
            self.failures_omitted += 1;
        }
    }
}

/// Merges normalized rows into a [`Store`] under one policy.
pub struct Importer<'s, S: Store + ?Sized> {
    store: &'s mut S,
    policy: UpsertPolicy,
    max_failure_reasons: usize,
}

impl<'s, S: Store + ?Sized> Importer<'s, S> {
    pub fn new(store: &'s mut S) -> Self {
        Self {
            store,
            policy: UpsertPolicy::default(),
            max_failure_reasons: DEFAULT_MAX_FAILURE_REASONS,
        }
    }

    pub fn with_policy(mut self, policy: UpsertPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_failure_reasons(mut self, max: usize) -> Self {
        self.max_failure_reasons = max;
        self
    }

    /// Import all tuples of one table.
    pub fn import_table(
        &mut self,
        schema: &TableSchema,
        source_table: &str,
        tuples: &[RawTuple<'_>],
        resolver: &mut ReferenceResolver,
    ) -> TableReport {
        let mut report = TableReport::new(schema.collection, source_table);
        for tuple in tuples {
            self.import_row(schema, tuple, resolver, &mut report);
        }
        report
    }

    /// Process one tuple end to end, updating `report`.
    pub fn import_row(
        &mut self,
        schema: &TableSchema,
        tuple: &RawTuple<'_>,
        resolver: &mut ReferenceResolver,
        report: &mut TableReport,
    ) {
        let collection = schema.collection;
        report.attempted += 1;

        let skip = |report: &mut TableReport, reason: SkipReason| {
            debug!(table = %collection, offset = tuple.offset, %reason, "row skipped");
            report.skipped += 1;
        };

        if !tuple.balanced {
            skip(report, SkipReason::Unbalanced);
            return;
        }
        let values = match lex_tuple(tuple.text) {
            Ok(values) => values,
            Err(_) => {
                skip(report, SkipReason::Unbalanced);
                return;
            }
        };

        let mut record = match normalize(schema, &values) {
            Ok(Normalized::Record(record)) => record,
            Ok(Normalized::Skip(reason)) => {
                skip(report, reason);
                return;
            }
            Err(e) => {
                warn!(table = %collection, offset = tuple.offset, error = %e, "row failed");
                report.record_failure(
                    self.max_failure_reasons,
                    RowFailure {
                        offset: tuple.offset,
                        key: None,
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        report.fallback_refs += resolver.resolve_record(&mut record) as u64;

        let document = record.to_document();
        match self
            .store
            .upsert(collection, &record.natural_key, &document, self.policy)
        {
            Ok(upserted) => {
                match upserted.outcome {
                    UpsertOutcome::Created | UpsertOutcome::Updated => report.imported += 1,
                    UpsertOutcome::Skipped => {
                        report.skipped += 1;
                        report.existing += 1;
                    }
                }
                resolver.push(collection, upserted.id);
            }
            Err(e) => {
                warn!(
                    table = %collection,
                    offset = tuple.offset,
                    key = %record.natural_key,
                    error = %e,
                    "upsert failed"
                );
                report.record_failure(
                    self.max_failure_reasons,
                    RowFailure {
                        offset: tuple.offset,
                        key: Some(record.natural_key),
                        reason: e.to_string(),
                    },
                );
            }
        }
    }
}
