//! Run report: per-table counters, totals and their text rendering.

use crate::import::TableReport;
use crate::parser::TupleIndex;
use crate::schema::Collection;
use crate::store::UpsertPolicy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters summed over all tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Totals {
    pub attempted: u64,
    pub imported: u64,
    pub skipped: u64,
    pub existing: u64,
    pub failed: u64,
    pub fallback_refs: u64,
}

impl Totals {
    pub fn from_tables(tables: &[TableReport]) -> Self {
        tables.iter().fold(Totals::default(), |mut acc, t| {
            acc.attempted += t.attempted;
            acc.imported += t.imported;
            acc.skipped += t.skipped;
            acc.existing += t.existing;
            acc.failed += t.failed;
            acc.fallback_refs += t.fallback_refs;
            acc
        })
    }
}

/// Result of one import run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    /// Dump path as given
    pub dump: String,
    /// Store backend name
    pub store: String,
    pub policy: UpsertPolicy,
    pub dry_run: bool,
    /// RFC 3339 start time
    pub started_at: String,
    pub duration_secs: f64,
    pub totals: Totals,
    /// One entry per imported collection, in import order
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn table(&self, collection: Collection) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.collection == collection)
    }

    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:<26} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "COLLECTION", "SOURCE TABLE", "ATTEMPTED", "IMPORTED", "SKIPPED", "EXISTING", "FAILED", "FALLBACK"
        )?;
        writeln!(f, "{}", "─".repeat(104))?;
        for t in &self.tables {
            writeln!(
                f,
                "{:<14} {:<26} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
                t.collection.as_str(),
                t.source_table,
                t.attempted,
                t.imported,
                t.skipped,
                t.existing,
                t.failed,
                t.fallback_refs
            )?;
        }
        writeln!(f, "{}", "─".repeat(104))?;
        write!(
            f,
            "{:<14} {:<26} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "total",
            "",
            self.totals.attempted,
            self.totals.imported,
            self.totals.skipped,
            self.totals.existing,
            self.totals.failed,
            self.totals.fallback_refs
        )?;

        for t in self.tables.iter().filter(|t| !t.failures.is_empty()) {
            write!(f, "\n\nFailures in {}:", t.collection)?;
            for failure in &t.failures {
                match &failure.key {
                    Some(key) => write!(f, "\n  @{} [{}] {}", failure.offset, key, failure.reason)?,
                    None => write!(f, "\n  @{} {}", failure.offset, failure.reason)?,
                }
            }
            if t.failures_omitted > 0 {
                write!(f, "\n  ... and {} more", t.failures_omitted)?;
            }
        }
        Ok(())
    }
}

/// One table found while scanning a dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSummary {
    pub table: String,
    pub statements: usize,
    pub unterminated_statements: usize,
    pub tuples: usize,
    pub unbalanced_tuples: usize,
    /// Collection whose map reads this table, if any
    pub collection: Option<Collection>,
}

/// What `inspect` reports about a dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DumpSummary {
    pub dump: String,
    pub compression: String,
    pub bytes: usize,
    pub tables: Vec<TableSummary>,
    /// Collections whose source table does not appear in the dump
    pub missing: Vec<Collection>,
}

impl DumpSummary {
    /// Summarize an indexed dump. `source_table` maps each collection to
    /// the table name it reads.
    pub fn build<F>(dump: &str, compression: &str, index: &TupleIndex<'_>, source_table: F) -> Self
    where
        F: Fn(Collection) -> String,
    {
        let sources: Vec<(Collection, String)> = Collection::IMPORT_ORDER
            .iter()
            .map(|&c| (c, source_table(c)))
            .collect();

        let tables = index
            .tables()
            .iter()
            .map(|t| TableSummary {
                table: t.name.clone(),
                statements: t.statements,
                unterminated_statements: t.unterminated_statements,
                tuples: t.tuples.len(),
                unbalanced_tuples: t.unbalanced_tuples(),
                collection: sources
                    .iter()
                    .find(|(_, source)| source.eq_ignore_ascii_case(&t.name))
                    .map(|(c, _)| *c),
            })
            .collect::<Vec<_>>();

        let missing = sources
            .iter()
            .filter(|(c, _)| !tables.iter().any(|t| t.collection == Some(*c)))
            .map(|(c, _)| *c)
            .collect();

        DumpSummary {
            dump: dump.to_string(),
            compression: compression.to_string(),
            bytes: 0,
            tables,
            missing,
        }
    }
}

impl fmt::Display for DumpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<30} {:>10} {:>10} {:>10}  {}",
            "TABLE", "STATEMENTS", "TUPLES", "UNBALANCED", "COLLECTION"
        )?;
        writeln!(f, "{}", "─".repeat(78))?;
        for t in &self.tables {
            let mut statements = t.statements.to_string();
            if t.unterminated_statements > 0 {
                statements = format!("{}*", statements);
            }
            writeln!(
                f,
                "{:<30} {:>10} {:>10} {:>10}  {}",
                t.table,
                statements,
                t.tuples,
                t.unbalanced_tuples,
                t.collection.map_or("-", |c| c.as_str())
            )?;
        }
        if self.tables.iter().any(|t| t.unterminated_statements > 0) {
            write!(f, "\n* includes statements without a terminating ';'")?;
        }
        if !self.missing.is_empty() {
            let names: Vec<&str> = self.missing.iter().map(|c| c.as_str()).collect();
            write!(f, "\nNo rows for: {}", names.join(", "))?;
        }
        Ok(())
    }
}
