//! JSON Schema generation for `--json` output and the config file.
//!
//! Exported via the `schema` subcommand.

use schemars::{schema_for, Schema};
use std::collections::BTreeMap;

/// All schemas, keyed by name. BTreeMap keeps the output diffable.
pub fn all_schemas() -> BTreeMap<&'static str, Schema> {
    let mut schemas = BTreeMap::new();

    // import --json
    schemas.insert("import", schema_for!(crate::report::RunReport));

    // inspect --json
    schemas.insert("inspect", schema_for!(crate::report::DumpSummary));

    // --config file
    schemas.insert("config", schema_for!(crate::config::ImportConfig));

    schemas
}

pub fn get_schema(name: &str) -> Option<Schema> {
    all_schemas().remove(name)
}

pub fn schema_names() -> Vec<&'static str> {
    all_schemas().keys().copied().collect()
}
