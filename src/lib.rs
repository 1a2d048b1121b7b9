// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

pub mod config;
pub mod import;
pub mod input;
pub mod json_schema;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod report;
pub mod resolve;
pub mod schema;
pub mod store;
