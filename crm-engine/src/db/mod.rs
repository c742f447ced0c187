//! Store access for the engine
//!
//! Free functions over a `SqlitePool`, one module per table family. Every
//! query is scoped by organization.

pub mod activities;
pub mod customers;
pub mod notes;
pub mod sources;

/// Bind value for `IN (SELECT value FROM json_each(?))` set filters
pub(crate) fn json_set(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}
