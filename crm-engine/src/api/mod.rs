//! HTTP API handlers
//!
//! Every route below `/api/orgs/:org` is scoped to one organization.

pub mod admin;
pub mod customers;
pub mod dashboard;
pub mod health;
pub mod notes;
pub mod sources;

pub use admin::admin_routes;
pub use customers::customer_routes;
pub use dashboard::dashboard_routes;
pub use health::health_routes;
pub use notes::note_routes;
pub use sources::source_routes;

/// Split a comma-separated query value, dropping blanks
pub(crate) fn split_list(raw: Option<&str>) -> Vec<&str> {
    raw.map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("order, note,,")), vec!["order", "note"]);
        assert!(split_list(Some("")).is_empty());
        assert!(split_list(None).is_empty());
    }
}
