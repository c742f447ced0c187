//! Reclassification candidate listing
//!
//! Lifecycle labels drift with the calendar even when no data changes. An
//! external scheduler pages through these ids and recalculates them.

use super::CustomerService;
use crate::db::customers;
use crm_common::time::now_ms;
use crm_common::{Error, Result};
use std::str::FromStr;

/// Days-since-last-order windows around the 30/90/180 day lifecycle edges
pub const SMART_WINDOWS: [(i64, i64); 3] = [(28, 33), (88, 96), (178, 186)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Every customer with at least one order
    #[default]
    Full,
    /// Only customers near a lifecycle boundary
    Smart,
}

impl FromStr for RefreshMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(RefreshMode::Full),
            "smart" => Ok(RefreshMode::Smart),
            other => Err(Error::InvalidInput(format!("unknown refresh mode: {other:?}"))),
        }
    }
}

impl CustomerService {
    /// One batch of unified ids due for reclassification
    ///
    /// `batch <= 0` uses the configured batch size.
    pub async fn list_refresh_candidates(
        &self,
        org_id: &str,
        mode: RefreshMode,
        batch: i64,
        skip: i64,
    ) -> Result<Vec<String>> {
        let batch = if batch > 0 { batch } else { self.settings.refresh_batch_size };
        let windows: &[(i64, i64)] = match mode {
            RefreshMode::Full => &[],
            RefreshMode::Smart => &SMART_WINDOWS,
        };
        customers::list_refresh_candidates(&self.db, org_id, windows, now_ms(), batch, skip.max(0)).await
    }
}
