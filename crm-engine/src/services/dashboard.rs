//! Read-only dashboard aggregations over persisted customers
//!
//! Everything here reads the denormalized label columns; nothing is
//! recomputed on the fly except days since the last order. The one
//! exception is [`Dashboard::distribution_as_of`], which reads the activity
//! history's snapshots to show the customer base at a past moment.

use crate::db::activities;
use crate::db::customers::{self, CustomerFilter, SortField};
use crate::pagination::{calculate_pagination, Page};
use crm_common::config::EngineSettings;
use crm_common::models::{Axis, JourneyStage, UnifiedCustomer};
use crm_common::time::{days_since, now_ms};
use crm_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Overlapping customer segments surfaced for follow-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityGroup {
    VipActive,
    VipInactive,
    Rising,
    New,
    OneTime,
    Dead,
}

impl PriorityGroup {
    pub const ALL: &'static [PriorityGroup] = &[
        PriorityGroup::VipActive,
        PriorityGroup::VipInactive,
        PriorityGroup::Rising,
        PriorityGroup::New,
        PriorityGroup::OneTime,
        PriorityGroup::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityGroup::VipActive => "vip_active",
            PriorityGroup::VipInactive => "vip_inactive",
            PriorityGroup::Rising => "rising",
            PriorityGroup::New => "new",
            PriorityGroup::OneTime => "one_time",
            PriorityGroup::Dead => "dead",
        }
    }

    /// SQL membership condition over the label columns
    pub(crate) fn condition(&self) -> &'static str {
        match self {
            PriorityGroup::VipActive => "value_tier = 'vip' AND lifecycle_stage = 'active'",
            PriorityGroup::VipInactive => "value_tier = 'vip' AND lifecycle_stage IN ('inactive', 'dead')",
            PriorityGroup::Rising => "momentum_stage = 'rising'",
            PriorityGroup::New => "journey_stage = 'first' OR value_tier = 'new'",
            PriorityGroup::OneTime => "loyalty_stage = 'one_time'",
            PriorityGroup::Dead => "lifecycle_stage = 'dead'",
        }
    }
}

impl FromStr for PriorityGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PriorityGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown priority group: {s:?}")))
    }
}

/// Parse a dashboard sort key (`totalSpend`, `lastOrderAt`, `name`)
pub fn parse_sort_field(s: &str) -> Result<SortField> {
    match s {
        "totalSpend" => Ok(SortField::TotalSpend),
        "lastOrderAt" => Ok(SortField::LastOrderAt),
        "name" => Ok(SortField::Name),
        other => Err(Error::InvalidInput(format!("unknown sort field: {other:?}"))),
    }
}

/// Map retired journey filter spellings onto current stages
///
/// `None` means the value names a stage that no longer exists and the journey
/// filter should be ignored.
pub fn normalize_journey_filter(value: &str) -> Option<String> {
    match value {
        "engaged_online" => Some(JourneyStage::Engaged.as_str().to_string()),
        "first_online" | "first_offline" => Some(JourneyStage::First.as_str().to_string()),
        "omni" | "reactivated" => None,
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct DashboardQuery {
    /// Accepted labels per axis; several labels for one axis are alternatives
    pub labels: Vec<(Axis, Vec<String>)>,
    pub groups: Vec<PriorityGroup>,
    pub sort: SortField,
    pub ascending: bool,
    pub page: i64,
    /// Set when a filter value can never match (retired journey stages)
    pub match_nothing: bool,
}

impl Default for DashboardQuery {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            groups: Vec::new(),
            sort: SortField::TotalSpend,
            ascending: false,
            page: 1,
            match_nothing: false,
        }
    }
}

impl DashboardQuery {
    fn filter(&self) -> CustomerFilter {
        CustomerFilter {
            labels: self.labels.clone(),
            group_conditions: self.groups.iter().map(PriorityGroup::condition).collect(),
            match_nothing: self.match_nothing,
        }
    }
}

/// Label counts per axis over the customer base as it stood at `as_of`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub as_of: i64,
    /// Customers with a snapshot at or before `as_of`
    pub total: i64,
    pub axes: Vec<(Axis, Vec<LabelCount>)>,
}

/// Where an axis label lives inside a metrics snapshot
fn snapshot_field(axis: Axis) -> (&'static str, &'static str) {
    match axis {
        Axis::Journey => ("layer1", "journeyStage"),
        Axis::Channel => ("layer2", "channel"),
        Axis::Value => ("layer2", "valueTier"),
        Axis::Lifecycle => ("layer2", "lifecycleStage"),
        Axis::Loyalty => ("layer2", "loyaltyStage"),
        Axis::Momentum => ("layer2", "momentumStage"),
    }
}

/// Customer row as shown in dashboard lists
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardItem {
    pub unified_id: String,
    pub name: String,
    pub phone: String,
    pub journey_stage: &'static str,
    pub channel: &'static str,
    pub value_tier: &'static str,
    pub lifecycle_stage: &'static str,
    pub loyalty_stage: &'static str,
    pub momentum_stage: &'static str,
    pub total_spend: f64,
    pub order_count: i64,
    pub avg_order_value: f64,
    pub revenue_last_30d: f64,
    pub revenue_last_90d: f64,
    pub last_order_at: i64,
    pub days_since_last_order: i64,
    pub last_conversation_at: i64,
    pub sources: Vec<&'static str>,
}

impl DashboardItem {
    fn new(c: &UnifiedCustomer, now: i64) -> Self {
        let class = &c.metrics.classification;
        let orders = &c.metrics.orders;
        let mut sources = Vec::new();
        if c.source_ids.pos.is_some() {
            sources.push("pos");
        }
        if c.source_ids.messaging.is_some() {
            sources.push("messaging");
        }
        Self {
            unified_id: c.unified_id.clone(),
            name: c.profile.name.clone(),
            phone: c.profile.phone_numbers.first().cloned().unwrap_or_default(),
            journey_stage: class.journey_stage.as_str(),
            channel: class.channel.as_str(),
            value_tier: class.value_tier.as_str(),
            lifecycle_stage: class.lifecycle_stage.as_str(),
            loyalty_stage: class.loyalty_stage.as_str(),
            momentum_stage: class.momentum_stage.as_str(),
            total_spend: orders.total_spent,
            order_count: orders.order_count,
            avg_order_value: orders.avg_order_value,
            revenue_last_30d: orders.revenue_last_30d,
            revenue_last_90d: orders.revenue_last_90d,
            last_order_at: orders.last_order_at,
            days_since_last_order: days_since(now, orders.last_order_at),
            last_conversation_at: c.metrics.conversations.last_conversation_at,
            sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: &'static str,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub count: i64,
    /// `(axis, counts)` pairs, labels in display order
    pub breakdowns: Vec<(Axis, Vec<LabelCount>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group: PriorityGroup,
    pub count: i64,
    pub top: Vec<DashboardItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Matrix {
    pub row_axis: Axis,
    pub col_axis: Axis,
    pub rows: Vec<&'static str>,
    pub cols: Vec<&'static str>,
    /// `cells[r][c]`, aligned with `rows` and `cols`
    pub cells: Vec<Vec<i64>>,
    pub total: i64,
}

#[derive(Clone)]
pub struct Dashboard {
    db: SqlitePool,
    settings: Arc<EngineSettings>,
}

impl Dashboard {
    pub fn new(db: SqlitePool, settings: Arc<EngineSettings>) -> Self {
        Self { db, settings }
    }

    pub async fn list_customers(&self, org_id: &str, query: &DashboardQuery) -> Result<Page<DashboardItem>> {
        let filter = query.filter();
        let total = customers::count_filtered(&self.db, org_id, &filter).await?;
        let pagination = calculate_pagination(total, query.page, self.settings.dashboard_page_size);
        let rows = customers::list_filtered(
            &self.db,
            org_id,
            &filter,
            query.sort,
            query.ascending,
            pagination.page_size,
            pagination.offset,
        )
        .await?;

        let now = now_ms();
        Ok(Page {
            items: rows.iter().map(|c| DashboardItem::new(c, now)).collect(),
            total,
            pagination,
        })
    }

    /// Six journey stages in order, each broken down along the other axes
    pub async fn journey_funnel(&self, org_id: &str) -> Result<Vec<FunnelStage>> {
        let axes = [Axis::Channel, Axis::Value, Axis::Lifecycle, Axis::Loyalty, Axis::Momentum];
        let mut per_axis = Vec::with_capacity(axes.len());
        for axis in axes {
            let cells = customers::count_by_axes(&self.db, org_id, Axis::Journey, axis).await?;
            per_axis.push((axis, index_cells(cells)));
        }

        let funnel = JourneyStage::ALL
            .iter()
            .map(|stage| {
                let stage = stage.as_str();
                let breakdowns: Vec<(Axis, Vec<LabelCount>)> = per_axis
                    .iter()
                    .map(|(axis, cells)| {
                        let counts = axis
                            .labels()
                            .into_iter()
                            .map(|label| LabelCount {
                                label,
                                count: cells.get(&(stage.to_string(), label.to_string())).copied().unwrap_or(0),
                            })
                            .collect();
                        (*axis, counts)
                    })
                    .collect();
                let count = breakdowns
                    .first()
                    .map(|(_, counts)| counts.iter().map(|c| c.count).sum())
                    .unwrap_or(0);
                FunnelStage { stage, count, breakdowns }
            })
            .collect();
        Ok(funnel)
    }

    /// Each priority group with its size and top members by spend
    pub async fn priority_groups(&self, org_id: &str, top_n: Option<i64>) -> Result<Vec<GroupSummary>> {
        let top_n = top_n.filter(|n| *n > 0).unwrap_or(self.settings.priority_group_top_n);
        let now = now_ms();
        let mut groups = Vec::with_capacity(PriorityGroup::ALL.len());
        for group in PriorityGroup::ALL {
            let filter = CustomerFilter {
                group_conditions: vec![group.condition()],
                ..CustomerFilter::default()
            };
            let count = customers::count_filtered(&self.db, org_id, &filter).await?;
            let top = customers::list_filtered(&self.db, org_id, &filter, SortField::TotalSpend, false, top_n, 0)
                .await?
                .iter()
                .map(|c| DashboardItem::new(c, now))
                .collect();
            groups.push(GroupSummary { group: *group, count, top });
        }
        Ok(groups)
    }

    /// Customer counts for any pair of axes in fixed label order
    pub async fn matrix(&self, org_id: &str, row_axis: Axis, col_axis: Axis) -> Result<Matrix> {
        let rows = row_axis.labels();
        let cols = col_axis.labels();
        let raw = customers::count_by_axes(&self.db, org_id, row_axis, col_axis).await?;
        let total: i64 = raw.iter().map(|(_, _, n)| n).sum();
        let cells_by_key = index_cells(raw);

        let cells = rows
            .iter()
            .map(|r| {
                cols.iter()
                    .map(|c| cells_by_key.get(&(r.to_string(), c.to_string())).copied().unwrap_or(0))
                    .collect()
            })
            .collect();
        Ok(Matrix {
            row_axis,
            col_axis,
            rows,
            cols,
            cells,
            total,
        })
    }
}

impl Dashboard {
    /// Classification distribution rebuilt from each customer's latest
    /// history snapshot at or before `as_of`
    ///
    /// Labels a snapshot carries that are no longer known are left out of
    /// the per-axis counts but still count toward `total`.
    pub async fn distribution_as_of(&self, org_id: &str, as_of: i64) -> Result<Distribution> {
        let snapshots = activities::latest_snapshots_per_customer(&self.db, org_id, as_of).await?;

        let axes = Axis::ALL
            .iter()
            .map(|&axis| {
                let (layer, key) = snapshot_field(axis);
                let counts = axis
                    .labels()
                    .into_iter()
                    .map(|label| {
                        let count = snapshots
                            .iter()
                            .filter(|(_, snap)| {
                                snap.get(layer).and_then(|l| l.get(key)).and_then(|v| v.as_str()) == Some(label)
                            })
                            .count() as i64;
                        LabelCount { label, count }
                    })
                    .collect();
                (axis, counts)
            })
            .collect();

        Ok(Distribution {
            as_of,
            total: snapshots.len() as i64,
            axes,
        })
    }
}

fn index_cells(cells: Vec<(String, String, i64)>) -> HashMap<(String, String), i64> {
    cells.into_iter().map(|(r, c, n)| ((r, c), n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_common::db::init_memory_database;
    use crm_common::models::{
        Classification, LifecycleStage, LoyaltyStage, MomentumStage, Source, ValueTier,
    };

    async fn seed(pool: &SqlitePool, id: &str, class: Classification, spent: f64) {
        let mut c = UnifiedCustomer::standalone("org", Source::Pos, id, 1);
        c.profile.name = id.to_uppercase();
        c.metrics.classification = class;
        c.metrics.orders.total_spent = spent;
        customers::save_customer(pool, &c).await.unwrap();
    }

    async fn dashboard() -> Dashboard {
        let pool = init_memory_database().await.unwrap();
        let vip = Classification {
            journey_stage: JourneyStage::Vip,
            value_tier: ValueTier::Vip,
            lifecycle_stage: LifecycleStage::Active,
            loyalty_stage: LoyaltyStage::Core,
            momentum_stage: MomentumStage::Rising,
            ..Classification::default()
        };
        let lapsed = Classification {
            journey_stage: JourneyStage::Inactive,
            value_tier: ValueTier::Vip,
            lifecycle_stage: LifecycleStage::Dead,
            loyalty_stage: LoyaltyStage::Repeat,
            momentum_stage: MomentumStage::Lost,
            ..Classification::default()
        };
        seed(&pool, "a", vip, 90.0).await;
        seed(&pool, "b", vip, 60.0).await;
        seed(&pool, "c", lapsed, 70.0).await;
        seed(&pool, "d", Classification::default(), 0.0).await;
        Dashboard::new(pool, Arc::new(EngineSettings::default()))
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!("one_time".parse::<PriorityGroup>().unwrap(), PriorityGroup::OneTime);
        assert!("whales".parse::<PriorityGroup>().is_err());
        assert_eq!(parse_sort_field("name").unwrap(), SortField::Name);
        assert_eq!(normalize_journey_filter("first_online").as_deref(), Some("first"));
        assert_eq!(normalize_journey_filter("omni"), None);
    }

    #[tokio::test]
    async fn test_distribution_as_of_reads_history() {
        use crate::services::{ActivityDraft, ActivityRecorder, RecordMode};
        use crm_common::models::{CustomerMetrics, SourceRef};

        let d = dashboard().await;
        let recorder = ActivityRecorder::new(d.db.clone(), None);
        let record = |id: &'static str, at: i64, class: Classification| {
            let recorder = recorder.clone();
            async move {
                let c = UnifiedCustomer::standalone("org", Source::Pos, id, 1);
                let metrics = CustomerMetrics {
                    classification: class,
                    computed_at: at,
                    ..CustomerMetrics::default()
                };
                let draft = ActivityDraft::new(&c, "customer_updated", "system", at)
                    .source_ref(SourceRef::new("trigger", "recalculate"));
                recorder.record_change(draft, &c, &metrics, RecordMode::Change).await.unwrap();
            }
        };
        let vip = Classification {
            journey_stage: JourneyStage::Vip,
            value_tier: ValueTier::Vip,
            lifecycle_stage: LifecycleStage::Active,
            ..Classification::default()
        };
        let lapsed = Classification {
            lifecycle_stage: LifecycleStage::Dead,
            ..vip
        };
        record("x", 100, vip).await;
        record("y", 150, Classification::default()).await;
        record("x", 200, lapsed).await;

        let count = |dist: &Distribution, axis: Axis, label: &str| {
            let (_, counts) = dist.axes.iter().find(|(a, _)| *a == axis).unwrap();
            counts.iter().find(|c| c.label == label).unwrap().count
        };

        let early = d.distribution_as_of("org", 120).await.unwrap();
        assert_eq!(early.total, 1);
        assert_eq!(count(&early, Axis::Value, "vip"), 1);
        assert_eq!(count(&early, Axis::Lifecycle, "active"), 1);

        let late = d.distribution_as_of("org", 250).await.unwrap();
        assert_eq!(late.total, 2);
        assert_eq!(count(&late, Axis::Lifecycle, "active"), 0);
        assert_eq!(count(&late, Axis::Lifecycle, "dead"), 1);
        assert_eq!(count(&late, Axis::Journey, "vip"), 1);

        assert_eq!(d.distribution_as_of("org", 50).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_match_nothing_lists_no_one() {
        let d = dashboard().await;
        let query = DashboardQuery {
            match_nothing: true,
            ..Default::default()
        };
        let page = d.list_customers("org", &query).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let d = dashboard().await;
        let query = DashboardQuery {
            labels: vec![(Axis::Value, vec!["vip".into()])],
            ..Default::default()
        };
        let page = d.list_customers("org", &query).await.unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.items.iter().map(|i| i.unified_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        let by_group = DashboardQuery {
            groups: vec![PriorityGroup::VipInactive, PriorityGroup::Dead],
            sort: SortField::Name,
            ascending: true,
            ..Default::default()
        };
        let page = d.list_customers("org", &by_group).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].unified_id, "c");
    }

    #[tokio::test]
    async fn test_funnel_has_every_stage() {
        let d = dashboard().await;
        let funnel = d.journey_funnel("org").await.unwrap();
        let stages: Vec<_> = funnel.iter().map(|s| s.stage).collect();
        assert_eq!(stages, vec!["visitor", "engaged", "first", "repeat", "vip", "inactive"]);
        let vip = funnel.iter().find(|s| s.stage == "vip").unwrap();
        assert_eq!(vip.count, 2);
        let (_, loyalty) = vip.breakdowns.iter().find(|(a, _)| *a == Axis::Loyalty).unwrap();
        assert_eq!(loyalty[0], LabelCount { label: "core", count: 2 });
        assert_eq!(funnel[0].count, 1);
    }

    #[tokio::test]
    async fn test_priority_groups_and_matrix() {
        let d = dashboard().await;
        let groups = d.priority_groups("org", Some(1)).await.unwrap();
        let vip_active = groups.iter().find(|g| g.group == PriorityGroup::VipActive).unwrap();
        assert_eq!(vip_active.count, 2);
        assert_eq!(vip_active.top.len(), 1);
        assert_eq!(vip_active.top[0].unified_id, "a");
        // default customer is value tier "new"
        let new = groups.iter().find(|g| g.group == PriorityGroup::New).unwrap();
        assert_eq!(new.count, 1);

        let m = d.matrix("org", Axis::Value, Axis::Lifecycle).await.unwrap();
        assert_eq!(m.rows, vec!["vip", "high", "medium", "low", "new"]);
        assert_eq!(m.cols, vec!["active", "cooling", "inactive", "dead", "never_purchased"]);
        assert_eq!(m.cells[0][0], 2);
        assert_eq!(m.cells[0][3], 1);
        assert_eq!(m.cells[4][4], 1);
        assert_eq!(m.total, 4);
    }
}
