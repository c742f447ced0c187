//! Order-side metrics aggregation

use crm_common::models::{OrderMetrics, OrderRecord, OrderSource};
use crm_common::time::MS_PER_DAY;

/// Aggregate orders dated at or before `as_of`
///
/// Cancelled orders only feed `cancelled_order_count`. Orders without a
/// usable date count toward totals but not toward the trailing windows.
pub fn aggregate_orders(orders: &[OrderRecord], as_of: i64) -> OrderMetrics {
    let mut m = OrderMetrics::default();
    let window_30 = as_of - 30 * MS_PER_DAY;
    let window_90 = as_of - 90 * MS_PER_DAY;

    // (date, online) of every counted order, for recency and channel ordering
    let mut dated: Vec<(i64, bool)> = Vec::new();

    for order in orders {
        let date = order.order_at().unwrap_or(0);
        if date > as_of {
            continue;
        }
        if order.is_cancelled() {
            m.cancelled_order_count += 1;
            continue;
        }

        let amount = order.amount();
        let online = order.is_online();
        m.order_count += 1;
        m.total_spent += amount;

        if online {
            m.order_count_online += 1;
        } else {
            m.order_count_offline += 1;
        }

        match order.order_source() {
            OrderSource::Ads => m.orders_from_ads += 1,
            OrderSource::Organic => m.orders_from_organic += 1,
            OrderSource::Direct => m.orders_from_direct += 1,
        }

        for line in order.lines() {
            *m.owned_sku_quantities.entry(line.sku).or_insert(0) += line.quantity;
        }

        if date > 0 {
            if date >= window_30 {
                m.revenue_last_30d += amount;
                m.orders_last_30d += 1;
            }
            if date >= window_90 {
                m.revenue_last_90d += amount;
                m.orders_last_90d += 1;
            }
        }
        dated.push((date, online));
    }

    if m.order_count > 0 {
        m.avg_order_value = m.total_spent / m.order_count as f64;
    }

    dated.sort_by_key(|(date, _)| *date);
    let label = |online: bool| if online { "online" } else { "offline" }.to_string();
    if let Some((_, online)) = dated.first() {
        m.first_order_channel = label(*online);
    }
    if let Some((_, online)) = dated.last() {
        m.last_order_channel = label(*online);
    }

    let mut dates: Vec<i64> = dated.iter().map(|(d, _)| *d).filter(|d| *d > 0).collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    m.last_order_at = dates.first().copied().unwrap_or(0);
    m.second_last_order_at = dates.get(1).copied().unwrap_or(0);

    m
}
