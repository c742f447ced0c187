//! Classification engine
//!
//! Pure mapping from aggregated metrics to the journey stage and the five
//! segmentation axes. No I/O; the reference time is an argument so historical
//! ("as of") classifications use the same rules as live ones.

use crm_common::models::{
    Channel, Classification, ConversationMetrics, JourneyStage, LifecycleStage, LoyaltyStage,
    MomentumStage, OrderMetrics, ValueTier,
};
use crm_common::time::days_since;

pub const VALUE_VIP: f64 = 50_000_000.0;
pub const VALUE_HIGH: f64 = 20_000_000.0;
pub const VALUE_MEDIUM: f64 = 5_000_000.0;
pub const VALUE_LOW: f64 = 1_000_000.0;

pub const LIFECYCLE_ACTIVE_DAYS: i64 = 30;
pub const LIFECYCLE_COOLING_DAYS: i64 = 90;
pub const LIFECYCLE_INACTIVE_DAYS: i64 = 180;

pub const LOYALTY_CORE_ORDERS: i64 = 5;
pub const LOYALTY_REPEAT_ORDERS: i64 = 2;

/// 30-day revenue share of 90-day revenue above which momentum is rising
pub const MOMENTUM_RISING_RATIO: f64 = 0.5;

/// Classify a customer against `reference_ms`
pub fn classify(
    orders: &OrderMetrics,
    conversations: &ConversationMetrics,
    reference_ms: i64,
) -> Classification {
    let days = if orders.order_count > 0 {
        days_since(reference_ms, orders.last_order_at)
    } else {
        -1
    };

    Classification {
        journey_stage: journey_stage(orders, conversations.has_conversation, days),
        value_tier: value_tier(orders.total_spent),
        lifecycle_stage: lifecycle_stage(days),
        channel: channel(orders),
        loyalty_stage: loyalty_stage(orders.order_count),
        momentum_stage: momentum_stage(orders, days),
        days_since_last_order: days,
    }
}

pub fn journey_stage(orders: &OrderMetrics, has_conversation: bool, days: i64) -> JourneyStage {
    if orders.order_count == 0 {
        return if has_conversation {
            JourneyStage::Engaged
        } else {
            JourneyStage::Visitor
        };
    }
    if days > LIFECYCLE_COOLING_DAYS {
        JourneyStage::Inactive
    } else if orders.total_spent >= VALUE_VIP {
        JourneyStage::Vip
    } else if orders.order_count >= 2 {
        JourneyStage::Repeat
    } else {
        JourneyStage::First
    }
}

pub fn value_tier(total_spent: f64) -> ValueTier {
    if total_spent >= VALUE_VIP {
        ValueTier::Vip
    } else if total_spent >= VALUE_HIGH {
        ValueTier::High
    } else if total_spent >= VALUE_MEDIUM {
        ValueTier::Medium
    } else if total_spent >= VALUE_LOW {
        ValueTier::Low
    } else {
        ValueTier::New
    }
}

/// `days` is -1 when the customer never ordered
pub fn lifecycle_stage(days: i64) -> LifecycleStage {
    match days {
        d if d < 0 => LifecycleStage::NeverPurchased,
        d if d <= LIFECYCLE_ACTIVE_DAYS => LifecycleStage::Active,
        d if d <= LIFECYCLE_COOLING_DAYS => LifecycleStage::Cooling,
        d if d <= LIFECYCLE_INACTIVE_DAYS => LifecycleStage::Inactive,
        _ => LifecycleStage::Dead,
    }
}

pub fn channel(orders: &OrderMetrics) -> Channel {
    match (orders.order_count_online > 0, orders.order_count_offline > 0) {
        _ if orders.order_count == 0 => Channel::Unset,
        (true, true) => Channel::Omnichannel,
        (true, false) => Channel::Online,
        (false, true) => Channel::Offline,
        (false, false) => Channel::Unset,
    }
}

pub fn loyalty_stage(order_count: i64) -> LoyaltyStage {
    if order_count >= LOYALTY_CORE_ORDERS {
        LoyaltyStage::Core
    } else if order_count >= LOYALTY_REPEAT_ORDERS {
        LoyaltyStage::Repeat
    } else if order_count >= 1 {
        LoyaltyStage::OneTime
    } else {
        LoyaltyStage::Unset
    }
}

/// Customers without any trailing-30-day revenue are `lost` unless they still
/// have 90-day revenue (`declining`); a ratio of exactly 0.5 is `stable`.
pub fn momentum_stage(orders: &OrderMetrics, days: i64) -> MomentumStage {
    let rev30 = orders.revenue_last_30d;
    let rev90 = orders.revenue_last_90d;

    if days > LIFECYCLE_COOLING_DAYS {
        return MomentumStage::Lost;
    }
    if rev90 <= 0.0 && orders.total_spent > 0.0 {
        return MomentumStage::Lost;
    }
    if rev90 > 0.0 && rev30 <= 0.0 {
        return MomentumStage::Declining;
    }
    if rev30 <= 0.0 {
        return MomentumStage::Lost;
    }

    let ratio = rev30 / rev90.max(1.0);
    if ratio > MOMENTUM_RISING_RATIO {
        MomentumStage::Rising
    } else {
        MomentumStage::Stable
    }
}
