//! Follower subscriptions: one row per (follower, strategy) pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Stopped,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Stopped => "STOPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(SubscriptionStatus::Active),
            "PAUSED" => Some(SubscriptionStatus::Paused),
            "STOPPED" => Some(SubscriptionStatus::Stopped),
            _ => None,
        }
    }
}

/// How a follower's position size is derived from their equity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationMode {
    /// Allocation value is a percentage of equity (0-100)
    Percent,
    /// Allocation value is a flat amount in quote currency
    Fixed,
}

impl AllocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMode::Percent => "PERCENT",
            AllocationMode::Fixed => "FIXED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PERCENT" => Some(AllocationMode::Percent),
            "FIXED" => Some(AllocationMode::Fixed),
            _ => None,
        }
    }
}

/// A follower's subscription to a strategy, including their sizing and risk
/// configuration. Mutated by the follower, by the risk gate (auto-pause), or
/// by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerSubscription {
    /// Subscription row id
    pub id: String,

    /// Identity of the subscribing follower
    pub follower_id: String,

    /// Strategy being followed
    pub strategy_id: String,

    pub status: SubscriptionStatus,

    pub allocation_mode: AllocationMode,

    /// Percent of equity (PERCENT mode) or quote amount (FIXED mode)
    pub allocation_value: Decimal,

    /// Daily realized-loss limit as a percent of equity, if set
    #[serde(default)]
    pub max_daily_loss_pct: Option<Decimal>,

    /// Total loss limit as a percent of initial equity, if set
    #[serde(default)]
    pub max_total_loss_pct: Option<Decimal>,

    /// Maximum concurrent open copied trades
    pub max_open_trades: u32,

    /// Hard cap on leverage for this follower
    pub max_leverage: Decimal,

    /// Linear scaling factor applied after allocation (1.0 = unscaled)
    #[serde(default = "default_risk_multiplier")]
    pub risk_multiplier: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_risk_multiplier() -> Decimal {
    Decimal::ONE
}

impl FollowerSubscription {
    /// A subscription with conservative defaults, used by tests and the
    /// simulate command.
    pub fn new(follower_id: impl Into<String>, strategy_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            follower_id: follower_id.into(),
            strategy_id: strategy_id.into(),
            status: SubscriptionStatus::Active,
            allocation_mode: AllocationMode::Percent,
            allocation_value: dec!(10),
            max_daily_loss_pct: Some(dec!(5)),
            max_total_loss_pct: Some(dec!(20)),
            max_open_trades: 5,
            max_leverage: dec!(10),
            risk_multiplier: Decimal::ONE,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}
