//! Derived position sizing output. Never persisted as-is.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The concrete sizing decision for one follower on one master event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatedPosition {
    /// Position size in quote currency, in [0, follower equity]
    pub position_size: Decimal,

    /// Resolved leverage after capping against the follower's maximum
    pub leverage: Decimal,

    /// Percent of equity this position consumes, capped at 100
    pub allocation_before: Decimal,

    /// Identical to `allocation_before`; a post-execution reconciliation
    /// pass would recompute this
    pub allocation_after: Decimal,
}

impl CalculatedPosition {
    /// A zero-size result, used when equity or price make sizing impossible.
    pub fn zero(leverage: Decimal) -> Self {
        Self {
            position_size: Decimal::ZERO,
            leverage,
            allocation_before: Decimal::ZERO,
            allocation_after: Decimal::ZERO,
        }
    }

    pub fn is_viable(&self) -> bool {
        self.position_size > Decimal::ZERO
    }
}
