//! Bounds-checking and clamping of follower configuration before it is
//! persisted or used by the sizing and gate paths.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{AllocationMode, FollowerSubscription};

/// Legal ranges for follower subscription values.
pub const MIN_RISK_MULTIPLIER: Decimal = dec!(0.1);
pub const MAX_RISK_MULTIPLIER: Decimal = dec!(10);
pub const MIN_LEVERAGE: Decimal = dec!(1);
pub const MAX_LEVERAGE: Decimal = dec!(125);
pub const MAX_OPEN_TRADES_CEILING: u32 = 100;

/// Clamp a subscription's numeric configuration into legal ranges.
///
/// Used at subscription-write time so out-of-range values never reach the
/// sizing calculator or the risk gate.
pub fn sanitize(mut sub: FollowerSubscription) -> FollowerSubscription {
    sub.allocation_value = match sub.allocation_mode {
        AllocationMode::Percent => sub.allocation_value.clamp(Decimal::ZERO, dec!(100)),
        AllocationMode::Fixed => sub.allocation_value.max(Decimal::ZERO),
    };

    sub.risk_multiplier = sub
        .risk_multiplier
        .clamp(MIN_RISK_MULTIPLIER, MAX_RISK_MULTIPLIER);

    sub.max_leverage = sub.max_leverage.clamp(MIN_LEVERAGE, MAX_LEVERAGE);

    sub.max_open_trades = sub.max_open_trades.clamp(1, MAX_OPEN_TRADES_CEILING);

    sub.max_daily_loss_pct = sub
        .max_daily_loss_pct
        .map(|v| v.clamp(dec!(0.1), dec!(100)));
    sub.max_total_loss_pct = sub
        .max_total_loss_pct
        .map(|v| v.clamp(dec!(0.1), dec!(100)));

    sub
}

/// Report hard configuration errors that clamping cannot repair.
pub fn validate(sub: &FollowerSubscription) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if sub.follower_id.trim().is_empty() {
        errors.push("follower_id must not be empty".to_string());
    }
    if sub.strategy_id.trim().is_empty() {
        errors.push("strategy_id must not be empty".to_string());
    }
    if sub.allocation_value <= Decimal::ZERO {
        errors.push(format!(
            "allocation_value must be positive, got {}",
            sub.allocation_value
        ));
    }
    if sub.allocation_mode == AllocationMode::Percent && sub.allocation_value > dec!(100) {
        errors.push(format!(
            "percent allocation cannot exceed 100, got {}",
            sub.allocation_value
        ));
    }
    if sub.max_leverage < MIN_LEVERAGE {
        errors.push(format!("max_leverage must be at least 1, got {}", sub.max_leverage));
    }
    if sub.max_open_trades == 0 {
        errors.push("max_open_trades must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
