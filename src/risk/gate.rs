//! Risk gate: pure decision functions guarding every replication attempt.
//!
//! Checks run in a fixed order and the first failure denies; warnings from
//! the loss and exposure checks are merged into an allowed decision.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{FollowerSubscription, SubscriptionStatus};

/// Gate-level limits that apply to every follower.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Minimum follower equity to copy at all (dust/fee floor)
    pub min_equity: Decimal,

    /// Portfolio exposure cap as percent of equity
    pub max_exposure_pct: Decimal,

    /// Only events younger than this may be copied
    pub max_event_age_secs: i64,

    /// Fraction of a loss limit at which a warning is emitted
    pub loss_warning_ratio: Decimal,

    /// Fraction of the exposure cap at which a warning is emitted
    pub exposure_warning_ratio: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_equity: dec!(10),
            max_exposure_pct: dec!(80),
            max_event_age_secs: 60,
            loss_warning_ratio: dec!(0.8),
            exposure_warning_ratio: dec!(0.9),
        }
    }
}

/// The follower's current risk-relevant state, resolved by the caller.
#[derive(Debug, Clone)]
pub struct FollowerRiskSnapshot {
    pub equity: Decimal,
    pub initial_equity: Decimal,
    pub open_trades: u32,
    pub daily_loss: Decimal,
    pub open_position_value: Decimal,
}

/// Outcome of the gate: allow/deny plus reasons and non-blocking warnings.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,

    /// Set when a total-loss breach should auto-pause the subscription
    pub should_pause: bool,
}

impl RiskDecision {
    fn allow(warnings: Vec<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings,
            should_pause: false,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            should_pause: false,
        }
    }

    fn deny_and_pause(reason: impl Into<String>) -> Self {
        let mut decision = Self::deny(reason);
        decision.should_pause = true;
        decision
    }
}

/// Comprehensive pre-trade risk gate.
#[derive(Debug, Clone, Default)]
pub struct RiskGate {
    limits: RiskLimits,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate every check for one (master event, follower) pair.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        sub: &FollowerSubscription,
        master_id: &str,
        snapshot: &FollowerRiskSnapshot,
        new_position_size: Decimal,
        requested_leverage: Option<Decimal>,
        event_time: Option<DateTime<Utc>>,
    ) -> RiskDecision {
        let mut warnings = Vec::new();

        // 1. Self-copy prevention
        if master_id == sub.follower_id {
            return RiskDecision::deny("Cannot copy own strategy trades");
        }

        // 2. Recency: only near-real-time events may be copied
        if let Some(ts) = event_time {
            let age = (Utc::now() - ts).num_seconds();
            if age > self.limits.max_event_age_secs {
                return RiskDecision::deny(format!(
                    "Event too old to copy: {}s > {}s",
                    age, self.limits.max_event_age_secs
                ));
            }
        }

        // 3. Subscription status
        if sub.status != SubscriptionStatus::Active {
            return RiskDecision::deny(format!(
                "Subscription is not active ({})",
                sub.status.as_str()
            ));
        }

        // 4. Max open trades
        if snapshot.open_trades >= sub.max_open_trades {
            return RiskDecision::deny(format!(
                "Max open trades reached: {} >= {}",
                snapshot.open_trades, sub.max_open_trades
            ));
        }

        // 5. Leverage cap
        if let Some(lev) = requested_leverage {
            if lev > sub.max_leverage {
                return RiskDecision::deny(format!(
                    "Leverage {}x exceeds limit {}x",
                    lev, sub.max_leverage
                ));
            }
        }

        // 6. Daily loss limit
        if let Some(max_daily) = sub.max_daily_loss_pct {
            if snapshot.equity > Decimal::ZERO && snapshot.daily_loss > Decimal::ZERO {
                let loss_pct = snapshot.daily_loss / snapshot.equity * dec!(100);
                if loss_pct >= max_daily {
                    return RiskDecision::deny(format!(
                        "Daily loss limit reached: {:.2}% >= {}%",
                        loss_pct, max_daily
                    ));
                }
                if loss_pct >= max_daily * self.limits.loss_warning_ratio {
                    warnings.push(format!(
                        "Approaching daily loss limit: {:.2}% of {}%",
                        loss_pct, max_daily
                    ));
                }
            }
        }

        // 7. Total loss limit; breach also pauses the subscription
        if let Some(max_total) = sub.max_total_loss_pct {
            if snapshot.initial_equity > Decimal::ZERO {
                let loss_pct = (snapshot.initial_equity - snapshot.equity)
                    / snapshot.initial_equity
                    * dec!(100);
                if loss_pct >= max_total {
                    return RiskDecision::deny_and_pause(format!(
                        "Total loss limit reached: {:.2}% >= {}%",
                        loss_pct, max_total
                    ));
                }
                if loss_pct >= max_total * self.limits.loss_warning_ratio {
                    warnings.push(format!(
                        "Approaching total loss limit: {:.2}% of {}%",
                        loss_pct, max_total
                    ));
                }
            }
        }

        // 8. Minimum equity floor
        if snapshot.equity < self.limits.min_equity {
            return RiskDecision::deny(format!(
                "Insufficient equity: {} below {} minimum",
                snapshot.equity, self.limits.min_equity
            ));
        }

        // 9. Portfolio exposure
        if snapshot.equity > Decimal::ZERO {
            let exposure_pct = (snapshot.open_position_value + new_position_size)
                / snapshot.equity
                * dec!(100);
            if exposure_pct > self.limits.max_exposure_pct {
                return RiskDecision::deny(format!(
                    "Portfolio exposure {:.2}% exceeds {}% cap",
                    exposure_pct, self.limits.max_exposure_pct
                ));
            }
            if exposure_pct > self.limits.max_exposure_pct * self.limits.exposure_warning_ratio {
                warnings.push(format!(
                    "Portfolio exposure at {:.2}% of equity",
                    exposure_pct
                ));
            }
        }

        RiskDecision::allow(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn snapshot() -> FollowerRiskSnapshot {
        FollowerRiskSnapshot {
            equity: dec!(1000),
            initial_equity: dec!(1000),
            open_trades: 0,
            daily_loss: Decimal::ZERO,
            open_position_value: Decimal::ZERO,
        }
    }

    fn gate() -> RiskGate {
        RiskGate::default()
    }

    fn sub() -> FollowerSubscription {
        FollowerSubscription::new("follower-1", "strat-1")
    }

    #[test]
    fn denies_self_copy_regardless_of_other_inputs() {
        let decision = gate().evaluate(&sub(), "follower-1", &snapshot(), dec!(100), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("own strategy"));
    }

    #[test]
    fn denies_stale_events() {
        let stale = Utc::now() - Duration::seconds(120);
        let decision =
            gate().evaluate(&sub(), "master-1", &snapshot(), dec!(100), None, Some(stale));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("too old"));

        let fresh = Utc::now() - Duration::seconds(5);
        let decision =
            gate().evaluate(&sub(), "master-1", &snapshot(), dec!(100), None, Some(fresh));
        assert!(decision.allowed);
    }

    #[test]
    fn denies_inactive_subscription() {
        let mut paused = sub();
        paused.status = SubscriptionStatus::Paused;
        let decision = gate().evaluate(&paused, "master-1", &snapshot(), dec!(100), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("not active"));
    }

    #[test]
    fn denies_at_max_open_trades() {
        let mut snap = snapshot();
        snap.open_trades = 5;
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(100), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Max open trades"));
    }

    #[test]
    fn denies_excess_leverage() {
        let mut s = sub();
        s.max_leverage = dec!(3);
        let decision =
            gate().evaluate(&s, "master-1", &snapshot(), dec!(100), Some(dec!(5)), None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Leverage"));
    }

    #[test]
    fn daily_loss_limit_denies_and_warns() {
        // equity 1000, max daily 5%: 60 loss = 6% -> deny
        let mut snap = snapshot();
        snap.daily_loss = dec!(60);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(100), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Daily loss limit"));

        // 10 loss = 1% -> allowed, no warning
        snap.daily_loss = dec!(10);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(100), None, None);
        assert!(decision.allowed);
        assert!(decision.warnings.is_empty());

        // 45 loss = 4.5% -> allowed with warning at 80% of 5%
        snap.daily_loss = dec!(45);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(100), None, None);
        assert!(decision.allowed);
        assert_eq!(decision.warnings.len(), 1);
    }

    #[test]
    fn total_loss_limit_denies_and_signals_pause() {
        // initial 1000, current 800: 20% loss at a 20% limit
        let mut snap = snapshot();
        snap.equity = dec!(800);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(100), None, None);
        assert!(!decision.allowed);
        assert!(decision.should_pause);
        assert!(decision.reason.unwrap().contains("Total loss limit"));
    }

    #[test]
    fn first_trade_fallback_makes_total_loss_inert() {
        // initial == current: loss ratio is zero even after drawdown elsewhere
        let decision = gate().evaluate(&sub(), "master-1", &snapshot(), dec!(100), None, None);
        assert!(decision.allowed);
    }

    #[test]
    fn denies_below_equity_floor() {
        let mut snap = snapshot();
        snap.equity = dec!(5);
        snap.initial_equity = dec!(5);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(1), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Insufficient equity"));
    }

    #[test]
    fn denies_excess_portfolio_exposure() {
        // 700 open + 200 new = 90% of 1000 equity, above the 80% cap
        let mut snap = snapshot();
        snap.open_position_value = dec!(700);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(200), None, None);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("exposure"));

        // 500 + 250 = 75%: allowed with a warning above 72% (90% of cap)
        snap.open_position_value = dec!(500);
        let decision = gate().evaluate(&sub(), "master-1", &snap, dec!(250), None, None);
        assert!(decision.allowed);
        assert_eq!(decision.warnings.len(), 1);
    }
}
