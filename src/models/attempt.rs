//! Copy attempt records: the append-only audit trail of replication.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::event::{MarketKind, MasterExecutionEvent, TradeSide};
use super::position::CalculatedPosition;
use super::subscription::FollowerSubscription;

/// Terminal outcome of one (master event, follower) replication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CopyStatus {
    Executed,
    Failed,
    Skipped,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Executed => "EXECUTED",
            CopyStatus::Failed => "FAILED",
            CopyStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXECUTED" => Some(CopyStatus::Executed),
            "FAILED" => Some(CopyStatus::Failed),
            "SKIPPED" => Some(CopyStatus::Skipped),
            _ => None,
        }
    }
}

/// One audited attempt to replicate one master event to one follower.
///
/// This is the system of record for idempotency (the store enforces
/// uniqueness of (master_event_id, follower_id)) and for follower
/// performance statistics once attempts are closed out with realized PnL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyAttemptRecord {
    /// Attempt row id
    pub id: String,

    /// Correlation id of the master event (idempotency key, master half)
    pub master_event_id: String,

    pub strategy_id: String,
    pub master_id: String,
    pub follower_id: String,

    pub symbol: String,
    pub side: TradeSide,
    pub market: MarketKind,
    pub leverage: Decimal,

    /// Master's position size in quote currency
    pub master_size: Decimal,

    /// Follower's computed position size in quote currency
    pub follower_size: Decimal,

    /// Master's entry price at open (used for close-flow PnL fallback)
    pub entry_price: Decimal,

    /// Follower equity immediately before allocation
    pub equity_at_open: Decimal,

    /// Percent of equity allocated before execution
    pub allocation_before: Decimal,

    /// Placeholder equal to `allocation_before` until a reconciliation pass
    /// recomputes it post-execution
    pub allocation_after: Decimal,

    pub status: CopyStatus,

    /// Denial reason or executor error, present for SKIPPED and FAILED
    #[serde(default)]
    pub failure_reason: Option<String>,

    /// Executor-assigned trade id when execution succeeded
    #[serde(default)]
    pub executor_trade_id: Option<String>,

    pub opened_at: DateTime<Utc>,

    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,

    /// Realized PnL in quote currency, set when the position closes
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

impl CopyAttemptRecord {
    /// Build a record for an event/follower pair with the given outcome.
    pub fn from_event(
        event: &MasterExecutionEvent,
        sub: &FollowerSubscription,
        position: &CalculatedPosition,
        equity: Decimal,
        status: CopyStatus,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            master_event_id: event.correlation_id(),
            strategy_id: event.strategy_id.clone(),
            master_id: event.master_id.clone(),
            follower_id: sub.follower_id.clone(),
            symbol: event.symbol.clone(),
            side: event.side,
            market: event.market,
            leverage: position.leverage,
            master_size: event.position_size,
            follower_size: position.position_size,
            entry_price: event.entry_price,
            equity_at_open: equity,
            allocation_before: position.allocation_before,
            allocation_after: position.allocation_after,
            status,
            failure_reason,
            executor_trade_id: None,
            opened_at: event.timestamp,
            closed_at: None,
            realized_pnl: None,
        }
    }

    /// An attempt that executed and has not yet been closed out.
    pub fn is_open(&self) -> bool {
        self.status == CopyStatus::Executed && self.closed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::TradeAction;
    use rust_decimal_macros::dec;

    #[test]
    fn from_event_carries_idempotency_key() {
        let event = MasterExecutionEvent {
            strategy_id: "strat-1".to_string(),
            master_id: "master-1".to_string(),
            trade_id: Some("trade-9".to_string()),
            signal_id: None,
            symbol: "ETHUSDT".to_string(),
            market: MarketKind::Spot,
            side: TradeSide::Buy,
            leverage: None,
            position_size: dec!(500),
            entry_price: dec!(3000),
            stop_loss: None,
            take_profit: None,
            action: TradeAction::Open,
            timestamp: Utc::now(),
        };
        let sub = FollowerSubscription::new("follower-1", "strat-1");
        let position = CalculatedPosition {
            position_size: dec!(100),
            leverage: dec!(1),
            allocation_before: dec!(10),
            allocation_after: dec!(10),
        };

        let record = CopyAttemptRecord::from_event(
            &event,
            &sub,
            &position,
            dec!(1000),
            CopyStatus::Executed,
            None,
        );

        assert_eq!(record.master_event_id, "trade-9");
        assert_eq!(record.follower_id, "follower-1");
        assert_eq!(record.equity_at_open, dec!(1000));
        assert!(record.is_open());
    }
}
