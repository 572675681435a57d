//! Master execution events: the immutable facts that drive replication.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which market a trade was executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketKind {
    Spot,
    Futures,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Spot => "SPOT",
            MarketKind::Futures => "FUTURES",
        }
    }
}

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// The side that closes a position opened on this side.
    pub fn opposite(&self) -> TradeSide {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }
}

/// What the master did: open a position, close it, or scale part of it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Open,
    Close,
    PartialClose,
}

/// A trade action taken by a strategy owner. Created once per master action;
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterExecutionEvent {
    /// Strategy the trade belongs to
    pub strategy_id: String,

    /// Identity of the strategy owner
    pub master_id: String,

    /// Correlating trade identifier from the master's execution, if known
    #[serde(default)]
    pub trade_id: Option<String>,

    /// Correlating signal identifier, if the trade came from a signal
    #[serde(default)]
    pub signal_id: Option<String>,

    /// Traded symbol (e.g. "BTCUSDT")
    pub symbol: String,

    /// Spot or futures
    pub market: MarketKind,

    /// Trade direction
    pub side: TradeSide,

    /// Leverage the master traded with; `None` for unleveraged spot
    #[serde(default)]
    pub leverage: Option<Decimal>,

    /// Master's position size in quote currency
    pub position_size: Decimal,

    /// Master's entry price (exit price on close events)
    pub entry_price: Decimal,

    /// Optional protective stop
    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    /// Optional profit target
    #[serde(default)]
    pub take_profit: Option<Decimal>,

    /// Open, close, or partial close
    pub action: TradeAction,

    /// When the master's trade executed
    pub timestamp: DateTime<Utc>,
}

impl MasterExecutionEvent {
    /// Identifier used as the master half of the idempotency key.
    ///
    /// The explicit trade id when the upstream supplied one, otherwise a
    /// deterministic composite of strategy, symbol, and execution time.
    pub fn correlation_id(&self) -> String {
        match &self.trade_id {
            Some(id) => id.clone(),
            None => format!(
                "{}-{}-{}",
                self.strategy_id,
                self.symbol,
                self.timestamp.timestamp()
            ),
        }
    }

    /// Age of the event relative to `now`, in seconds.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }

    pub fn is_close(&self) -> bool {
        matches!(self.action, TradeAction::Close | TradeAction::PartialClose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_event(trade_id: Option<&str>) -> MasterExecutionEvent {
        MasterExecutionEvent {
            strategy_id: "strat-1".to_string(),
            master_id: "master-1".to_string(),
            trade_id: trade_id.map(String::from),
            signal_id: None,
            symbol: "BTCUSDT".to_string(),
            market: MarketKind::Futures,
            side: TradeSide::Buy,
            leverage: Some(dec!(3)),
            position_size: dec!(1000),
            entry_price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            action: TradeAction::Open,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn correlation_id_prefers_trade_id() {
        let event = make_event(Some("trade-42"));
        assert_eq!(event.correlation_id(), "trade-42");
    }

    #[test]
    fn correlation_id_synthesized_without_trade_id() {
        let event = make_event(None);
        let id = event.correlation_id();
        assert!(id.starts_with("strat-1-BTCUSDT-"));
        // Deterministic for the same event
        assert_eq!(id, event.correlation_id());
    }

    #[test]
    fn opposite_side_flips() {
        assert_eq!(TradeSide::Buy.opposite(), TradeSide::Sell);
        assert_eq!(TradeSide::Sell.opposite(), TradeSide::Buy);
    }
}
