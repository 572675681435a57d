//! Data models for master events, subscriptions, attempts, and sizing output.

mod attempt;
mod event;
mod position;
mod subscription;

pub use attempt::{CopyAttemptRecord, CopyStatus};
pub use event::{MarketKind, MasterExecutionEvent, TradeAction, TradeSide};
pub use position::CalculatedPosition;
pub use subscription::{AllocationMode, FollowerSubscription, SubscriptionStatus};
