//! Persistence seam for the replication engine.
//!
//! The engine depends only on the [`ReplicationStore`] trait; the crate
//! ships a SQLite implementation and an in-memory implementation for tests
//! and simulation.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{CopyAttemptRecord, FollowerSubscription, SubscriptionStatus};

/// Attempt counts by status, for operator display.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptStats {
    pub total: i64,
    pub executed: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Reads and writes the replication engine performs against durable storage.
#[async_trait]
pub trait ReplicationStore: Send + Sync {
    /// All ACTIVE subscriptions for a strategy.
    async fn active_followers(&self, strategy_id: &str) -> Result<Vec<FollowerSubscription>>;

    /// Create or replace a subscription row (sanitized by the caller).
    async fn upsert_subscription(&self, sub: &FollowerSubscription) -> Result<()>;

    /// Transition a subscription's lifecycle status (auto-pause, resume, stop).
    async fn update_subscription_status(
        &self,
        follower_id: &str,
        strategy_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()>;

    /// Insert an attempt record. Returns false when the
    /// (master_event_id, follower_id) pair already exists; this is the
    /// storage-level idempotency constraint.
    async fn insert_attempt(&self, record: &CopyAttemptRecord) -> Result<bool>;

    /// Whether an attempt already exists for this (event, follower) pair.
    async fn has_attempt(&self, master_event_id: &str, follower_id: &str) -> Result<bool>;

    /// Executed, not-yet-closed attempts for a master trade id.
    async fn open_attempts_for_master_trade(
        &self,
        master_event_id: &str,
    ) -> Result<Vec<CopyAttemptRecord>>;

    /// Recent attempts for one follower, newest first.
    async fn attempts_for_follower(
        &self,
        follower_id: &str,
        limit: u32,
    ) -> Result<Vec<CopyAttemptRecord>>;

    /// Close out an executed attempt with its realized PnL.
    async fn close_attempt(
        &self,
        attempt_id: &str,
        closed_at: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<()>;

    /// Current account equity for a follower; zero when unknown.
    async fn follower_equity(&self, follower_id: &str) -> Result<Decimal>;

    /// Write a follower's account equity (simulation and test setup).
    async fn set_follower_equity(&self, follower_id: &str, equity: Decimal) -> Result<()>;

    /// Pre-allocation equity of the first executed attempt for this
    /// (follower, strategy) pair, if any.
    async fn initial_equity(&self, follower_id: &str, strategy_id: &str)
        -> Result<Option<Decimal>>;

    /// Count of currently open copied trades for this (follower, strategy).
    async fn open_trade_count(&self, follower_id: &str, strategy_id: &str) -> Result<u32>;

    /// Today's realized losses for this (follower, strategy), as a positive
    /// amount.
    async fn daily_realized_loss(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal>;

    /// Total notional of the follower's open copied positions for a strategy.
    async fn open_position_value(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal>;

    /// Record a master trade so its entry price can be resolved at close.
    async fn record_master_trade(
        &self,
        trade_id: &str,
        strategy_id: &str,
        symbol: &str,
        entry_price: Decimal,
    ) -> Result<()>;

    /// Entry price of a recorded master trade, if known.
    async fn master_entry_price(&self, trade_id: &str) -> Result<Option<Decimal>>;

    /// Attempt counts by status.
    async fn attempt_stats(&self) -> Result<AttemptStats>;
}
