//! In-memory replication store for tests and the simulate command.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::models::{CopyAttemptRecord, CopyStatus, FollowerSubscription, SubscriptionStatus};

use super::{AttemptStats, ReplicationStore};

#[derive(Default)]
struct Inner {
    subscriptions: Vec<FollowerSubscription>,
    equities: HashMap<String, Decimal>,
    attempts: Vec<CopyAttemptRecord>,
    master_trades: HashMap<String, Decimal>,
}

/// Replication store backed by process memory. Same semantics as the SQLite
/// store, including the (master_event_id, follower_id) uniqueness rule.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every attempt, for assertions in tests.
    pub async fn all_attempts(&self) -> Vec<CopyAttemptRecord> {
        self.inner.lock().await.attempts.clone()
    }

    /// Current status of a subscription, if present.
    pub async fn subscription_status(
        &self,
        follower_id: &str,
        strategy_id: &str,
    ) -> Option<SubscriptionStatus> {
        self.inner
            .lock()
            .await
            .subscriptions
            .iter()
            .find(|s| s.follower_id == follower_id && s.strategy_id == strategy_id)
            .map(|s| s.status)
    }
}

#[async_trait]
impl ReplicationStore for MemoryStore {
    async fn active_followers(&self, strategy_id: &str) -> Result<Vec<FollowerSubscription>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.strategy_id == strategy_id && s.is_active())
            .cloned()
            .collect())
    }

    async fn upsert_subscription(&self, sub: &FollowerSubscription) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.follower_id == sub.follower_id && s.strategy_id == sub.strategy_id)
        {
            *existing = sub.clone();
        } else {
            inner.subscriptions.push(sub.clone());
        }
        Ok(())
    }

    async fn update_subscription_status(
        &self,
        follower_id: &str,
        strategy_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(sub) = inner
            .subscriptions
            .iter_mut()
            .find(|s| s.follower_id == follower_id && s.strategy_id == strategy_id)
        {
            sub.status = status;
            sub.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_attempt(&self, record: &CopyAttemptRecord) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner.attempts.iter().any(|a| {
            a.master_event_id == record.master_event_id && a.follower_id == record.follower_id
        });
        if duplicate {
            return Ok(false);
        }
        inner.attempts.push(record.clone());
        Ok(true)
    }

    async fn has_attempt(&self, master_event_id: &str, follower_id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .any(|a| a.master_event_id == master_event_id && a.follower_id == follower_id))
    }

    async fn open_attempts_for_master_trade(
        &self,
        master_event_id: &str,
    ) -> Result<Vec<CopyAttemptRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.master_event_id == master_event_id && a.is_open())
            .cloned()
            .collect())
    }

    async fn attempts_for_follower(
        &self,
        follower_id: &str,
        limit: u32,
    ) -> Result<Vec<CopyAttemptRecord>> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<_> = inner
            .attempts
            .iter()
            .filter(|a| a.follower_id == follower_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        attempts.truncate(limit as usize);
        Ok(attempts)
    }

    async fn close_attempt(
        &self,
        attempt_id: &str,
        closed_at: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(attempt) = inner.attempts.iter_mut().find(|a| a.id == attempt_id) {
            attempt.closed_at = Some(closed_at);
            attempt.realized_pnl = Some(realized_pnl);
        }
        Ok(())
    }

    async fn follower_equity(&self, follower_id: &str) -> Result<Decimal> {
        let inner = self.inner.lock().await;
        Ok(inner
            .equities
            .get(follower_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn set_follower_equity(&self, follower_id: &str, equity: Decimal) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.equities.insert(follower_id.to_string(), equity);
        Ok(())
    }

    async fn initial_equity(
        &self,
        follower_id: &str,
        strategy_id: &str,
    ) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| {
                a.follower_id == follower_id
                    && a.strategy_id == strategy_id
                    && a.status == CopyStatus::Executed
            })
            .min_by_key(|a| a.opened_at)
            .map(|a| a.equity_at_open))
    }

    async fn open_trade_count(&self, follower_id: &str, strategy_id: &str) -> Result<u32> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| {
                a.follower_id == follower_id && a.strategy_id == strategy_id && a.is_open()
            })
            .count() as u32)
    }

    async fn daily_realized_loss(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal> {
        let inner = self.inner.lock().await;
        let today = Utc::now().date_naive();
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.follower_id == follower_id && a.strategy_id == strategy_id)
            .filter_map(|a| match (a.closed_at, a.realized_pnl) {
                (Some(closed), Some(pnl))
                    if closed.date_naive() == today && pnl < Decimal::ZERO =>
                {
                    Some(-pnl)
                }
                _ => None,
            })
            .sum())
    }

    async fn open_position_value(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal> {
        let inner = self.inner.lock().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| {
                a.follower_id == follower_id && a.strategy_id == strategy_id && a.is_open()
            })
            .map(|a| a.follower_size)
            .sum())
    }

    async fn record_master_trade(
        &self,
        trade_id: &str,
        _strategy_id: &str,
        _symbol: &str,
        entry_price: Decimal,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .master_trades
            .entry(trade_id.to_string())
            .or_insert(entry_price);
        Ok(())
    }

    async fn master_entry_price(&self, trade_id: &str) -> Result<Option<Decimal>> {
        let inner = self.inner.lock().await;
        Ok(inner.master_trades.get(trade_id).copied())
    }

    async fn attempt_stats(&self) -> Result<AttemptStats> {
        let inner = self.inner.lock().await;
        let mut stats = AttemptStats {
            total: inner.attempts.len() as i64,
            ..Default::default()
        };
        for attempt in &inner.attempts {
            match attempt.status {
                CopyStatus::Executed => stats.executed += 1,
                CopyStatus::Failed => stats.failed += 1,
                CopyStatus::Skipped => stats.skipped += 1,
            }
        }
        Ok(stats)
    }
}
