//! SQLite-backed replication store.
//!
//! Stores subscriptions, follower accounts, attempt records, and master
//! trade entries. The `UNIQUE(master_event_id, follower_id)` constraint on
//! `copy_attempts` is the storage-level idempotency enforcement point.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    AllocationMode, CopyAttemptRecord, CopyStatus, FollowerSubscription, MarketKind,
    SubscriptionStatus, TradeSide,
};

use super::{AttemptStats, ReplicationStore};

/// SQLite store with inline migrations.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Subscription row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredSubscription {
    id: String,
    follower_id: String,
    strategy_id: String,
    status: String,
    allocation_mode: String,
    allocation_value: f64,
    max_daily_loss_pct: Option<f64>,
    max_total_loss_pct: Option<f64>,
    max_open_trades: i64,
    max_leverage: f64,
    risk_multiplier: f64,
    created_at: String,
    updated_at: String,
}

/// Attempt row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredAttempt {
    id: String,
    master_event_id: String,
    strategy_id: String,
    master_id: String,
    follower_id: String,
    symbol: String,
    side: String,
    market: String,
    leverage: f64,
    master_size: f64,
    follower_size: f64,
    entry_price: f64,
    equity_at_open: f64,
    allocation_before: f64,
    allocation_after: f64,
    status: String,
    failure_reason: Option<String>,
    executor_trade_id: Option<String>,
    opened_at: String,
    closed_at: Option<String>,
    realized_pnl: Option<f64>,
}

fn decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

fn f64_of(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl StoredSubscription {
    fn into_model(self) -> FollowerSubscription {
        FollowerSubscription {
            status: SubscriptionStatus::parse(&self.status)
                .unwrap_or(SubscriptionStatus::Stopped),
            allocation_mode: AllocationMode::parse(&self.allocation_mode)
                .unwrap_or(AllocationMode::Fixed),
            allocation_value: decimal(self.allocation_value),
            max_daily_loss_pct: self.max_daily_loss_pct.map(decimal),
            max_total_loss_pct: self.max_total_loss_pct.map(decimal),
            max_open_trades: self.max_open_trades.max(0) as u32,
            max_leverage: decimal(self.max_leverage),
            risk_multiplier: decimal(self.risk_multiplier),
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            id: self.id,
            follower_id: self.follower_id,
            strategy_id: self.strategy_id,
        }
    }
}

impl StoredAttempt {
    fn into_model(self) -> CopyAttemptRecord {
        CopyAttemptRecord {
            side: match self.side.as_str() {
                "SELL" => TradeSide::Sell,
                _ => TradeSide::Buy,
            },
            market: match self.market.as_str() {
                "SPOT" => MarketKind::Spot,
                _ => MarketKind::Futures,
            },
            status: CopyStatus::parse(&self.status).unwrap_or(CopyStatus::Failed),
            leverage: decimal(self.leverage),
            master_size: decimal(self.master_size),
            follower_size: decimal(self.follower_size),
            entry_price: decimal(self.entry_price),
            equity_at_open: decimal(self.equity_at_open),
            allocation_before: decimal(self.allocation_before),
            allocation_after: decimal(self.allocation_after),
            opened_at: parse_time(&self.opened_at),
            closed_at: self.closed_at.as_deref().map(parse_time),
            realized_pnl: self.realized_pnl.map(decimal),
            id: self.id,
            master_event_id: self.master_event_id,
            strategy_id: self.strategy_id,
            master_id: self.master_id,
            follower_id: self.follower_id,
            symbol: self.symbol,
            failure_reason: self.failure_reason,
            executor_trade_id: self.executor_trade_id,
        }
    }
}

impl SqliteStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follower_subscriptions (
                id TEXT PRIMARY KEY,
                follower_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                allocation_mode TEXT NOT NULL,
                allocation_value REAL NOT NULL,
                max_daily_loss_pct REAL,
                max_total_loss_pct REAL,
                max_open_trades INTEGER NOT NULL DEFAULT 5,
                max_leverage REAL NOT NULL DEFAULT 1,
                risk_multiplier REAL NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(follower_id, strategy_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follower_accounts (
                follower_id TEXT PRIMARY KEY,
                equity REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_attempts (
                id TEXT PRIMARY KEY,
                master_event_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                master_id TEXT NOT NULL,
                follower_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                market TEXT NOT NULL,
                leverage REAL NOT NULL DEFAULT 1,
                master_size REAL NOT NULL,
                follower_size REAL NOT NULL,
                entry_price REAL NOT NULL,
                equity_at_open REAL NOT NULL DEFAULT 0,
                allocation_before REAL NOT NULL DEFAULT 0,
                allocation_after REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                failure_reason TEXT,
                executor_trade_id TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                realized_pnl REAL,
                UNIQUE(master_event_id, follower_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS master_trades (
                trade_id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                entry_price REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attempts_follower ON copy_attempts(follower_id, strategy_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_attempts_master_event ON copy_attempts(master_event_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_strategy ON follower_subscriptions(strategy_id, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ReplicationStore for SqliteStore {
    async fn active_followers(&self, strategy_id: &str) -> Result<Vec<FollowerSubscription>> {
        let rows: Vec<StoredSubscription> = sqlx::query_as(
            "SELECT * FROM follower_subscriptions WHERE strategy_id = ? AND status = 'ACTIVE'",
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active followers")?;

        Ok(rows.into_iter().map(StoredSubscription::into_model).collect())
    }

    async fn upsert_subscription(&self, sub: &FollowerSubscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO follower_subscriptions (
                id, follower_id, strategy_id, status, allocation_mode,
                allocation_value, max_daily_loss_pct, max_total_loss_pct,
                max_open_trades, max_leverage, risk_multiplier, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(follower_id, strategy_id) DO UPDATE SET
                status = excluded.status,
                allocation_mode = excluded.allocation_mode,
                allocation_value = excluded.allocation_value,
                max_daily_loss_pct = excluded.max_daily_loss_pct,
                max_total_loss_pct = excluded.max_total_loss_pct,
                max_open_trades = excluded.max_open_trades,
                max_leverage = excluded.max_leverage,
                risk_multiplier = excluded.risk_multiplier,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.follower_id)
        .bind(&sub.strategy_id)
        .bind(sub.status.as_str())
        .bind(sub.allocation_mode.as_str())
        .bind(f64_of(sub.allocation_value))
        .bind(sub.max_daily_loss_pct.map(f64_of))
        .bind(sub.max_total_loss_pct.map(f64_of))
        .bind(sub.max_open_trades as i64)
        .bind(f64_of(sub.max_leverage))
        .bind(f64_of(sub.risk_multiplier))
        .bind(sub.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_subscription_status(
        &self,
        follower_id: &str,
        strategy_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE follower_subscriptions SET status = ?, updated_at = ? WHERE follower_id = ? AND strategy_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(follower_id)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_attempt(&self, record: &CopyAttemptRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO copy_attempts (
                id, master_event_id, strategy_id, master_id, follower_id,
                symbol, side, market, leverage, master_size, follower_size,
                entry_price, equity_at_open, allocation_before, allocation_after,
                status, failure_reason, executor_trade_id, opened_at, closed_at,
                realized_pnl
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(master_event_id, follower_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.master_event_id)
        .bind(&record.strategy_id)
        .bind(&record.master_id)
        .bind(&record.follower_id)
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.market.as_str())
        .bind(f64_of(record.leverage))
        .bind(f64_of(record.master_size))
        .bind(f64_of(record.follower_size))
        .bind(f64_of(record.entry_price))
        .bind(f64_of(record.equity_at_open))
        .bind(f64_of(record.allocation_before))
        .bind(f64_of(record.allocation_after))
        .bind(record.status.as_str())
        .bind(record.failure_reason.as_deref())
        .bind(record.executor_trade_id.as_deref())
        .bind(record.opened_at.to_rfc3339())
        .bind(record.closed_at.map(|t| t.to_rfc3339()))
        .bind(record.realized_pnl.map(f64_of))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_attempt(&self, master_event_id: &str, follower_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM copy_attempts WHERE master_event_id = ? AND follower_id = ?",
        )
        .bind(master_event_id)
        .bind(follower_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn open_attempts_for_master_trade(
        &self,
        master_event_id: &str,
    ) -> Result<Vec<CopyAttemptRecord>> {
        let rows: Vec<StoredAttempt> = sqlx::query_as(
            "SELECT * FROM copy_attempts WHERE master_event_id = ? AND status = 'EXECUTED' AND closed_at IS NULL",
        )
        .bind(master_event_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch open attempts")?;

        Ok(rows.into_iter().map(StoredAttempt::into_model).collect())
    }

    async fn attempts_for_follower(
        &self,
        follower_id: &str,
        limit: u32,
    ) -> Result<Vec<CopyAttemptRecord>> {
        let rows: Vec<StoredAttempt> = sqlx::query_as(
            "SELECT * FROM copy_attempts WHERE follower_id = ? ORDER BY opened_at DESC LIMIT ?",
        )
        .bind(follower_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredAttempt::into_model).collect())
    }

    async fn close_attempt(
        &self,
        attempt_id: &str,
        closed_at: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE copy_attempts SET closed_at = ?, realized_pnl = ? WHERE id = ?",
        )
        .bind(closed_at.to_rfc3339())
        .bind(f64_of(realized_pnl))
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn follower_equity(&self, follower_id: &str) -> Result<Decimal> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT equity FROM follower_accounts WHERE follower_id = ?")
                .bind(follower_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(equity,)| decimal(equity)).unwrap_or(Decimal::ZERO))
    }

    async fn set_follower_equity(&self, follower_id: &str, equity: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO follower_accounts (follower_id, equity, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(follower_id) DO UPDATE SET
                equity = excluded.equity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(follower_id)
        .bind(f64_of(equity))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn initial_equity(
        &self,
        follower_id: &str,
        strategy_id: &str,
    ) -> Result<Option<Decimal>> {
        let row: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT equity_at_open FROM copy_attempts
            WHERE follower_id = ? AND strategy_id = ? AND status = 'EXECUTED'
            ORDER BY opened_at ASC LIMIT 1
            "#,
        )
        .bind(follower_id)
        .bind(strategy_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(equity,)| decimal(equity)))
    }

    async fn open_trade_count(&self, follower_id: &str, strategy_id: &str) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM copy_attempts
            WHERE follower_id = ? AND strategy_id = ? AND status = 'EXECUTED' AND closed_at IS NULL
            "#,
        )
        .bind(follower_id)
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u32)
    }

    async fn daily_realized_loss(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal> {
        let (loss,): (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(-realized_pnl), 0.0) FROM copy_attempts
            WHERE follower_id = ? AND strategy_id = ?
              AND realized_pnl < 0
              AND closed_at >= datetime('now', 'start of day')
            "#,
        )
        .bind(follower_id)
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(decimal(loss))
    }

    async fn open_position_value(&self, follower_id: &str, strategy_id: &str) -> Result<Decimal> {
        let (value,): (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(follower_size), 0.0) FROM copy_attempts
            WHERE follower_id = ? AND strategy_id = ? AND status = 'EXECUTED' AND closed_at IS NULL
            "#,
        )
        .bind(follower_id)
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(decimal(value))
    }

    async fn record_master_trade(
        &self,
        trade_id: &str,
        strategy_id: &str,
        symbol: &str,
        entry_price: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO master_trades (trade_id, strategy_id, symbol, entry_price)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(trade_id) DO NOTHING
            "#,
        )
        .bind(trade_id)
        .bind(strategy_id)
        .bind(symbol)
        .bind(f64_of(entry_price))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn master_entry_price(&self, trade_id: &str) -> Result<Option<Decimal>> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT entry_price FROM master_trades WHERE trade_id = ?")
                .bind(trade_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(price,)| decimal(price)))
    }

    async fn attempt_stats(&self) -> Result<AttemptStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM copy_attempts GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = AttemptStats::default();
        for (status, count) in rows {
            stats.total += count;
            match status.as_str() {
                "EXECUTED" => stats.executed = count,
                "FAILED" => stats.failed = count,
                "SKIPPED" => stats.skipped = count,
                _ => {}
            }
        }

        Ok(stats)
    }
}
