//! Replication orchestrator: turns one master execution event into isolated
//! per-follower copy attempts.
//!
//! Per (event, follower) pair the flow is: idempotency probe, cached equity
//! read, risk snapshot, position sizing, risk gate, credential resolution,
//! execution, attempt record, best-effort side channel. Every failure is
//! contained at the follower boundary; only a failure to load the follower
//! list aborts a fan-out.

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditSink, LogAuditSink, LogNotifier, Notifier, NotificationKind};
use crate::cache::FollowerStateCache;
use crate::exec::{CredentialResolver, ExecutionOutcome, TradeExecutor, TradeRequest};
use crate::models::{
    CalculatedPosition, CopyAttemptRecord, CopyStatus, FollowerSubscription,
    MasterExecutionEvent, SubscriptionStatus, TradeAction,
};
use crate::risk::{FollowerRiskSnapshot, RiskGate};
use crate::sizing::PositionSizer;
use crate::store::ReplicationStore;

/// One follower's failure inside a fan-out.
#[derive(Debug, Clone)]
pub struct FollowerError {
    pub follower_id: String,
    pub message: String,
}

/// Result of fanning one open event out to a strategy's followers.
#[derive(Debug, Clone, Default)]
pub struct FanoutSummary {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<FollowerError>,
}

/// Result of closing followers out of a master trade.
#[derive(Debug, Clone, Default)]
pub struct CloseSummary {
    pub closed: usize,
    pub failed: usize,
    pub errors: Vec<FollowerError>,
}

/// Terminal outcome of one per-follower flow.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub status: CopyStatus,
    pub reason: Option<String>,
}

impl CopyOutcome {
    fn executed() -> Self {
        Self {
            status: CopyStatus::Executed,
            reason: None,
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: CopyStatus::Skipped,
            reason: Some(reason.into()),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: CopyStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// The replication engine. Collaborators are injected trait objects; the
/// composition root owns the single instance per process.
pub struct Replicator {
    store: Arc<dyn ReplicationStore>,
    executor: Arc<dyn TradeExecutor>,
    credentials: Arc<dyn CredentialResolver>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    cache: FollowerStateCache,
    gate: RiskGate,
}

impl Replicator {
    pub fn new(
        store: Arc<dyn ReplicationStore>,
        executor: Arc<dyn TradeExecutor>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            store,
            executor,
            credentials,
            audit: Arc::new(LogAuditSink),
            notifier: Arc::new(LogNotifier),
            cache: FollowerStateCache::new(),
            gate: RiskGate::default(),
        }
    }

    pub fn with_gate(mut self, gate: RiskGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn cache(&self) -> &FollowerStateCache {
        &self.cache
    }

    /// Route an event to the open fan-out or the close flow.
    pub async fn process(&self, event: &MasterExecutionEvent) -> Result<FanoutSummary> {
        match event.action {
            TradeAction::Open => self.handle_master_execution(event).await,
            TradeAction::Close | TradeAction::PartialClose => {
                let close = self.handle_master_close(event).await?;
                Ok(FanoutSummary {
                    copied: close.closed,
                    skipped: 0,
                    failed: close.failed,
                    errors: close.errors,
                })
            }
        }
    }

    /// Fan one open event out to every active follower of the strategy.
    ///
    /// Returns immediately with zero counts when the strategy has no active
    /// followers. A failure to load the follower list is the only error that
    /// aborts the whole call.
    pub async fn handle_master_execution(
        &self,
        event: &MasterExecutionEvent,
    ) -> Result<FanoutSummary> {
        let followers = self
            .strategy_followers(&event.strategy_id)
            .await
            .context("Failed to load follower list")?;

        if followers.is_empty() {
            debug!(strategy = %event.strategy_id, "No active followers");
            return Ok(FanoutSummary::default());
        }

        // Master-side bookkeeping so the close flow can resolve the entry
        // price later. Best-effort: replication proceeds without it.
        if let Some(trade_id) = &event.trade_id {
            if let Err(e) = self
                .store
                .record_master_trade(trade_id, &event.strategy_id, &event.symbol, event.entry_price)
                .await
            {
                warn!(error = %e, trade_id = %trade_id, "Failed to record master trade");
            }
        }

        let mut summary = FanoutSummary::default();
        for sub in &followers {
            match self.replicate_to_follower(event, sub).await {
                Ok(outcome) => match outcome.status {
                    CopyStatus::Executed => summary.copied += 1,
                    CopyStatus::Skipped => summary.skipped += 1,
                    CopyStatus::Failed => {
                        summary.failed += 1;
                        summary.errors.push(FollowerError {
                            follower_id: sub.follower_id.clone(),
                            message: outcome.reason.unwrap_or_default(),
                        });
                    }
                },
                Err(e) => {
                    warn!(
                        follower = %sub.follower_id,
                        error = %e,
                        "Follower replication errored"
                    );
                    summary.failed += 1;
                    summary.errors.push(FollowerError {
                        follower_id: sub.follower_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            strategy = %event.strategy_id,
            symbol = %event.symbol,
            copied = summary.copied,
            skipped = summary.skipped,
            failed = summary.failed,
            "Fan-out complete"
        );

        Ok(summary)
    }

    /// Replicate one event to one follower. All business denials come back
    /// as `Ok` with a SKIPPED/FAILED outcome; `Err` is reserved for resource
    /// failures (store or resolver unavailable).
    pub async fn replicate_to_follower(
        &self,
        event: &MasterExecutionEvent,
        sub: &FollowerSubscription,
    ) -> Result<CopyOutcome> {
        let event_id = event.correlation_id();

        // Idempotency probe: a re-delivered (event, follower) pair must not
        // execute again or write a second record.
        if self.store.has_attempt(&event_id, &sub.follower_id).await? {
            debug!(
                event = %event_id,
                follower = %sub.follower_id,
                "Attempt already recorded, skipping re-delivery"
            );
            return Ok(CopyOutcome::skipped("Already copied"));
        }

        let equity = self.resolve_equity(&sub.follower_id).await?;
        if equity <= Decimal::ZERO {
            let reason = "Insufficient equity";
            self.record_attempt(CopyAttemptRecord::from_event(
                event,
                sub,
                &CalculatedPosition::zero(sub.max_leverage),
                equity,
                CopyStatus::Skipped,
                Some(reason.to_string()),
            ))
            .await?;
            return Ok(CopyOutcome::skipped(reason));
        }

        let initial_equity = self
            .store
            .initial_equity(&sub.follower_id, &sub.strategy_id)
            .await?
            .unwrap_or(equity);

        let snapshot = FollowerRiskSnapshot {
            equity,
            initial_equity,
            open_trades: self
                .store
                .open_trade_count(&sub.follower_id, &sub.strategy_id)
                .await?,
            daily_loss: self
                .store
                .daily_realized_loss(&sub.follower_id, &sub.strategy_id)
                .await?,
            open_position_value: self
                .store
                .open_position_value(&sub.follower_id, &sub.strategy_id)
                .await?,
        };

        let position = PositionSizer::size(
            sub,
            event.position_size,
            event.entry_price,
            equity,
            event.leverage,
        );

        if !position.is_viable() {
            let reason = "Insufficient equity for allocation";
            self.record_attempt(CopyAttemptRecord::from_event(
                event,
                sub,
                &position,
                equity,
                CopyStatus::Skipped,
                Some(reason.to_string()),
            ))
            .await?;
            return Ok(CopyOutcome::skipped(reason));
        }

        let decision = self.gate.evaluate(
            sub,
            &event.master_id,
            &snapshot,
            position.position_size,
            Some(position.leverage),
            Some(event.timestamp),
        );

        for warning in &decision.warnings {
            warn!(follower = %sub.follower_id, warning = %warning, "Risk warning");
        }

        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "Denied by risk gate".to_string());
            info!(
                follower = %sub.follower_id,
                reason = %reason,
                "Copy denied by risk gate"
            );

            self.record_attempt(CopyAttemptRecord::from_event(
                event,
                sub,
                &position,
                equity,
                CopyStatus::Skipped,
                Some(reason.clone()),
            ))
            .await?;

            if decision.should_pause {
                self.pause_subscription(sub, &reason).await?;
            }

            return Ok(CopyOutcome::skipped(reason));
        }

        let credential = self
            .credentials
            .resolve(&sub.follower_id, event.market)
            .await?;
        let Some(credential) = credential else {
            let reason = format!(
                "No active API credential for {} market",
                event.market.as_str()
            );
            self.record_attempt(CopyAttemptRecord::from_event(
                event,
                sub,
                &position,
                equity,
                CopyStatus::Failed,
                Some(reason.clone()),
            ))
            .await?;
            self.audit_event(
                "copy_failed",
                &sub.follower_id,
                json!({ "event": event_id, "reason": &reason }),
            )
            .await;
            return Ok(CopyOutcome::failed(reason));
        };

        let request = TradeRequest {
            follower_id: sub.follower_id.clone(),
            symbol: event.symbol.clone(),
            side: event.side,
            market: event.market,
            position_size: position.position_size,
            entry_price: event.entry_price,
            stop_loss: event.stop_loss,
            take_profit: event.take_profit,
            leverage: position.leverage,
            credential,
        };

        let outcome = match self.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failure(e.to_string()),
        };

        if !outcome.success {
            let reason = outcome
                .error
                .unwrap_or_else(|| "Execution failed".to_string());
            warn!(
                follower = %sub.follower_id,
                symbol = %event.symbol,
                error = %reason,
                "Trade execution failed"
            );

            self.record_attempt(CopyAttemptRecord::from_event(
                event,
                sub,
                &position,
                equity,
                CopyStatus::Failed,
                Some(reason.clone()),
            ))
            .await?;
            self.audit_event(
                "copy_failed",
                &sub.follower_id,
                json!({ "event": event_id, "symbol": &event.symbol, "reason": &reason }),
            )
            .await;
            self.notify_follower(
                &sub.follower_id,
                NotificationKind::CopyFailed,
                json!({ "symbol": &event.symbol, "reason": &reason }),
            )
            .await;
            return Ok(CopyOutcome::failed(reason));
        }

        let mut record = CopyAttemptRecord::from_event(
            event,
            sub,
            &position,
            equity,
            CopyStatus::Executed,
            None,
        );
        record.executor_trade_id = outcome.trade_id;
        self.record_attempt(record).await?;

        info!(
            follower = %sub.follower_id,
            symbol = %event.symbol,
            size = %position.position_size,
            leverage = %position.leverage,
            "Copy executed"
        );

        self.audit_event(
            "copy_executed",
            &sub.follower_id,
            json!({
                "event": event_id,
                "symbol": &event.symbol,
                "size": position.position_size.to_string(),
            }),
        )
        .await;
        self.notify_follower(
            &sub.follower_id,
            NotificationKind::CopyExecuted,
            json!({
                "symbol": &event.symbol,
                "side": event.side.as_str(),
                "size": position.position_size.to_string(),
            }),
        )
        .await;

        Ok(CopyOutcome::executed())
    }

    /// Close every follower out of a master trade at the master's reported
    /// exit price. One follower's close failure never affects another's.
    pub async fn handle_master_close(
        &self,
        event: &MasterExecutionEvent,
    ) -> Result<CloseSummary> {
        let event_id = event.correlation_id();
        let open_attempts = self
            .store
            .open_attempts_for_master_trade(&event_id)
            .await
            .context("Failed to load open attempts")?;

        if open_attempts.is_empty() {
            debug!(event = %event_id, "No open attempts to close");
            return Ok(CloseSummary::default());
        }

        let master_entry = self.store.master_entry_price(&event_id).await?;

        let mut summary = CloseSummary::default();
        for attempt in &open_attempts {
            match self.close_attempt(event, attempt, master_entry).await {
                Ok(()) => summary.closed += 1,
                Err(e) => {
                    warn!(
                        follower = %attempt.follower_id,
                        error = %e,
                        "Failed to close follower position"
                    );
                    summary.failed += 1;
                    summary.errors.push(FollowerError {
                        follower_id: attempt.follower_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            event = %event_id,
            closed = summary.closed,
            failed = summary.failed,
            "Close flow complete"
        );

        Ok(summary)
    }

    /// Close flow for a single follower, as dispatched by the scheduler.
    pub async fn close_follower_attempts(
        &self,
        event: &MasterExecutionEvent,
        follower_id: &str,
    ) -> Result<CopyOutcome> {
        let event_id = event.correlation_id();
        let open_attempts = self
            .store
            .open_attempts_for_master_trade(&event_id)
            .await?;
        let master_entry = self.store.master_entry_price(&event_id).await?;

        let mut closed = 0usize;
        for attempt in open_attempts
            .iter()
            .filter(|a| a.follower_id == follower_id)
        {
            self.close_attempt(event, attempt, master_entry).await?;
            closed += 1;
        }

        if closed == 0 {
            Ok(CopyOutcome::skipped("No open position for this trade"))
        } else {
            Ok(CopyOutcome::executed())
        }
    }

    async fn close_attempt(
        &self,
        event: &MasterExecutionEvent,
        attempt: &CopyAttemptRecord,
        master_entry: Option<Decimal>,
    ) -> Result<()> {
        let credential = self
            .credentials
            .resolve(&attempt.follower_id, attempt.market)
            .await?
            .context("No active API credential for close order")?;

        let exit_price = event.entry_price;
        let request = TradeRequest {
            follower_id: attempt.follower_id.clone(),
            symbol: attempt.symbol.clone(),
            side: attempt.side.opposite(),
            market: attempt.market,
            position_size: attempt.follower_size,
            entry_price: exit_price,
            stop_loss: None,
            take_profit: None,
            leverage: attempt.leverage,
            credential,
        };

        let outcome = match self.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::failure(e.to_string()),
        };
        if !outcome.success {
            anyhow::bail!(
                "Close order failed: {}",
                outcome.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        let entry_price = master_entry.unwrap_or(attempt.entry_price);
        let pnl_pct =
            PositionSizer::pnl_percent(entry_price, exit_price, attempt.side, attempt.leverage);
        let pnl = PositionSizer::pnl_amount(attempt.follower_size, pnl_pct);

        self.store
            .close_attempt(&attempt.id, event.timestamp, pnl)
            .await?;

        // Realized PnL moved the account; the cached equity is stale now.
        self.cache.invalidate_equity(&attempt.follower_id).await;

        info!(
            follower = %attempt.follower_id,
            symbol = %attempt.symbol,
            pnl = %pnl,
            "Follower position closed"
        );

        self.audit_event(
            "copy_closed",
            &attempt.follower_id,
            json!({
                "attempt": &attempt.id,
                "symbol": &attempt.symbol,
                "pnl": pnl.to_string(),
            }),
        )
        .await;
        self.notify_follower(
            &attempt.follower_id,
            NotificationKind::PositionClosed,
            json!({ "symbol": &attempt.symbol, "pnl": pnl.to_string() }),
        )
        .await;

        Ok(())
    }

    /// Active followers for a strategy, via the 2-minute cache.
    async fn strategy_followers(&self, strategy_id: &str) -> Result<Vec<FollowerSubscription>> {
        if let Some(followers) = self.cache.followers_for(strategy_id).await {
            return Ok(followers);
        }
        let followers = self.store.active_followers(strategy_id).await?;
        self.cache
            .store_followers(strategy_id, followers.clone())
            .await;
        Ok(followers)
    }

    /// Follower equity, via the 1-minute cache.
    async fn resolve_equity(&self, follower_id: &str) -> Result<Decimal> {
        if let Some(equity) = self.cache.equity_of(follower_id).await {
            return Ok(equity);
        }
        let equity = self.store.follower_equity(follower_id).await?;
        self.cache.store_equity(follower_id, equity).await;
        Ok(equity)
    }

    /// Auto-pause after a total-loss breach, with its dedicated notification.
    async fn pause_subscription(&self, sub: &FollowerSubscription, reason: &str) -> Result<()> {
        warn!(
            follower = %sub.follower_id,
            strategy = %sub.strategy_id,
            "Auto-pausing subscription after loss-limit breach"
        );

        self.store
            .update_subscription_status(
                &sub.follower_id,
                &sub.strategy_id,
                SubscriptionStatus::Paused,
            )
            .await?;
        self.cache.invalidate_followers(&sub.strategy_id).await;

        self.notify_follower(
            &sub.follower_id,
            NotificationKind::LossLimitPause,
            json!({ "strategy": &sub.strategy_id, "reason": reason }),
        )
        .await;
        self.audit_event(
            "subscription_auto_paused",
            &sub.follower_id,
            json!({ "strategy": &sub.strategy_id, "reason": reason }),
        )
        .await;

        Ok(())
    }

    async fn record_attempt(&self, record: CopyAttemptRecord) -> Result<()> {
        let inserted = self.store.insert_attempt(&record).await?;
        if !inserted {
            // Lost a race with a concurrent delivery; the winner's record
            // stands and this attempt performed no execution of its own.
            warn!(
                event = %record.master_event_id,
                follower = %record.follower_id,
                "Duplicate attempt record suppressed by storage constraint"
            );
        }
        Ok(())
    }

    async fn audit_event(&self, event: &str, entity: &str, metadata: serde_json::Value) {
        if let Err(e) = self.audit.record(event, entity, metadata).await {
            warn!(error = %e, event, "Audit record failed");
        }
    }

    async fn notify_follower(
        &self,
        user_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self.notifier.notify(user_id, kind, payload).await {
            warn!(error = %e, user = user_id, "Notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{SimulatedExecutor, StaticCredentials};
    use crate::models::{AllocationMode, MarketKind, TradeSide};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn open_event(trade_id: &str) -> MasterExecutionEvent {
        MasterExecutionEvent {
            strategy_id: "strat-1".to_string(),
            master_id: "master-1".to_string(),
            trade_id: Some(trade_id.to_string()),
            signal_id: None,
            symbol: "BTCUSDT".to_string(),
            market: MarketKind::Futures,
            side: TradeSide::Buy,
            leverage: Some(dec!(2)),
            position_size: dec!(1000),
            entry_price: dec!(100),
            stop_loss: None,
            take_profit: None,
            action: TradeAction::Open,
            timestamp: Utc::now(),
        }
    }

    fn close_event(trade_id: &str, exit_price: Decimal) -> MasterExecutionEvent {
        let mut event = open_event(trade_id);
        event.action = TradeAction::Close;
        event.entry_price = exit_price;
        event
    }

    async fn seed_follower(store: &MemoryStore, follower_id: &str, equity: Decimal) {
        let mut sub = FollowerSubscription::new(follower_id, "strat-1");
        sub.allocation_mode = AllocationMode::Percent;
        sub.allocation_value = dec!(10);
        store.upsert_subscription(&sub).await.unwrap();
        store.set_follower_equity(follower_id, equity).await.unwrap();
    }

    fn engine_with(
        store: Arc<MemoryStore>,
        executor: Arc<SimulatedExecutor>,
        credentials: StaticCredentials,
    ) -> Replicator {
        Replicator::new(store, executor, Arc::new(credentials))
    }

    #[tokio::test]
    async fn fan_out_copies_to_each_active_follower() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;
        seed_follower(&store, "follower-2", dec!(2000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new()
            .with_follower("follower-1")
            .with_follower("follower-2");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        let summary = engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();

        assert_eq!(summary.copied, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(executor.executed_requests().await.len(), 2);

        let attempts = store.all_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.status == CopyStatus::Executed));
        // 10% of equity each
        let sizes: Vec<Decimal> = attempts.iter().map(|a| a.follower_size).collect();
        assert!(sizes.contains(&dec!(100)));
        assert!(sizes.contains(&dec!(200)));
    }

    #[tokio::test]
    async fn redelivered_event_is_not_executed_twice() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new().with_follower("follower-1");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        let event = open_event("trade-1");
        let first = engine.handle_master_execution(&event).await.unwrap();
        assert_eq!(first.copied, 1);

        let second = engine.handle_master_execution(&event).await.unwrap();
        assert_eq!(second.copied, 0);
        assert_eq!(second.skipped, 1);

        assert_eq!(executor.executed_requests().await.len(), 1);
        assert_eq!(store.all_attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn self_copy_is_skipped_with_record() {
        let store = Arc::new(MemoryStore::new());
        // The master follows their own strategy
        seed_follower(&store, "master-1", dec!(1000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new().with_follower("master-1");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        let summary = engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();

        assert_eq!(summary.copied, 0);
        assert_eq!(summary.skipped, 1);
        assert!(executor.executed_requests().await.is_empty());

        let attempts = store.all_attempts().await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, CopyStatus::Skipped);
        assert!(attempts[0]
            .failure_reason
            .as_ref()
            .unwrap()
            .contains("own strategy"));
    }

    #[tokio::test]
    async fn total_loss_breach_pauses_subscription() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new().with_follower("follower-1");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        // First copy establishes initial equity at 1000
        engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();
        engine
            .handle_master_close(&close_event("trade-1", dec!(100)))
            .await
            .unwrap();

        // Equity collapses 25% below initial; cached equity must not mask it
        store
            .set_follower_equity("follower-1", dec!(750))
            .await
            .unwrap();
        engine.cache().invalidate_equity("follower-1").await;

        let summary = engine
            .handle_master_execution(&open_event("trade-2"))
            .await
            .unwrap();
        assert_eq!(summary.copied, 0);
        assert_eq!(summary.skipped, 1);

        assert_eq!(
            store.subscription_status("follower-1", "strat-1").await,
            Some(SubscriptionStatus::Paused)
        );

        let attempts = store.all_attempts().await;
        let denied = attempts
            .iter()
            .find(|a| a.master_event_id == "trade-2")
            .unwrap();
        assert!(denied
            .failure_reason
            .as_ref()
            .unwrap()
            .contains("Total loss limit"));

        // Paused follower receives no further copies
        let after = engine
            .handle_master_execution(&open_event("trade-3"))
            .await
            .unwrap();
        assert_eq!(after.copied + after.skipped + after.failed, 0);
    }

    #[tokio::test]
    async fn missing_credential_is_a_hard_failure() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let engine = engine_with(store.clone(), executor.clone(), StaticCredentials::new());

        let summary = engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(executor.executed_requests().await.is_empty());

        let attempts = store.all_attempts().await;
        assert_eq!(attempts[0].status, CopyStatus::Failed);
        assert!(attempts[0]
            .failure_reason
            .as_ref()
            .unwrap()
            .contains("credential"));
    }

    #[tokio::test]
    async fn executor_failure_is_isolated_per_follower() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;
        seed_follower(&store, "follower-2", dec!(1000)).await;

        // Both followers trade the failing symbol; failures must not abort
        // the sibling's execution path
        let executor = Arc::new(SimulatedExecutor::failing_on(vec!["FAILUSDT".to_string()]));
        let credentials = StaticCredentials::new()
            .with_follower("follower-1")
            .with_follower("follower-2");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        let mut event = open_event("trade-1");
        event.symbol = "FAILUSDT".to_string();

        let summary = engine.handle_master_execution(&event).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errors.len(), 2);

        let attempts = store.all_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| a.status == CopyStatus::Failed));
    }

    #[tokio::test]
    async fn zero_equity_follower_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", Decimal::ZERO).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new().with_follower("follower-1");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        let summary = engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        let attempts = store.all_attempts().await;
        assert_eq!(attempts[0].status, CopyStatus::Skipped);
        assert!(attempts[0]
            .failure_reason
            .as_ref()
            .unwrap()
            .contains("Insufficient equity"));
    }

    #[tokio::test]
    async fn close_flow_realizes_pnl_per_follower() {
        let store = Arc::new(MemoryStore::new());
        seed_follower(&store, "follower-1", dec!(1000)).await;

        let executor = Arc::new(SimulatedExecutor::new());
        let credentials = StaticCredentials::new().with_follower("follower-1");
        let engine = engine_with(store.clone(), executor.clone(), credentials);

        engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();

        // Entry 100, exit 110, long 2x: +20% on a 100 position = +20
        let summary = engine
            .handle_master_close(&close_event("trade-1", dec!(110)))
            .await
            .unwrap();
        assert_eq!(summary.closed, 1);

        let attempts = store.all_attempts().await;
        let closed = &attempts[0];
        assert!(closed.closed_at.is_some());
        assert_eq!(closed.realized_pnl, Some(dec!(20)));

        // Close order went out on the opposite side
        let requests = executor.executed_requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].side, TradeSide::Sell);
        assert_eq!(requests[1].position_size, dec!(100));
    }

    #[tokio::test]
    async fn empty_follower_list_returns_zero_summary() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let engine = engine_with(store, executor, StaticCredentials::new());

        let summary = engine
            .handle_master_execution(&open_event("trade-1"))
            .await
            .unwrap();
        assert_eq!(summary.copied, 0);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 0);
    }
}
