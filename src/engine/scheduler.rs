//! Batch scheduler: drains (event, follower) work items in bounded,
//! rate-limited batches without overwhelming downstream execution APIs.
//!
//! Concurrency model: batches of at most `max_batch_size` items, a
//! `batch_delay` pause between batches, items grouped by follower with each
//! follower's items run in chunks of `max_concurrent`, bounding
//! per-follower in-flight executions while followers proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::{CopyStatus, FollowerSubscription, MasterExecutionEvent, TradeAction};

use super::orchestrator::Replicator;

/// Scheduler tuning. Hot-swappable at runtime via [`BatchScheduler::update_config`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum items drained per batch
    pub max_batch_size: usize,

    /// Pause between consecutive batches
    pub batch_delay: Duration,

    /// Maximum concurrent in-flight items per follower
    pub max_concurrent: usize,

    /// Wall-clock budget for `run_to_completion`
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_delay: Duration::from_millis(100),
            max_concurrent: 5,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// One queued unit of replication work.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub event: MasterExecutionEvent,
    pub follower: FollowerSubscription,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of one processed item.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub follower_id: String,
    pub status: Option<CopyStatus>,
    pub error: Option<String>,
}

/// Report from `run_to_completion`. On timeout the report covers what
/// finished so far; in-flight work continues asynchronously.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub timed_out: bool,
}

/// Priority-ordered batch scheduler over a [`Replicator`].
#[derive(Clone)]
pub struct BatchScheduler {
    engine: Arc<Replicator>,
    queue: Arc<Mutex<Vec<WorkItem>>>,
    config: Arc<RwLock<SchedulerConfig>>,
    processing: Arc<AtomicBool>,
    processed_total: Arc<AtomicUsize>,
    failed_total: Arc<AtomicUsize>,
}

impl BatchScheduler {
    pub fn new(engine: Arc<Replicator>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            queue: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(RwLock::new(config)),
            processing: Arc::new(AtomicBool::new(false)),
            processed_total: Arc::new(AtomicUsize::new(0)),
            failed_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue one item, keeping the queue sorted by descending priority.
    pub async fn enqueue(&self, event: MasterExecutionEvent, follower: FollowerSubscription, priority: i32) {
        let mut queue = self.queue.lock().await;
        queue.push(WorkItem {
            event,
            follower,
            priority,
            enqueued_at: Utc::now(),
        });
        queue.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Queue one item per follower for a fan-out.
    pub async fn enqueue_fanout(
        &self,
        event: &MasterExecutionEvent,
        followers: Vec<FollowerSubscription>,
        priority: i32,
    ) {
        for follower in followers {
            self.enqueue(event.clone(), follower, priority).await;
        }
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let cleared = queue.len();
        queue.clear();
        cleared
    }

    /// Swap in new tuning; takes effect from the next batch.
    pub async fn update_config(&self, config: SchedulerConfig) {
        *self.config.write().await = config;
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Drain the queue batch by batch. A second concurrent call returns
    /// immediately; the latch prevents double-draining.
    pub async fn drain(&self) {
        if self.processing.swap(true, Ordering::SeqCst) {
            debug!("Drain already in progress");
            return;
        }

        loop {
            let (batch, remaining, delay) = {
                let config = self.config.read().await;
                let mut queue = self.queue.lock().await;
                let take = config.max_batch_size.min(queue.len());
                let batch: Vec<WorkItem> = queue.drain(..take).collect();
                (batch, queue.len(), config.batch_delay)
            };

            if batch.is_empty() {
                break;
            }

            debug!(batch = batch.len(), remaining, "Processing batch");
            self.process_batch(batch).await;

            if remaining > 0 {
                tokio::time::sleep(delay).await;
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Process one batch: group by follower, run followers in parallel,
    /// bound each follower's in-flight items to `max_concurrent` per chunk.
    async fn process_batch(&self, batch: Vec<WorkItem>) -> Vec<ItemResult> {
        let max_concurrent = {
            let config = self.config.read().await;
            config.max_concurrent.max(1)
        };

        let mut by_follower: HashMap<String, Vec<WorkItem>> = HashMap::new();
        for item in batch {
            by_follower
                .entry(item.follower.follower_id.clone())
                .or_default()
                .push(item);
        }

        let groups = by_follower.into_values().map(|items| async move {
            let mut results = Vec::with_capacity(items.len());
            for chunk in items.chunks(max_concurrent) {
                let settled = join_all(chunk.iter().map(|item| self.process_item(item))).await;
                results.extend(settled);
            }
            results
        });

        let results: Vec<ItemResult> = join_all(groups).await.into_iter().flatten().collect();

        for result in &results {
            self.processed_total.fetch_add(1, Ordering::SeqCst);
            let failed = result.error.is_some() || result.status == Some(CopyStatus::Failed);
            if failed {
                self.failed_total.fetch_add(1, Ordering::SeqCst);
            }
        }

        results
    }

    /// Process a single item, containing its failure.
    async fn process_item(&self, item: &WorkItem) -> ItemResult {
        let outcome = match item.event.action {
            TradeAction::Open => {
                self.engine
                    .replicate_to_follower(&item.event, &item.follower)
                    .await
            }
            TradeAction::Close | TradeAction::PartialClose => {
                self.engine
                    .close_follower_attempts(&item.event, &item.follower.follower_id)
                    .await
            }
        };

        match outcome {
            Ok(outcome) => ItemResult {
                follower_id: item.follower.follower_id.clone(),
                status: Some(outcome.status),
                error: None,
            },
            Err(e) => {
                warn!(
                    follower = %item.follower.follower_id,
                    error = %e,
                    "Work item failed"
                );
                ItemResult {
                    follower_id: item.follower.follower_id.clone(),
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Drain and wait until the queue is empty or the configured timeout
    /// elapses, whichever comes first. On timeout the report covers partial
    /// progress; in-flight items keep running and settle their own records.
    pub async fn run_to_completion(&self) -> DrainReport {
        let timeout = {
            let config = self.config.read().await;
            config.drain_timeout
        };

        let processed_before = self.processed_total.load(Ordering::SeqCst);
        let failed_before = self.failed_total.load(Ordering::SeqCst);

        let drainer = self.clone();
        tokio::spawn(async move {
            drainer.drain().await;
        });

        let started = Instant::now();
        let timed_out = loop {
            if self.queue_depth().await == 0 && !self.is_processing() {
                break false;
            }
            if started.elapsed() >= timeout {
                break true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        };

        let processed = self.processed_total.load(Ordering::SeqCst) - processed_before;
        let failed = self.failed_total.load(Ordering::SeqCst) - failed_before;
        let pending = self.queue_depth().await;

        if timed_out {
            warn!(processed, pending, "Drain timed out with work remaining");
        } else {
            info!(processed, failed, "Queue drained");
        }

        DrainReport {
            processed,
            succeeded: processed - failed,
            failed,
            pending,
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{SimulatedExecutor, StaticCredentials};
    use crate::models::{AllocationMode, MarketKind, TradeSide};
    use crate::store::{MemoryStore, ReplicationStore};
    use rust_decimal_macros::dec;

    fn open_event(trade_id: &str, symbol: &str) -> MasterExecutionEvent {
        MasterExecutionEvent {
            strategy_id: "strat-1".to_string(),
            master_id: "master-1".to_string(),
            trade_id: Some(trade_id.to_string()),
            signal_id: None,
            symbol: symbol.to_string(),
            market: MarketKind::Futures,
            side: TradeSide::Buy,
            leverage: None,
            position_size: dec!(1000),
            entry_price: dec!(100),
            stop_loss: None,
            take_profit: None,
            action: TradeAction::Open,
            timestamp: Utc::now(),
        }
    }

    async fn follower(store: &MemoryStore, id: &str) -> FollowerSubscription {
        let mut sub = FollowerSubscription::new(id, "strat-1");
        sub.allocation_mode = AllocationMode::Percent;
        sub.allocation_value = dec!(1);
        sub.max_open_trades = 100;
        store.upsert_subscription(&sub).await.unwrap();
        store.set_follower_equity(id, dec!(10000)).await.unwrap();
        sub
    }

    fn scheduler(
        store: Arc<MemoryStore>,
        executor: Arc<SimulatedExecutor>,
        credentials: StaticCredentials,
        config: SchedulerConfig,
    ) -> BatchScheduler {
        let engine = Arc::new(Replicator::new(store, executor, Arc::new(credentials)));
        BatchScheduler::new(engine, config)
    }

    #[tokio::test]
    async fn drains_120_items_in_three_delayed_batches() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());

        let mut credentials = StaticCredentials::new();
        let mut followers = Vec::new();
        for i in 0..3 {
            let id = format!("follower-{i}");
            followers.push(follower(&store, &id).await);
            credentials = credentials.with_follower(&id);
        }

        let config = SchedulerConfig {
            max_batch_size: 50,
            batch_delay: Duration::from_millis(40),
            max_concurrent: 5,
            drain_timeout: Duration::from_secs(10),
        };
        let scheduler = scheduler(store.clone(), executor.clone(), credentials, config);

        // 40 events x 3 followers = 120 items
        for i in 0..40 {
            let event = open_event(&format!("trade-{i}"), "BTCUSDT");
            scheduler.enqueue_fanout(&event, followers.clone(), 0).await;
        }
        assert_eq!(scheduler.queue_depth().await, 120);

        let started = Instant::now();
        let report = scheduler.run_to_completion().await;
        let elapsed = started.elapsed();

        assert!(!report.timed_out);
        assert_eq!(report.processed, 120);
        assert_eq!(report.failed, 0);
        assert_eq!(scheduler.queue_depth().await, 0);

        // Three batches of 50/50/20 with pauses after batches 1 and 2
        assert!(elapsed >= Duration::from_millis(80), "elapsed: {elapsed:?}");

        assert_eq!(executor.executed_requests().await.len(), 120);
    }

    #[tokio::test]
    async fn items_drain_in_priority_order() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let sub = follower(&store, "follower-1").await;
        let credentials = StaticCredentials::new().with_follower("follower-1");

        // One item per batch forces strictly priority-ordered processing
        let config = SchedulerConfig {
            max_batch_size: 1,
            batch_delay: Duration::from_millis(1),
            max_concurrent: 1,
            drain_timeout: Duration::from_secs(10),
        };
        let scheduler = scheduler(store, executor.clone(), credentials, config);

        scheduler
            .enqueue(open_event("trade-a", "AAAUSDT"), sub.clone(), 1)
            .await;
        scheduler
            .enqueue(open_event("trade-b", "BBBUSDT"), sub.clone(), 5)
            .await;
        scheduler
            .enqueue(open_event("trade-c", "CCCUSDT"), sub.clone(), 3)
            .await;

        let report = scheduler.run_to_completion().await;
        assert_eq!(report.processed, 3);

        let symbols: Vec<String> = executor
            .executed_requests()
            .await
            .iter()
            .map(|r| r.symbol.clone())
            .collect();
        assert_eq!(symbols, vec!["BBBUSDT", "CCCUSDT", "AAAUSDT"]);
    }

    #[tokio::test]
    async fn timeout_reports_partial_progress_without_error() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let sub = follower(&store, "follower-1").await;
        let credentials = StaticCredentials::new().with_follower("follower-1");

        // Long inter-batch delay so the timeout fires mid-drain
        let config = SchedulerConfig {
            max_batch_size: 1,
            batch_delay: Duration::from_millis(300),
            max_concurrent: 1,
            drain_timeout: Duration::from_millis(100),
        };
        let scheduler = scheduler(store, executor, credentials, config);

        for i in 0..5 {
            scheduler
                .enqueue(open_event(&format!("trade-{i}"), "BTCUSDT"), sub.clone(), 0)
                .await;
        }

        let report = scheduler.run_to_completion().await;
        assert!(report.timed_out);
        assert!(report.processed < 5);
        assert!(report.pending > 0);
    }

    #[tokio::test]
    async fn clear_queue_empties_pending_work() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let sub = follower(&store, "follower-1").await;
        let credentials = StaticCredentials::new().with_follower("follower-1");

        let scheduler = scheduler(store, executor, credentials, SchedulerConfig::default());
        for i in 0..4 {
            scheduler
                .enqueue(open_event(&format!("trade-{i}"), "BTCUSDT"), sub.clone(), 0)
                .await;
        }

        assert_eq!(scheduler.queue_depth().await, 4);
        assert_eq!(scheduler.clear_queue().await, 4);
        assert_eq!(scheduler.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn config_is_hot_swappable() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(SimulatedExecutor::new());
        let sub = follower(&store, "follower-1").await;
        let credentials = StaticCredentials::new().with_follower("follower-1");

        let scheduler = scheduler(store, executor, credentials, SchedulerConfig::default());
        scheduler
            .update_config(SchedulerConfig {
                max_batch_size: 2,
                batch_delay: Duration::from_millis(1),
                max_concurrent: 1,
                drain_timeout: Duration::from_secs(5),
            })
            .await;

        for i in 0..6 {
            scheduler
                .enqueue(open_event(&format!("trade-{i}"), "BTCUSDT"), sub.clone(), 0)
                .await;
        }

        let report = scheduler.run_to_completion().await;
        assert_eq!(report.processed, 6);
        assert_eq!(scheduler.queue_depth().await, 0);
    }
}
