//! Operator CLI for the replication engine.
//!
//! The engine itself is a library invoked by an event trigger; this binary
//! is the composition root for inspection and simulation: it wires a store,
//! executor, and scheduler together explicitly (no globals) and exposes a
//! handful of subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use copyrelay::engine::{BatchScheduler, Replicator, SchedulerConfig};
use copyrelay::exec::{SimulatedExecutor, StaticCredentials};
use copyrelay::models::{
    AllocationMode, FollowerSubscription, MarketKind, MasterExecutionEvent, TradeAction,
    TradeSide,
};
use copyrelay::risk::validator;
use copyrelay::stats::PerformanceCalculator;
use copyrelay::store::{MemoryStore, ReplicationStore, SqliteStore};

/// Copy-trading replication engine CLI.
#[derive(Parser)]
#[command(name = "copyrelay")]
#[command(about = "Inspect and simulate the copy-trading replication engine", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(
        short,
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./copyrelay.db?mode=rwc"
    )]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated fan-out against an in-memory store
    Simulate {
        /// Number of simulated followers
        #[arg(short, long, default_value = "3")]
        followers: usize,

        /// Equity per simulated follower
        #[arg(short, long, default_value = "1000")]
        equity: f64,

        /// Number of master open events to replicate
        #[arg(long, default_value = "5")]
        events: usize,

        /// Symbol the simulated executor rejects, to exercise failures
        #[arg(long)]
        fail_symbol: Option<String>,
    },

    /// Show attempt counts from the database
    Status,

    /// List recent copy attempts for a follower
    Attempts {
        /// Follower identity
        follower: String,

        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Validate and sanitize a follower subscription config file (JSON)
    Validate {
        /// Path to the subscription JSON
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Simulate {
            followers,
            equity,
            events,
            fail_symbol,
        } => {
            simulate(followers, equity, events, fail_symbol).await?;
        }

        Commands::Status => {
            let store = SqliteStore::new(&cli.database).await?;
            let stats = store.attempt_stats().await?;

            println!("\n=== Copy Attempts ===");
            println!("Total:    {}", stats.total);
            println!("Executed: {}", stats.executed);
            println!("Failed:   {}", stats.failed);
            println!("Skipped:  {}", stats.skipped);
        }

        Commands::Attempts { follower, limit } => {
            let store = SqliteStore::new(&cli.database).await?;
            let attempts = store.attempts_for_follower(&follower, limit).await?;

            if attempts.is_empty() {
                println!("No attempts recorded for {follower}");
                return Ok(());
            }

            println!(
                "\n{:<10} {:<12} {:<5} {:>12} {:>10} {:<8}",
                "SYMBOL", "STATUS", "SIDE", "SIZE", "PNL", "REASON"
            );
            println!("{}", "-".repeat(64));
            for attempt in &attempts {
                println!(
                    "{:<10} {:<12} {:<5} {:>12.2} {:>10} {:<8}",
                    attempt.symbol,
                    attempt.status.as_str(),
                    attempt.side.as_str(),
                    attempt.follower_size,
                    attempt
                        .realized_pnl
                        .map(|p| format!("{p:.2}"))
                        .unwrap_or_else(|| "-".to_string()),
                    attempt.failure_reason.as_deref().unwrap_or(""),
                );
            }

            let perf = PerformanceCalculator::performance(&attempts);
            println!(
                "\nClosed: {} | Win rate: {:.1}% | Total PnL: {:.2}",
                perf.closed_trades,
                perf.win_rate * 100.0,
                perf.total_pnl
            );
        }

        Commands::Validate { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let sub: FollowerSubscription =
                serde_json::from_str(&raw).context("Invalid subscription JSON")?;

            match validator::validate(&sub) {
                Ok(()) => println!("Config is valid."),
                Err(errors) => {
                    println!("Config has {} error(s):", errors.len());
                    for error in &errors {
                        println!("  - {error}");
                    }
                }
            }

            let sanitized = validator::sanitize(sub);
            println!("\nSanitized config:");
            println!("{}", serde_json::to_string_pretty(&sanitized)?);
        }
    }

    Ok(())
}

/// Fan a handful of simulated master trades out to in-memory followers,
/// then close them and print the realized results.
async fn simulate(
    follower_count: usize,
    equity: f64,
    event_count: usize,
    fail_symbol: Option<String>,
) -> Result<()> {
    let equity = Decimal::try_from(equity)?;

    let store = Arc::new(MemoryStore::new());
    let mut credentials = StaticCredentials::new();
    let mut followers = Vec::new();

    for i in 0..follower_count {
        let follower_id = format!("follower-{i}");
        let mut sub = FollowerSubscription::new(&follower_id, "sim-strategy");
        sub.allocation_mode = AllocationMode::Percent;
        sub.allocation_value = dec!(5);
        sub.max_open_trades = 50;
        let sub = validator::sanitize(sub);

        store.upsert_subscription(&sub).await?;
        store.set_follower_equity(&follower_id, equity).await?;
        credentials = credentials.with_follower(&follower_id);
        followers.push(sub);
    }

    let executor = Arc::new(match fail_symbol {
        Some(symbol) => SimulatedExecutor::failing_on(vec![symbol]),
        None => SimulatedExecutor::new(),
    });

    let engine = Arc::new(Replicator::new(
        store.clone(),
        executor.clone(),
        Arc::new(credentials),
    ));
    let sweeper = engine
        .cache()
        .spawn_sweeper(std::time::Duration::from_secs(60));
    let scheduler = BatchScheduler::new(engine.clone(), SchedulerConfig::default());

    println!("\n=== Simulated Fan-Out ===");
    println!("Followers: {follower_count}  Equity: {equity}  Events: {event_count}");

    let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];
    let mut open_events = Vec::new();
    for i in 0..event_count {
        let event = MasterExecutionEvent {
            strategy_id: "sim-strategy".to_string(),
            master_id: "sim-master".to_string(),
            trade_id: Some(format!("sim-trade-{i}")),
            signal_id: None,
            symbol: symbols[i % symbols.len()].to_string(),
            market: MarketKind::Futures,
            side: TradeSide::Buy,
            leverage: Some(dec!(2)),
            position_size: dec!(1000),
            entry_price: dec!(100),
            stop_loss: None,
            take_profit: None,
            action: TradeAction::Open,
            timestamp: Utc::now(),
        };
        scheduler
            .enqueue_fanout(&event, followers.clone(), i as i32)
            .await;
        open_events.push(event);
    }

    let depth = scheduler.queue_depth().await;
    info!(depth, "Queue loaded");
    let report = scheduler.run_to_completion().await;

    println!("\nDrain report:");
    println!("  Processed: {}", report.processed);
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed:    {}", report.failed);
    println!("  Timed out: {}", report.timed_out);

    // Close every position: winners on even trades, losers on odd ones
    let mut closed = 0usize;
    for (i, open) in open_events.iter().enumerate() {
        let mut close = open.clone();
        close.action = TradeAction::Close;
        close.entry_price = if i % 2 == 0 { dec!(103) } else { dec!(98) };
        close.timestamp = Utc::now();
        let summary = engine.handle_master_close(&close).await?;
        closed += summary.closed;
    }
    println!("\nClosed {closed} follower positions");

    println!(
        "\n{:<12} {:>8} {:>8} {:>9} {:>12}",
        "FOLLOWER", "CLOSED", "WINS", "WINRATE", "TOTAL PNL"
    );
    println!("{}", "-".repeat(52));
    for sub in &followers {
        let attempts = store.attempts_for_follower(&sub.follower_id, 100).await?;
        let perf = PerformanceCalculator::performance(&attempts);
        println!(
            "{:<12} {:>8} {:>8} {:>8.1}% {:>12.2}",
            sub.follower_id,
            perf.closed_trades,
            perf.winning_trades,
            perf.win_rate * 100.0,
            perf.total_pnl
        );
    }

    sweeper.abort();
    Ok(())
}
