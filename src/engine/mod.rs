//! Replication engine: the per-follower orchestrator and the batch
//! scheduler that feeds it.

mod orchestrator;
mod scheduler;

pub use orchestrator::{
    CloseSummary, CopyOutcome, FanoutSummary, FollowerError, Replicator,
};
pub use scheduler::{BatchScheduler, DrainReport, ItemResult, SchedulerConfig, WorkItem};
