//! Follower performance statistics: drawdown, win rate, return aggregates.

mod calculator;

pub use calculator::{FollowerPerformance, PerformanceCalculator};
