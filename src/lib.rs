//! Copy-trading replication engine.
//!
//! Given a trade executed by a master strategy, fan it out to every active
//! follower: size each follower's position independently, enforce hard risk
//! limits, isolate followers from each other's failures, and keep an
//! idempotent audit record of every attempt. Invoked as a library by a
//! higher-level event trigger whenever a master trade opens or closes.

pub mod audit;
pub mod cache;
pub mod engine;
pub mod exec;
pub mod models;
pub mod risk;
pub mod sizing;
pub mod stats;
pub mod store;
