//! Storyline Worker
//!
//! The daemon side of the execution substrate: a bounded pool of workers
//! consuming queued run requests, the run orchestrator that drives stories
//! sequentially through the engine, and the schedule trigger that promotes
//! due cron jobs into runs.

pub mod config;
pub mod cron;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod trigger;

pub use config::WorkerConfig;
pub use orchestrator::RunOrchestrator;
pub use pool::WorkerPool;
pub use queue::{RunQueue, SqliteRunQueue};
pub use trigger::ScheduleTrigger;
