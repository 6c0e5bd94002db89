use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod bootstrap;
pub mod commands;
pub mod day_operations;
pub mod schedule_monitor;
pub mod session_runner;

/// Injectable clock; production code uses `Utc::now`.
pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
