pub mod change_feed;
pub mod config;
pub mod csv_codec;
pub mod error;
pub mod metric_store;
pub mod notifier;
pub mod schedule_store;
pub mod settings_repository;
pub mod storage;
