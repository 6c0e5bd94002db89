pub mod models;
pub mod reminders;
pub mod schedule;
pub mod session;
pub mod templates;
