pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::day_operations::{DayOpOutcome, NoOpReason};
pub use domain::models::{DayOfWeek, ScheduleBlock, SessionSettings};
pub use infrastructure::error::{InfraError, RowError};

use std::path::PathBuf;

/// Opens (and on first run initializes) a workspace. Falls back to the
/// current directory when `root` is absent.
pub fn open_workspace(root: Option<String>) -> Result<AppState, String> {
    let workspace_root = match root {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };
    AppState::new(workspace_root).map_err(|error| error.to_string())
}
