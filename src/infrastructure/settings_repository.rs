use crate::domain::models::SessionSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-owner session durations. `load` returns `None` until the owner saves once.
pub trait SettingsRepository: Send + Sync {
    fn load(&self, owner: &str) -> Result<Option<SessionSettings>, InfraError>;
    fn save(&self, owner: &str, settings: SessionSettings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSettingsRepository {
    db_path: PathBuf,
}

impl SqliteSettingsRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }
}

impl SettingsRepository for SqliteSettingsRepository {
    fn load(&self, owner: &str) -> Result<Option<SessionSettings>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(u32, u32, u32)> = connection
            .query_row(
                "SELECT focus_minutes, break_minutes, meditation_minutes
                 FROM session_settings WHERE owner = ?1",
                params![owner],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((focus_minutes, break_minutes, meditation_minutes)) = row else {
            return Ok(None);
        };
        let settings = SessionSettings {
            focus_minutes,
            break_minutes,
            meditation_minutes,
        };
        settings
            .validate()
            .map_err(|error| InfraError::store(format!("stored settings for {owner} are invalid: {error}")))?;
        Ok(Some(settings))
    }

    fn save(&self, owner: &str, settings: SessionSettings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO session_settings (owner, focus_minutes, break_minutes, meditation_minutes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(owner) DO UPDATE SET
               focus_minutes = excluded.focus_minutes,
               break_minutes = excluded.break_minutes,
               meditation_minutes = excluded.meditation_minutes,
               updated_at = excluded.updated_at",
            params![
                owner,
                settings.focus_minutes,
                settings.break_minutes,
                settings.meditation_minutes,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsRepository {
    settings: Mutex<HashMap<String, SessionSettings>>,
}

impl SettingsRepository for InMemorySettingsRepository {
    fn load(&self, owner: &str) -> Result<Option<SessionSettings>, InfraError> {
        let settings = self
            .settings
            .lock()
            .map_err(|error| InfraError::store(format!("settings lock poisoned: {error}")))?;
        Ok(settings.get(owner).copied())
    }

    fn save(&self, owner: &str, settings: SessionSettings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        let mut stored = self
            .settings
            .lock()
            .map_err(|error| InfraError::store(format!("settings lock poisoned: {error}")))?;
        stored.insert(owner.to_string(), settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use std::fs;

    fn exercise_repository(repository: &dyn SettingsRepository) {
        assert_eq!(repository.load("alice").expect("load empty"), None);

        let custom = SessionSettings {
            focus_minutes: 25,
            break_minutes: 5,
            meditation_minutes: 15,
        };
        repository.save("alice", custom).expect("save");
        repository
            .save("alice", SessionSettings { focus_minutes: 50, ..custom })
            .expect("overwrite");

        let loaded = repository.load("alice").expect("load").expect("saved");
        assert_eq!(loaded.focus_minutes, 50);
        assert_eq!(loaded.meditation_minutes, 15);
        assert_eq!(repository.load("bob").expect("load bob"), None);

        let invalid = SessionSettings {
            focus_minutes: 0,
            ..custom
        };
        assert!(matches!(
            repository.save("alice", invalid),
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[test]
    fn in_memory_repository_round_trips_per_owner() {
        exercise_repository(&InMemorySettingsRepository::default());
    }

    #[test]
    fn sqlite_repository_round_trips_per_owner() {
        let dir = std::env::temp_dir().join(format!("weekplan-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("weekplan.sqlite");
        initialize_database(&path).expect("init");

        exercise_repository(&SqliteSettingsRepository::new(&path));

        let _ = fs::remove_dir_all(&dir);
    }
}
