use crate::domain::models::SessionSettings;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const SESSIONS_JSON: &str = "sessions.json";
const TICKS_JSON: &str = "ticks.json";
const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: String,
    pub default_owner: String,
}

impl AppConfig {
    pub fn tz(&self) -> Result<Tz, InfraError> {
        parse_timezone(&self.timezone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickConfig {
    pub schedule_tick_seconds: u64,
    pub session_tick_millis: u64,
}

impl TickConfig {
    pub fn schedule_period(&self) -> Duration {
        Duration::from_secs(self.schedule_tick_seconds)
    }

    pub fn session_period(&self) -> Duration {
        Duration::from_millis(self.session_tick_millis)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            schedule_tick_seconds: 60,
            session_tick_millis: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub sessions: SessionSettings,
    pub ticks: TickConfig,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Weekplan",
                "timezone": "UTC",
                "defaultOwner": DEFAULT_OWNER
            }),
        ),
        (
            SESSIONS_JSON,
            serde_json::json!({
                "schema": 1,
                "focusMinutes": 45,
                "breakMinutes": 5,
                "meditationMinutes": 10
            }),
        ),
        (
            TICKS_JSON,
            serde_json::json!({
                "schema": 1,
                "scheduleTickSeconds": 60,
                "sessionTickMillis": 1000
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_str<'v>(value: &'v serde_json::Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn read_positive(value: &serde_json::Value, key: &str, path: &Path) -> Result<u64, InfraError> {
    let number = value
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            InfraError::InvalidConfig(format!("{key} must be a positive integer in {}", path.display()))
        })?;
    if number == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "{key} must be > 0 in {}",
            path.display()
        )));
    }
    Ok(number)
}

fn read_minutes(value: &serde_json::Value, key: &str, path: &Path) -> Result<u32, InfraError> {
    let minutes = read_positive(value, key, path)?;
    u32::try_from(minutes)
        .map_err(|_| InfraError::InvalidConfig(format!("{key} is too large in {}", path.display())))
}

pub fn parse_timezone(value: &str) -> Result<Tz, InfraError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{value}': {error}")))
}

pub fn read_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let app = read_config(&path)?;
    let config = AppConfig {
        app_name: read_str(&app, "appName").unwrap_or("Weekplan").to_string(),
        timezone: read_str(&app, "timezone").unwrap_or("UTC").to_string(),
        default_owner: read_str(&app, "defaultOwner")
            .unwrap_or(DEFAULT_OWNER)
            .to_string(),
    };
    config.tz()?;
    Ok(config)
}

pub fn read_session_defaults(config_dir: &Path) -> Result<SessionSettings, InfraError> {
    let path = config_dir.join(SESSIONS_JSON);
    let sessions = read_config(&path)?;
    Ok(SessionSettings {
        focus_minutes: read_minutes(&sessions, "focusMinutes", &path)?,
        break_minutes: read_minutes(&sessions, "breakMinutes", &path)?,
        meditation_minutes: read_minutes(&sessions, "meditationMinutes", &path)?,
    })
}

pub fn read_tick_config(config_dir: &Path) -> Result<TickConfig, InfraError> {
    let path = config_dir.join(TICKS_JSON);
    let ticks = read_config(&path)?;
    Ok(TickConfig {
        schedule_tick_seconds: read_positive(&ticks, "scheduleTickSeconds", &path)?,
        session_tick_millis: read_positive(&ticks, "sessionTickMillis", &path)?,
    })
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_app_config(config_dir)?,
        sessions: read_session_defaults(config_dir)?,
        ticks: read_tick_config(config_dir)?,
    })
}

pub fn save_timezone(config_dir: &Path, timezone: &str) -> Result<Tz, InfraError> {
    let tz = parse_timezone(timezone)?;
    let path = config_dir.join(APP_JSON);
    let mut app = read_config(&path)?;
    let object = app.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "timezone".to_string(),
        serde_json::Value::String(tz.name().to_string()),
    );
    write_config(&path, &app)?;
    Ok(tz)
}

/// Trimmed owner id; blank ids fall back to `default_owner`.
pub fn normalize_owner(owner: Option<&str>, default_owner: &str) -> String {
    match owner.map(str::trim).filter(|value| !value.is_empty()) {
        Some(owner) => owner.to_string(),
        None => {
            let fallback = default_owner.trim();
            if fallback.is_empty() {
                DEFAULT_OWNER.to_string()
            } else {
                fallback.to_string()
            }
        }
    }
}
