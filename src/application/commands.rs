use crate::application::bootstrap::bootstrap_workspace;
use crate::application::day_operations::{
    BlockUpdate, CsvExport, DayOpOutcome, DayOperations, DaySchedule,
};
use crate::application::schedule_monitor::{MonitorTick, ScheduleMonitor};
use crate::application::session_runner::SessionRunner;
use crate::domain::models::{
    BlockDraft, DayOfWeek, MetricEvent, MetricType, MetricValue, ScheduleBlock, SessionSettings,
    SessionType, parse_hhmm,
};
use crate::domain::schedule::ScheduleSnapshot;
use crate::domain::session::{SessionDurations, SessionState};
use crate::domain::templates::{TEMPLATE_CATALOG_VERSION, TemplateSummary, list_templates};
use crate::infrastructure::config::{TickConfig, normalize_owner, save_timezone};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::metric_store::{MetricSink, SqliteMetricStore};
use crate::infrastructure::notifier::{LogNotificationSink, NotificationSink};
use crate::infrastructure::schedule_store::SqliteScheduleStore;
use crate::infrastructure::settings_repository::{SettingsRepository, SqliteSettingsRepository};
use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;

type Monitor = ScheduleMonitor<SqliteScheduleStore, dyn NotificationSink>;
type Runner = SessionRunner<SqliteMetricStore>;

struct MonitorHandle {
    monitor: Arc<Monitor>,
    shutdown: Option<watch::Sender<bool>>,
}

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    default_owner: String,
    session_defaults: SessionSettings,
    ticks: TickConfig,
    timezone: Mutex<Tz>,
    day_operations: DayOperations<SqliteScheduleStore>,
    settings: Arc<SqliteSettingsRepository>,
    metrics: Arc<SqliteMetricStore>,
    notifier: Arc<dyn NotificationSink>,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
    sessions: Mutex<HashMap<String, Arc<Runner>>>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let timezone = bootstrap.config.app.tz()?;
        let store = Arc::new(SqliteScheduleStore::new(&bootstrap.database_path));

        Ok(Self {
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path.clone(),
            logs_dir: bootstrap.logs_dir,
            default_owner: bootstrap.config.app.default_owner,
            session_defaults: bootstrap.config.sessions,
            ticks: bootstrap.config.ticks,
            timezone: Mutex::new(timezone),
            day_operations: DayOperations::new(store),
            settings: Arc::new(SqliteSettingsRepository::new(&bootstrap.database_path)),
            metrics: Arc::new(SqliteMetricStore::new(&bootstrap.database_path)),
            notifier: Arc::new(LogNotificationSink),
            monitors: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            log_guard: Mutex::new(()),
        })
    }

    /// Replaces the reminder destination; call before any monitor is created.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn ticks(&self) -> TickConfig {
        self.ticks
    }

    pub fn owner(&self, owner: Option<String>) -> String {
        normalize_owner(owner.as_deref(), &self.default_owner)
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn timezone(&self) -> Result<Tz, InfraError> {
        self.timezone
            .lock()
            .map(|timezone| *timezone)
            .map_err(|error| InfraError::store(format!("timezone lock poisoned: {error}")))
    }

    fn lock_monitors(&self) -> Result<MutexGuard<'_, HashMap<String, MonitorHandle>>, InfraError> {
        self.monitors
            .lock()
            .map_err(|error| InfraError::store(format!("monitor table lock poisoned: {error}")))
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Runner>>>, InfraError> {
        self.sessions
            .lock()
            .map_err(|error| InfraError::store(format!("session table lock poisoned: {error}")))
    }

    fn monitor(&self, owner: &str) -> Result<Arc<Monitor>, InfraError> {
        let timezone = self.timezone()?;
        let mut monitors = self.lock_monitors()?;
        let handle = monitors.entry(owner.to_string()).or_insert_with(|| MonitorHandle {
            monitor: Arc::new(ScheduleMonitor::new(
                owner,
                Arc::clone(self.day_operations.store()),
                Arc::clone(&self.notifier),
                timezone,
            )),
            shutdown: None,
        });
        Ok(Arc::clone(&handle.monitor))
    }

    fn session_settings(&self, owner: &str) -> Result<SessionSettings, InfraError> {
        Ok(self.settings.load(owner)?.unwrap_or(self.session_defaults))
    }

    fn runner(&self, owner: &str) -> Result<Arc<Runner>, InfraError> {
        if let Some(runner) = self.lock_sessions()?.get(owner) {
            return Ok(Arc::clone(runner));
        }
        let durations = SessionDurations::from(self.session_settings(owner)?);
        let mut sessions = self.lock_sessions()?;
        let runner = sessions.entry(owner.to_string()).or_insert_with(|| {
            Arc::new(SessionRunner::new(
                owner,
                Arc::clone(&self.metrics),
                durations,
                self.ticks.session_period(),
            ))
        });
        Ok(Arc::clone(runner))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockInput {
    pub activity: String,
    pub category: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub reminder_enabled: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl BlockInput {
    fn into_draft(self) -> Result<BlockDraft, InfraError> {
        Ok(BlockDraft {
            activity: self.activity.trim().to_string(),
            category: self.category.trim().to_string(),
            start_time: parse_hhmm(&self.start_time, "start_time").map_err(InfraError::InvalidInput)?,
            end_time: parse_hhmm(&self.end_time, "end_time").map_err(InfraError::InvalidInput)?,
            reminder_enabled: self.reminder_enabled,
            color: self.color,
            details: self.details,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockPatch {
    #[serde(default)]
    pub day_of_week: Option<u8>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub reminder_enabled: Option<bool>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl BlockPatch {
    fn into_update(self) -> Result<BlockUpdate, InfraError> {
        let parse_time = |value: Option<String>, field: &str| {
            value
                .map(|raw| parse_hhmm(&raw, field).map_err(InfraError::InvalidInput))
                .transpose()
        };
        Ok(BlockUpdate {
            day_of_week: self.day_of_week.map(parse_day).transpose()?,
            activity: self.activity,
            category: self.category,
            start_time: parse_time(self.start_time, "start_time")?,
            end_time: parse_time(self.end_time, "end_time")?,
            reminder_enabled: self.reminder_enabled,
            color: self.color,
            details: self.details,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateCatalogResponse {
    pub version: u32,
    pub templates: Vec<TemplateSummary>,
}

fn parse_day(value: u8) -> Result<DayOfWeek, InfraError> {
    DayOfWeek::try_from(value).map_err(InfraError::InvalidInput)
}

fn parse_session_type(value: &str) -> Result<SessionType, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "focus" => Ok(SessionType::Focus),
        "meditation" => Ok(SessionType::Meditation),
        other => Err(InfraError::invalid_input(format!(
            "session_type must be focus or meditation, got '{other}'"
        ))),
    }
}

fn describe_outcome<T>(outcome: &DayOpOutcome<T>, applied: impl FnOnce(&T) -> String) -> String {
    match outcome {
        DayOpOutcome::Applied(value) => applied(value),
        DayOpOutcome::NothingToDo(reason) => reason.message().to_string(),
    }
}

pub fn list_day_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
) -> Result<Vec<ScheduleBlock>, InfraError> {
    let owner = state.owner(owner);
    state.day_operations.list_day(&owner, parse_day(day)?)
}

pub fn list_week_impl(state: &AppState, owner: Option<String>) -> Result<Vec<DaySchedule>, InfraError> {
    let owner = state.owner(owner);
    state.day_operations.list_week(&owner)
}

pub fn add_block_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
    input: BlockInput,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    let day = parse_day(day)?;
    let block = state
        .day_operations
        .add_block(&owner, day, input.into_draft()?)?;
    state.log_info(
        "add_block",
        &format!("owner={owner} day={day} block_id={}", block.id),
    );
    Ok(block)
}

pub fn update_block_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
    patch: BlockPatch,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    let block = state
        .day_operations
        .update_block(&owner, block_id.trim(), patch.into_update()?)?;
    state.log_info("update_block", &format!("owner={owner} block_id={}", block.id));
    Ok(block)
}

pub fn delete_block_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
) -> Result<bool, InfraError> {
    let owner = state.owner(owner);
    let deleted = state.day_operations.delete_block(&owner, block_id.trim())?;
    state.log_info(
        "delete_block",
        &format!("owner={owner} block_id={} deleted={deleted}", block_id.trim()),
    );
    Ok(deleted)
}

pub fn toggle_check_in_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    let block = state.day_operations.toggle_check_in(&owner, block_id.trim())?;
    state.log_info(
        "toggle_check_in",
        &format!("owner={owner} block_id={} completed={}", block.id, block.completed),
    );
    Ok(block)
}

pub fn bulk_check_in_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
) -> Result<DayOpOutcome<usize>, InfraError> {
    let owner = state.owner(owner);
    let day = parse_day(day)?;
    let outcome = state.day_operations.bulk_check_in(&owner, day)?;
    state.log_info(
        "bulk_check_in",
        &format!(
            "owner={owner} day={day} {}",
            describe_outcome(&outcome, |count| format!("checked in {count} block(s)"))
        ),
    );
    Ok(outcome)
}

pub fn duplicate_day_impl(
    state: &AppState,
    owner: Option<String>,
    source_day: u8,
    target_day: u8,
) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
    let owner = state.owner(owner);
    let source = parse_day(source_day)?;
    let target = parse_day(target_day)?;
    let outcome = state.day_operations.duplicate_day(&owner, source, target)?;
    state.log_info(
        "duplicate_day",
        &format!(
            "owner={owner} {source}->{target} {}",
            describe_outcome(&outcome, |blocks| format!("copied {} block(s)", blocks.len()))
        ),
    );
    Ok(outcome)
}

pub fn list_templates_impl() -> TemplateCatalogResponse {
    TemplateCatalogResponse {
        version: TEMPLATE_CATALOG_VERSION,
        templates: list_templates(),
    }
}

pub fn apply_template_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
    template_key: String,
) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
    let owner = state.owner(owner);
    let day = parse_day(day)?;
    let outcome = state
        .day_operations
        .apply_template(&owner, day, &template_key)?;
    state.log_info(
        "apply_template",
        &format!(
            "owner={owner} day={day} template={} {}",
            template_key.trim(),
            describe_outcome(&outcome, |blocks| format!("inserted {} block(s)", blocks.len()))
        ),
    );
    Ok(outcome)
}

pub fn import_csv_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
    csv_text: String,
) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
    let owner = state.owner(owner);
    let day = parse_day(day)?;
    let outcome = state.day_operations.import_csv(&owner, day, &csv_text)?;
    state.log_info(
        "import_csv",
        &format!(
            "owner={owner} day={day} {}",
            describe_outcome(&outcome, |blocks| format!("imported {} block(s)", blocks.len()))
        ),
    );
    Ok(outcome)
}

pub fn export_csv_impl(
    state: &AppState,
    owner: Option<String>,
    day: u8,
) -> Result<DayOpOutcome<CsvExport>, InfraError> {
    let owner = state.owner(owner);
    state.day_operations.export_csv(&owner, parse_day(day)?)
}

pub fn add_sub_task_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
    text: String,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    let block = state
        .day_operations
        .add_sub_task(&owner, block_id.trim(), &text)?;
    state.log_info("add_sub_task", &format!("owner={owner} block_id={}", block.id));
    Ok(block)
}

pub fn toggle_sub_task_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
    sub_task_id: String,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    state
        .day_operations
        .toggle_sub_task(&owner, block_id.trim(), sub_task_id.trim())
}

pub fn remove_sub_task_impl(
    state: &AppState,
    owner: Option<String>,
    block_id: String,
    sub_task_id: String,
) -> Result<ScheduleBlock, InfraError> {
    let owner = state.owner(owner);
    let block = state
        .day_operations
        .remove_sub_task(&owner, block_id.trim(), sub_task_id.trim())?;
    state.log_info(
        "remove_sub_task",
        &format!("owner={owner} block_id={} sub_task_id={}", block.id, sub_task_id.trim()),
    );
    Ok(block)
}

pub fn get_schedule_snapshot_impl(
    state: &AppState,
    owner: Option<String>,
) -> Result<ScheduleSnapshot, InfraError> {
    let owner = state.owner(owner);
    state.monitor(&owner)?.refresh()
}

pub async fn tick_schedule_impl(
    state: &AppState,
    owner: Option<String>,
) -> Result<MonitorTick, InfraError> {
    let owner = state.owner(owner);
    let monitor = state.monitor(&owner)?;
    monitor.tick().await
}

/// Spawns the background monitor loop for `owner`. Returns false when it is
/// already running; fails without side effects outside a tokio runtime.
pub fn start_schedule_monitor_impl(state: &AppState, owner: Option<String>) -> Result<bool, InfraError> {
    let owner = state.owner(owner);
    let runtime = Handle::try_current()
        .map_err(|error| InfraError::store(format!("schedule monitor needs a tokio runtime: {error}")))?;
    let monitor = state.monitor(&owner)?;
    let mut monitors = state.lock_monitors()?;
    let Some(handle) = monitors.get_mut(&owner) else {
        return Err(InfraError::store(format!("monitor for {owner} vanished")));
    };
    if handle.shutdown.is_some() {
        return Ok(false);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    handle.shutdown = Some(shutdown_tx);
    let period = state.ticks.schedule_period();
    runtime.spawn(async move {
        if let Err(error) = monitor.run(period, shutdown_rx).await {
            log::error!("schedule monitor for {} exited: {error}", monitor.owner());
        }
    });
    state.log_info("start_schedule_monitor", &format!("owner={owner}"));
    Ok(true)
}

pub fn stop_schedule_monitor_impl(state: &AppState, owner: Option<String>) -> Result<bool, InfraError> {
    let owner = state.owner(owner);
    let mut monitors = state.lock_monitors()?;
    let Some(shutdown) = monitors
        .get_mut(&owner)
        .and_then(|handle| handle.shutdown.take())
    else {
        return Ok(false);
    };
    let _ = shutdown.send(true);
    state.log_info("stop_schedule_monitor", &format!("owner={owner}"));
    Ok(true)
}

/// Persists the timezone and stops every monitor; the next snapshot or
/// monitor start for an owner uses the new zone.
pub fn set_timezone_impl(state: &AppState, timezone: String) -> Result<String, InfraError> {
    let tz = save_timezone(&state.config_dir, &timezone)?;
    {
        let mut current = state
            .timezone
            .lock()
            .map_err(|error| InfraError::store(format!("timezone lock poisoned: {error}")))?;
        *current = tz;
    }
    let mut monitors = state.lock_monitors()?;
    for handle in monitors.values_mut() {
        if let Some(shutdown) = handle.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
    monitors.clear();
    state.log_info("set_timezone", &format!("timezone={}", tz.name()));
    Ok(tz.name().to_string())
}

pub fn get_session_settings_impl(
    state: &AppState,
    owner: Option<String>,
) -> Result<SessionSettings, InfraError> {
    let owner = state.owner(owner);
    state.session_settings(&owner)
}

pub fn save_session_settings_impl(
    state: &AppState,
    owner: Option<String>,
    settings: SessionSettings,
) -> Result<SessionSettings, InfraError> {
    let owner = state.owner(owner);
    state.settings.save(&owner, settings)?;
    if let Some(runner) = state.lock_sessions()?.get(&owner) {
        runner.set_durations(SessionDurations::from(settings))?;
    }
    state.log_info(
        "save_session_settings",
        &format!(
            "owner={owner} focus={} break={} meditation={}",
            settings.focus_minutes, settings.break_minutes, settings.meditation_minutes
        ),
    );
    Ok(settings)
}

pub fn start_session_impl(
    state: &AppState,
    owner: Option<String>,
    session_type: String,
) -> Result<SessionState, InfraError> {
    let owner = state.owner(owner);
    let session_type = parse_session_type(&session_type)?;
    let started = state.runner(&owner)?.start(session_type)?;
    state.log_info(
        "start_session",
        &format!(
            "owner={owner} type={session_type:?} remaining={}",
            started.remaining_seconds
        ),
    );
    Ok(started)
}

pub fn pause_session_impl(state: &AppState, owner: Option<String>) -> Result<SessionState, InfraError> {
    let owner = state.owner(owner);
    state.runner(&owner)?.pause()
}

pub fn resume_session_impl(state: &AppState, owner: Option<String>) -> Result<SessionState, InfraError> {
    let owner = state.owner(owner);
    state.runner(&owner)?.resume()
}

pub fn cancel_session_impl(state: &AppState, owner: Option<String>) -> Result<SessionState, InfraError> {
    let owner = state.owner(owner);
    let cancelled = state.runner(&owner)?.cancel()?;
    state.log_info("cancel_session", &format!("owner={owner}"));
    Ok(cancelled)
}

pub fn get_session_state_impl(state: &AppState, owner: Option<String>) -> Result<SessionState, InfraError> {
    let owner = state.owner(owner);
    state.runner(&owner)?.state()
}

pub async fn record_water_intake_impl(
    state: &AppState,
    owner: Option<String>,
    milliliters: u32,
) -> Result<MetricEvent, InfraError> {
    let owner = state.owner(owner);
    let event = MetricEvent {
        owner: owner.clone(),
        metric_type: MetricType::WaterIntake,
        value: MetricValue::Amount { milliliters },
        created_at: Utc::now(),
    };
    state.metrics.record(event.clone()).await?;
    state.log_info("record_water_intake", &format!("owner={owner} ml={milliliters}"));
    Ok(event)
}

pub async fn record_mood_impl(
    state: &AppState,
    owner: Option<String>,
    rating: u8,
) -> Result<MetricEvent, InfraError> {
    let owner = state.owner(owner);
    let event = MetricEvent {
        owner: owner.clone(),
        metric_type: MetricType::Mood,
        value: MetricValue::Rating { rating },
        created_at: Utc::now(),
    };
    state.metrics.record(event.clone()).await?;
    state.log_info("record_mood", &format!("owner={owner} rating={rating}"));
    Ok(event)
}

pub async fn list_metrics_impl(
    state: &AppState,
    owner: Option<String>,
    limit: Option<usize>,
) -> Result<Vec<MetricEvent>, InfraError> {
    let owner = state.owner(owner);
    state.metrics.list_for_owner(&owner, limit).await
}
