use crate::domain::models::{MetricEvent, MetricType, MetricValue};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only sink for wellness metrics. Rows are never updated.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record(&self, event: MetricEvent) -> Result<(), InfraError>;

    /// Newest first; `limit` of `None` returns everything.
    async fn list_for_owner(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MetricEvent>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteMetricStore {
    db_path: PathBuf,
}

impl SqliteMetricStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn insert_event(db_path: &Path, event: &MetricEvent) -> Result<(), InfraError> {
    let connection = open_connection(db_path)?;
    connection.execute(
        "INSERT INTO metric_events (owner, metric_type, value_json, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.owner,
            event.metric_type.as_str(),
            serde_json::to_string(&event.value)?,
            event.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        ],
    )?;
    Ok(())
}

fn select_events(
    db_path: &Path,
    owner: &str,
    limit: Option<usize>,
) -> Result<Vec<MetricEvent>, InfraError> {
    let connection = open_connection(db_path)?;
    let limit = limit.map_or(-1_i64, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
    let mut statement = connection.prepare(
        "SELECT metric_type, value_json, created_at FROM metric_events
         WHERE owner = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = statement
        .query_map(params![owner, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(metric_type_raw, value_json, created_at_raw)| {
            let metric_type = MetricType::parse(&metric_type_raw).ok_or_else(|| {
                InfraError::store(format!("unknown metric_type '{metric_type_raw}'"))
            })?;
            let value: MetricValue = serde_json::from_str(&value_json)?;
            let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
                .map_err(|error| {
                    InfraError::store(format!("invalid metric created_at '{created_at_raw}': {error}"))
                })?
                .with_timezone(&Utc);
            Ok(MetricEvent {
                owner: owner.to_string(),
                metric_type,
                value,
                created_at,
            })
        })
        .collect()
}

#[async_trait]
impl MetricSink for SqliteMetricStore {
    async fn record(&self, event: MetricEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidInput)?;
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || insert_event(&db_path, &event))
            .await
            .map_err(|error| InfraError::store(format!("metric write task failed: {error}")))?
    }

    async fn list_for_owner(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MetricEvent>, InfraError> {
        let db_path = self.db_path.clone();
        let owner = owner.to_string();
        tokio::task::spawn_blocking(move || select_events(&db_path, &owner, limit))
            .await
            .map_err(|error| InfraError::store(format!("metric read task failed: {error}")))?
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    events: Mutex<Vec<MetricEvent>>,
}

impl InMemoryMetricStore {
    pub fn snapshot(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricSink for InMemoryMetricStore {
    async fn record(&self, event: MetricEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidInput)?;
        let mut events = self
            .events
            .lock()
            .map_err(|error| InfraError::store(format!("metric store lock poisoned: {error}")))?;
        events.push(event);
        Ok(())
    }

    async fn list_for_owner(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> Result<Vec<MetricEvent>, InfraError> {
        let events = self
            .events
            .lock()
            .map_err(|error| InfraError::store(format!("metric store lock poisoned: {error}")))?;
        let mut listed = events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.owner == owner)
            .collect::<Vec<_>>();
        listed.sort_by(|(left_index, left), (right_index, right)| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| right_index.cmp(left_index))
        });
        Ok(listed
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(_, event)| event.clone())
            .collect())
    }
}
