use crate::domain::models::{
    BlockField, DayOfWeek, ScheduleBlock, SubTask, format_hhmm, parse_hhmm,
};
use crate::infrastructure::change_feed::{ChangeFeed, ChangeKind, ScheduleChange};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Persistent table of schedule blocks keyed by owner and day of week.
/// Every call is scoped to one owner; bulk calls apply all rows or none.
pub trait ScheduleStore: Send + Sync {
    /// Blocks for the day, ascending by start time.
    fn list_by_day(&self, owner: &str, day: DayOfWeek) -> Result<Vec<ScheduleBlock>, InfraError>;
    fn get(&self, owner: &str, block_id: &str) -> Result<Option<ScheduleBlock>, InfraError>;
    fn upsert(&self, block: &ScheduleBlock) -> Result<(), InfraError>;
    fn bulk_insert(&self, blocks: &[ScheduleBlock]) -> Result<usize, InfraError>;
    fn delete(&self, owner: &str, block_id: &str) -> Result<bool, InfraError>;
    fn delete_by_day(&self, owner: &str, day: DayOfWeek) -> Result<usize, InfraError>;
    fn set_field(&self, owner: &str, block_id: &str, field: BlockField) -> Result<bool, InfraError>;
    fn set_field_many(
        &self,
        owner: &str,
        block_ids: &[String],
        field: BlockField,
    ) -> Result<usize, InfraError>;
    fn subscribe(&self, owner: &str) -> Result<broadcast::Receiver<ScheduleChange>, InfraError>;
}

fn validate_blocks(blocks: &[ScheduleBlock]) -> Result<(), InfraError> {
    for block in blocks {
        block.validate().map_err(|reason| {
            InfraError::invalid_input(format!("block {}: {reason}", block.id))
        })?;
    }
    Ok(())
}

fn publish_grouped(feed: &ChangeFeed, blocks: &[ScheduleBlock]) {
    let mut counts: BTreeMap<(String, DayOfWeek), usize> = BTreeMap::new();
    for block in blocks {
        *counts
            .entry((block.owner.clone(), block.day_of_week))
            .or_default() += 1;
    }
    for ((owner, day), count) in counts {
        feed.publish(ScheduleChange {
            owner,
            day,
            kind: ChangeKind::Inserted { count },
        });
    }
}

fn publish_updates(feed: &ChangeFeed, owner: &str, updated: Vec<(DayOfWeek, String)>) {
    let mut by_day: BTreeMap<DayOfWeek, Vec<String>> = BTreeMap::new();
    for (day, block_id) in updated {
        by_day.entry(day).or_default().push(block_id);
    }
    for (day, block_ids) in by_day {
        feed.publish(ScheduleChange {
            owner: owner.to_string(),
            day,
            kind: ChangeKind::Updated { block_ids },
        });
    }
}

fn sort_blocks(blocks: &mut [ScheduleBlock]) {
    blocks.sort_by(|left, right| {
        left.start_time
            .cmp(&right.start_time)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[derive(Debug)]
pub struct SqliteScheduleStore {
    db_path: PathBuf,
    feed: ChangeFeed,
}

const SELECT_COLUMNS: &str = "id, owner, day_of_week, start_time, end_time, activity, category, \
     color, completed, reminder_enabled, details, sub_tasks, created_at";

struct BlockRow {
    id: String,
    owner: String,
    day_of_week: u8,
    start_time: String,
    end_time: String,
    activity: String,
    category: String,
    color: Option<String>,
    completed: bool,
    reminder_enabled: bool,
    details: Option<String>,
    sub_tasks: String,
    created_at: String,
}

impl BlockRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            day_of_week: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            activity: row.get(5)?,
            category: row.get(6)?,
            color: row.get(7)?,
            completed: row.get(8)?,
            reminder_enabled: row.get(9)?,
            details: row.get(10)?,
            sub_tasks: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_block(self) -> Result<ScheduleBlock, InfraError> {
        let corrupt = |field: &str, detail: String| {
            InfraError::store(format!("corrupt schedule row {} ({field}): {detail}", self.id))
        };
        let day_of_week = DayOfWeek::try_from(self.day_of_week)
            .map_err(|error| corrupt("day_of_week", error))?;
        let start_time =
            parse_hhmm(&self.start_time, "start_time").map_err(|error| corrupt("start_time", error))?;
        let end_time =
            parse_hhmm(&self.end_time, "end_time").map_err(|error| corrupt("end_time", error))?;
        let sub_tasks = serde_json::from_str::<Vec<SubTask>>(&self.sub_tasks)
            .map_err(|error| corrupt("sub_tasks", error.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|error| corrupt("created_at", error.to_string()))?
            .with_timezone(&Utc);

        Ok(ScheduleBlock {
            id: self.id,
            owner: self.owner,
            day_of_week,
            start_time,
            end_time,
            activity: self.activity,
            category: self.category,
            color: self.color,
            completed: self.completed,
            reminder_enabled: self.reminder_enabled,
            details: self.details,
            sub_tasks,
            created_at,
        })
    }
}

impl SqliteScheduleStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            feed: ChangeFeed::default(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        open_connection(&self.db_path)
    }

    fn insert_block(transaction: &Transaction<'_>, block: &ScheduleBlock) -> Result<(), InfraError> {
        transaction.execute(
            "INSERT INTO schedule_blocks (
               id, owner, day_of_week, start_time, end_time, activity, category,
               color, completed, reminder_enabled, details, sub_tasks, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                block.id,
                block.owner,
                block.day_of_week.index(),
                format_hhmm(block.start_time),
                format_hhmm(block.end_time),
                block.activity,
                block.category,
                block.color,
                block.completed,
                block.reminder_enabled,
                block.details,
                serde_json::to_string(&block.sub_tasks)?,
                block.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    fn day_of(
        transaction: &Transaction<'_>,
        owner: &str,
        block_id: &str,
    ) -> Result<Option<DayOfWeek>, InfraError> {
        let day: Option<u8> = transaction
            .query_row(
                "SELECT day_of_week FROM schedule_blocks WHERE owner = ?1 AND id = ?2",
                params![owner, block_id],
                |row| row.get(0),
            )
            .optional()?;
        day.map(|value| DayOfWeek::try_from(value).map_err(InfraError::Store))
            .transpose()
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn list_by_day(&self, owner: &str, day: DayOfWeek) -> Result<Vec<ScheduleBlock>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM schedule_blocks
             WHERE owner = ?1 AND day_of_week = ?2
             ORDER BY start_time, created_at, id"
        ))?;
        let rows = statement
            .query_map(params![owner, day.index()], BlockRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(BlockRow::into_block).collect()
    }

    fn get(&self, owner: &str, block_id: &str) -> Result<Option<ScheduleBlock>, InfraError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM schedule_blocks WHERE owner = ?1 AND id = ?2"),
                params![owner, block_id],
                BlockRow::from_row,
            )
            .optional()?;
        row.map(BlockRow::into_block).transpose()
    }

    fn upsert(&self, block: &ScheduleBlock) -> Result<(), InfraError> {
        validate_blocks(std::slice::from_ref(block))?;
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let previous_day = Self::day_of(&transaction, &block.owner, &block.id)?;
        let changed = transaction.execute(
            "INSERT INTO schedule_blocks (
               id, owner, day_of_week, start_time, end_time, activity, category,
               color, completed, reminder_enabled, details, sub_tasks, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
               day_of_week = excluded.day_of_week,
               start_time = excluded.start_time,
               end_time = excluded.end_time,
               activity = excluded.activity,
               category = excluded.category,
               color = excluded.color,
               completed = excluded.completed,
               reminder_enabled = excluded.reminder_enabled,
               details = excluded.details,
               sub_tasks = excluded.sub_tasks
             WHERE schedule_blocks.owner = excluded.owner",
            params![
                block.id,
                block.owner,
                block.day_of_week.index(),
                format_hhmm(block.start_time),
                format_hhmm(block.end_time),
                block.activity,
                block.category,
                block.color,
                block.completed,
                block.reminder_enabled,
                block.details,
                serde_json::to_string(&block.sub_tasks)?,
                block.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        if changed == 0 {
            return Err(InfraError::store(format!(
                "block {} belongs to another owner",
                block.id
            )));
        }
        transaction.commit()?;

        match previous_day {
            None => publish_grouped(&self.feed, std::slice::from_ref(block)),
            Some(previous) => {
                let mut updated = vec![(block.day_of_week, block.id.clone())];
                if previous != block.day_of_week {
                    updated.push((previous, block.id.clone()));
                }
                publish_updates(&self.feed, &block.owner, updated);
            }
        }
        Ok(())
    }

    fn bulk_insert(&self, blocks: &[ScheduleBlock]) -> Result<usize, InfraError> {
        if blocks.is_empty() {
            return Ok(0);
        }
        validate_blocks(blocks)?;
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        for block in blocks {
            Self::insert_block(&transaction, block)?;
        }
        transaction.commit()?;
        publish_grouped(&self.feed, blocks);
        Ok(blocks.len())
    }

    fn delete(&self, owner: &str, block_id: &str) -> Result<bool, InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let Some(day) = Self::day_of(&transaction, owner, block_id)? else {
            return Ok(false);
        };
        transaction.execute(
            "DELETE FROM schedule_blocks WHERE owner = ?1 AND id = ?2",
            params![owner, block_id],
        )?;
        transaction.commit()?;
        self.feed.publish(ScheduleChange {
            owner: owner.to_string(),
            day,
            kind: ChangeKind::Deleted { count: 1 },
        });
        Ok(true)
    }

    fn delete_by_day(&self, owner: &str, day: DayOfWeek) -> Result<usize, InfraError> {
        let connection = self.connect()?;
        let removed = connection.execute(
            "DELETE FROM schedule_blocks WHERE owner = ?1 AND day_of_week = ?2",
            params![owner, day.index()],
        )?;
        if removed > 0 {
            self.feed.publish(ScheduleChange {
                owner: owner.to_string(),
                day,
                kind: ChangeKind::Deleted { count: removed },
            });
        }
        Ok(removed)
    }

    fn set_field(&self, owner: &str, block_id: &str, field: BlockField) -> Result<bool, InfraError> {
        let updated = self.set_field_many(owner, &[block_id.to_string()], field)?;
        Ok(updated > 0)
    }

    fn set_field_many(
        &self,
        owner: &str,
        block_ids: &[String],
        field: BlockField,
    ) -> Result<usize, InfraError> {
        if block_ids.is_empty() {
            return Ok(0);
        }
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let sql = format!(
            "UPDATE schedule_blocks SET {} = ?1 WHERE owner = ?2 AND id = ?3",
            field.column()
        );
        let mut updated = Vec::new();
        for block_id in block_ids {
            let Some(day) = Self::day_of(&transaction, owner, block_id)? else {
                continue;
            };
            transaction.execute(&sql, params![field.value(), owner, block_id])?;
            updated.push((day, block_id.clone()));
        }
        transaction.commit()?;

        let count = updated.len();
        publish_updates(&self.feed, owner, updated);
        Ok(count)
    }

    fn subscribe(&self, owner: &str) -> Result<broadcast::Receiver<ScheduleChange>, InfraError> {
        self.feed.subscribe(owner)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    blocks: Mutex<HashMap<String, ScheduleBlock>>,
    feed: ChangeFeed,
}

impl InMemoryScheduleStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduleBlock>>, InfraError> {
        self.blocks
            .lock()
            .map_err(|error| InfraError::store(format!("schedule store lock poisoned: {error}")))
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    fn list_by_day(&self, owner: &str, day: DayOfWeek) -> Result<Vec<ScheduleBlock>, InfraError> {
        let blocks = self.lock()?;
        let mut listed = blocks
            .values()
            .filter(|block| block.owner == owner && block.day_of_week == day)
            .cloned()
            .collect::<Vec<_>>();
        sort_blocks(&mut listed);
        Ok(listed)
    }

    fn get(&self, owner: &str, block_id: &str) -> Result<Option<ScheduleBlock>, InfraError> {
        let blocks = self.lock()?;
        Ok(blocks
            .get(block_id)
            .filter(|block| block.owner == owner)
            .cloned())
    }

    fn upsert(&self, block: &ScheduleBlock) -> Result<(), InfraError> {
        validate_blocks(std::slice::from_ref(block))?;
        let previous_day = {
            let mut blocks = self.lock()?;
            let previous = blocks.get(&block.id).cloned();
            if let Some(previous) = &previous {
                if previous.owner != block.owner {
                    return Err(InfraError::store(format!(
                        "block {} belongs to another owner",
                        block.id
                    )));
                }
            }
            let mut stored = block.clone();
            if let Some(previous) = &previous {
                stored.created_at = previous.created_at;
            }
            blocks.insert(block.id.clone(), stored);
            previous.map(|previous| previous.day_of_week)
        };

        match previous_day {
            None => publish_grouped(&self.feed, std::slice::from_ref(block)),
            Some(previous) => {
                let mut updated = vec![(block.day_of_week, block.id.clone())];
                if previous != block.day_of_week {
                    updated.push((previous, block.id.clone()));
                }
                publish_updates(&self.feed, &block.owner, updated);
            }
        }
        Ok(())
    }

    fn bulk_insert(&self, blocks: &[ScheduleBlock]) -> Result<usize, InfraError> {
        if blocks.is_empty() {
            return Ok(0);
        }
        validate_blocks(blocks)?;
        {
            let mut stored = self.lock()?;
            if let Some(duplicate) = blocks.iter().find(|block| stored.contains_key(&block.id)) {
                return Err(InfraError::store(format!(
                    "block id {} already exists",
                    duplicate.id
                )));
            }
            for block in blocks {
                stored.insert(block.id.clone(), block.clone());
            }
        }
        publish_grouped(&self.feed, blocks);
        Ok(blocks.len())
    }

    fn delete(&self, owner: &str, block_id: &str) -> Result<bool, InfraError> {
        let removed = {
            let mut blocks = self.lock()?;
            match blocks.get(block_id) {
                Some(block) if block.owner == owner => blocks.remove(block_id),
                _ => None,
            }
        };
        let Some(removed) = removed else {
            return Ok(false);
        };
        self.feed.publish(ScheduleChange {
            owner: owner.to_string(),
            day: removed.day_of_week,
            kind: ChangeKind::Deleted { count: 1 },
        });
        Ok(true)
    }

    fn delete_by_day(&self, owner: &str, day: DayOfWeek) -> Result<usize, InfraError> {
        let removed = {
            let mut blocks = self.lock()?;
            let before = blocks.len();
            blocks.retain(|_, block| !(block.owner == owner && block.day_of_week == day));
            before - blocks.len()
        };
        if removed > 0 {
            self.feed.publish(ScheduleChange {
                owner: owner.to_string(),
                day,
                kind: ChangeKind::Deleted { count: removed },
            });
        }
        Ok(removed)
    }

    fn set_field(&self, owner: &str, block_id: &str, field: BlockField) -> Result<bool, InfraError> {
        let updated = self.set_field_many(owner, &[block_id.to_string()], field)?;
        Ok(updated > 0)
    }

    fn set_field_many(
        &self,
        owner: &str,
        block_ids: &[String],
        field: BlockField,
    ) -> Result<usize, InfraError> {
        let updated = {
            let mut blocks = self.lock()?;
            let mut updated = Vec::new();
            for block_id in block_ids {
                if let Some(block) = blocks
                    .get_mut(block_id)
                    .filter(|block| block.owner == owner)
                {
                    field.apply(block);
                    updated.push((block.day_of_week, block_id.clone()));
                }
            }
            updated
        };
        let count = updated.len();
        publish_updates(&self.feed, owner, updated);
        Ok(count)
    }

    fn subscribe(&self, owner: &str) -> Result<broadcast::Receiver<ScheduleChange>, InfraError> {
        self.feed.subscribe(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BlockDraft;
    use crate::infrastructure::storage::initialize_database;
    use chrono::NaiveTime;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "weekplan-store-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("weekplan.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn block(owner: &str, day: DayOfWeek, activity: &str, start: u32) -> ScheduleBlock {
        BlockDraft {
            activity: activity.to_string(),
            category: "study".to_string(),
            start_time: hm(start, 0),
            end_time: hm(start + 1, 0),
            reminder_enabled: false,
            color: Some("border-l-indigo-500".to_string()),
            details: Some("notes, with a comma".to_string()),
        }
        .into_block(owner, day)
    }

    fn exercise_store(store: &dyn ScheduleStore) {
        let mut with_tasks = block("alice", DayOfWeek::MONDAY, "Late", 14);
        with_tasks.sub_tasks.push(SubTask {
            id: "sub-1".to_string(),
            text: "outline".to_string(),
            completed: false,
        });
        let inserted = store
            .bulk_insert(&[
                with_tasks.clone(),
                block("alice", DayOfWeek::MONDAY, "Early", 9),
                block("alice", DayOfWeek::TUESDAY, "Other day", 9),
                block("bob", DayOfWeek::MONDAY, "Not mine", 9),
            ])
            .expect("bulk insert");
        assert_eq!(inserted, 4);

        let monday = store.list_by_day("alice", DayOfWeek::MONDAY).expect("list monday");
        assert_eq!(
            monday.iter().map(|block| block.activity.as_str()).collect::<Vec<_>>(),
            vec!["Early", "Late"]
        );
        assert_eq!(monday[1].sub_tasks, with_tasks.sub_tasks);
        assert_eq!(monday[1].details.as_deref(), Some("notes, with a comma"));

        assert!(store.get("bob", &with_tasks.id).expect("get").is_none());
        assert!(!store
            .set_field("bob", &with_tasks.id, BlockField::Completed(true))
            .expect("foreign set_field"));
        assert!(store
            .set_field("alice", &with_tasks.id, BlockField::Completed(true))
            .expect("set_field"));
        assert!(store
            .get("alice", &with_tasks.id)
            .expect("get")
            .expect("exists")
            .completed);

        let mut moved = with_tasks.clone();
        moved.day_of_week = DayOfWeek::WEDNESDAY;
        moved.activity = "Moved".to_string();
        store.upsert(&moved).expect("upsert move");
        assert_eq!(store.list_by_day("alice", DayOfWeek::MONDAY).expect("list").len(), 1);
        assert_eq!(
            store.list_by_day("alice", DayOfWeek::WEDNESDAY).expect("list")[0].activity,
            "Moved"
        );

        let mut hijack = moved.clone();
        hijack.owner = "bob".to_string();
        assert!(store.upsert(&hijack).is_err());

        assert_eq!(store.delete_by_day("alice", DayOfWeek::MONDAY).expect("delete day"), 1);
        assert_eq!(store.list_by_day("bob", DayOfWeek::MONDAY).expect("bob list").len(), 1);
        assert!(store.delete("alice", &moved.id).expect("delete"));
        assert!(!store.delete("alice", &moved.id).expect("delete again"));
    }

    #[test]
    fn in_memory_store_contract() {
        exercise_store(&InMemoryScheduleStore::default());
    }

    #[test]
    fn sqlite_store_contract() {
        let database = TempDatabase::new();
        exercise_store(&SqliteScheduleStore::new(&database.path));
    }

    #[test]
    fn bulk_insert_is_all_or_nothing() {
        let database = TempDatabase::new();
        let store = SqliteScheduleStore::new(&database.path);
        let existing = block("alice", DayOfWeek::MONDAY, "Existing", 8);
        store.bulk_insert(std::slice::from_ref(&existing)).expect("seed");

        let fresh = block("alice", DayOfWeek::MONDAY, "Fresh", 10);
        let result = store.bulk_insert(&[fresh, existing.clone()]);
        assert!(result.is_err());
        assert_eq!(store.list_by_day("alice", DayOfWeek::MONDAY).expect("list").len(), 1);

        let mut invalid = block("alice", DayOfWeek::MONDAY, "Broken", 11);
        invalid.end_time = invalid.start_time;
        assert!(matches!(
            store.bulk_insert(&[invalid]),
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn mutations_publish_change_notifications() {
        let store = InMemoryScheduleStore::default();
        let mut changes = store.subscribe("alice").expect("subscribe");
        let first = block("alice", DayOfWeek::FRIDAY, "One", 9);
        store
            .bulk_insert(&[first.clone(), block("alice", DayOfWeek::FRIDAY, "Two", 11)])
            .expect("insert");
        store
            .set_field("alice", &first.id, BlockField::ReminderEnabled(true))
            .expect("set field");
        store.delete_by_day("alice", DayOfWeek::FRIDAY).expect("delete");

        assert_eq!(
            changes.recv().await.expect("insert change").kind,
            ChangeKind::Inserted { count: 2 }
        );
        assert_eq!(
            changes.recv().await.expect("update change").kind,
            ChangeKind::Updated {
                block_ids: vec![first.id.clone()]
            }
        );
        let deleted = changes.recv().await.expect("delete change");
        assert_eq!(deleted.day, DayOfWeek::FRIDAY);
        assert_eq!(deleted.kind, ChangeKind::Deleted { count: 2 });
    }
}
