use crate::domain::models::{
    BlockDraft, BlockField, DayOfWeek, ScheduleBlock, SubTask, next_id, normalize_optional,
};
use crate::domain::templates::find_template;
use crate::infrastructure::csv_codec;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::schedule_store::ScheduleStore;
use chrono::NaiveTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    EmptySourceDay,
    EmptyDay,
    AllCompleted,
    UnknownTemplate,
    EmptyImport,
}

impl NoOpReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::EmptySourceDay => "Nothing to copy: the source day has no blocks",
            Self::EmptyDay => "Nothing to do: the day has no blocks",
            Self::AllCompleted => "Nothing to do: every block is already checked in",
            Self::UnknownTemplate => "Nothing to do: unknown template",
            Self::EmptyImport => "Nothing to import: the CSV has no data rows",
        }
    }
}

/// Result of a day operation that may legitimately have nothing to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum DayOpOutcome<T> {
    Applied(T),
    NothingToDo(NoOpReason),
}

impl<T> DayOpOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::NothingToDo(_) => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NothingToDo(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub day: DayOfWeek,
    pub blocks: Vec<ScheduleBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvExport {
    pub file_name: String,
    pub content: String,
}

/// Partial edit of a block. `None` leaves a field untouched; an empty
/// `color`/`details` string clears it.
#[derive(Debug, Clone, Default)]
pub struct BlockUpdate {
    pub day_of_week: Option<DayOfWeek>,
    pub activity: Option<String>,
    pub category: Option<String>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reminder_enabled: Option<bool>,
    pub color: Option<String>,
    pub details: Option<String>,
}

impl BlockUpdate {
    fn apply(self, block: &mut ScheduleBlock) {
        if let Some(day) = self.day_of_week {
            block.day_of_week = day;
        }
        if let Some(activity) = self.activity {
            block.activity = activity.trim().to_string();
        }
        if let Some(category) = self.category {
            block.category = category.trim().to_string();
        }
        if let Some(start_time) = self.start_time {
            block.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            block.end_time = end_time;
        }
        if let Some(reminder_enabled) = self.reminder_enabled {
            block.reminder_enabled = reminder_enabled;
        }
        if let Some(color) = self.color {
            block.color = normalize_optional(Some(color));
        }
        if let Some(details) = self.details {
            block.details = normalize_optional(Some(details));
        }
    }
}

#[derive(Debug, Default)]
struct DayLocks {
    locks: Mutex<HashMap<(String, DayOfWeek), Arc<Mutex<()>>>>,
}

impl DayLocks {
    fn handle(&self, owner: &str, day: DayOfWeek) -> Result<Arc<Mutex<()>>, InfraError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|error| InfraError::store(format!("day lock table poisoned: {error}")))?;
        Ok(locks
            .entry((owner.to_string(), day))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

/// Bulk and single-block schedule edits, serialized per (owner, day).
pub struct DayOperations<S>
where
    S: ScheduleStore + ?Sized,
{
    store: Arc<S>,
    locks: DayLocks,
}

impl<S> DayOperations<S>
where
    S: ScheduleStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DayLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs `operation` holding every listed day's lock, acquired in day order.
    fn with_days<T>(
        &self,
        owner: &str,
        days: &[DayOfWeek],
        operation: impl FnOnce() -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut ordered = days.to_vec();
        ordered.sort();
        ordered.dedup();
        let handles = ordered
            .into_iter()
            .map(|day| self.locks.handle(owner, day))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(
                handle
                    .lock()
                    .map_err(|error| InfraError::store(format!("day lock poisoned: {error}")))?,
            );
        }
        let result = operation();
        drop(guards);
        result
    }

    fn require_block(&self, owner: &str, block_id: &str) -> Result<ScheduleBlock, InfraError> {
        self.store
            .get(owner, block_id)?
            .ok_or_else(|| InfraError::invalid_input(format!("block not found: {block_id}")))
    }

    /// Re-reads the block under its day lock and hands it to `edit`. If the
    /// block moved to another day before the lock was taken, retries under
    /// the new day's lock.
    fn with_block<T>(
        &self,
        owner: &str,
        block_id: &str,
        edit: impl FnOnce(ScheduleBlock) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let mut edit = Some(edit);
        loop {
            let day = self.require_block(owner, block_id)?.day_of_week;
            let applied = self.with_days(owner, &[day], || {
                let block = self.require_block(owner, block_id)?;
                if block.day_of_week != day {
                    return Ok(None);
                }
                let edit = edit
                    .take()
                    .ok_or_else(|| InfraError::store(format!("edit of {block_id} already applied")))?;
                edit(block).map(Some)
            })?;
            if let Some(value) = applied {
                return Ok(value);
            }
        }
    }

    pub fn list_day(&self, owner: &str, day: DayOfWeek) -> Result<Vec<ScheduleBlock>, InfraError> {
        self.store.list_by_day(owner, day)
    }

    pub fn list_week(&self, owner: &str) -> Result<Vec<DaySchedule>, InfraError> {
        DayOfWeek::week()
            .map(|day| {
                Ok(DaySchedule {
                    day,
                    blocks: self.store.list_by_day(owner, day)?,
                })
            })
            .collect()
    }

    pub fn add_block(
        &self,
        owner: &str,
        day: DayOfWeek,
        draft: BlockDraft,
    ) -> Result<ScheduleBlock, InfraError> {
        draft
            .validate()
            .map_err(|reason| InfraError::invalid_input(format!("{day}: {reason}")))?;
        let block = draft.into_block(owner, day);
        self.with_days(owner, &[day], || self.store.upsert(&block))?;
        Ok(block)
    }

    pub fn update_block(
        &self,
        owner: &str,
        block_id: &str,
        update: BlockUpdate,
    ) -> Result<ScheduleBlock, InfraError> {
        let current = self.require_block(owner, block_id)?;
        let mut days = vec![current.day_of_week];
        days.extend(update.day_of_week);
        self.with_days(owner, &days, || {
            let mut block = self.require_block(owner, block_id)?;
            update.apply(&mut block);
            block
                .validate()
                .map_err(|reason| InfraError::invalid_input(format!("block {block_id}: {reason}")))?;
            self.store.upsert(&block)?;
            Ok(block)
        })
    }

    pub fn delete_block(&self, owner: &str, block_id: &str) -> Result<bool, InfraError> {
        let Some(block) = self.store.get(owner, block_id)? else {
            return Ok(false);
        };
        self.with_days(owner, &[block.day_of_week], || {
            self.store.delete(owner, block_id)
        })
    }

    /// Flips `completed` regardless of the block's time status.
    pub fn toggle_check_in(&self, owner: &str, block_id: &str) -> Result<ScheduleBlock, InfraError> {
        self.with_block(owner, block_id, |mut block| {
            let completed = !block.completed;
            if !self
                .store
                .set_field(owner, block_id, BlockField::Completed(completed))?
            {
                return Err(InfraError::invalid_input(format!("block not found: {block_id}")));
            }
            block.completed = completed;
            Ok(block)
        })
    }

    /// Marks every incomplete block of the day completed; returns the count changed.
    pub fn bulk_check_in(
        &self,
        owner: &str,
        day: DayOfWeek,
    ) -> Result<DayOpOutcome<usize>, InfraError> {
        self.with_days(owner, &[day], || {
            let blocks = self.store.list_by_day(owner, day)?;
            if blocks.is_empty() {
                return Ok(DayOpOutcome::NothingToDo(NoOpReason::EmptyDay));
            }
            let pending = blocks
                .iter()
                .filter(|block| !block.completed)
                .map(|block| block.id.clone())
                .collect::<Vec<_>>();
            if pending.is_empty() {
                return Ok(DayOpOutcome::NothingToDo(NoOpReason::AllCompleted));
            }
            let updated = self
                .store
                .set_field_many(owner, &pending, BlockField::Completed(true))?;
            Ok(DayOpOutcome::Applied(updated))
        })
    }

    /// Replaces `target`'s blocks with copies of `source`'s. An empty source
    /// leaves the target untouched.
    pub fn duplicate_day(
        &self,
        owner: &str,
        source: DayOfWeek,
        target: DayOfWeek,
    ) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
        if source == target {
            return Err(InfraError::invalid_input(format!(
                "cannot duplicate {source} onto itself"
            )));
        }

        self.with_days(owner, &[source, target], || {
            let originals = self.store.list_by_day(owner, source)?;
            if originals.is_empty() {
                return Ok(DayOpOutcome::NothingToDo(NoOpReason::EmptySourceDay));
            }
            let copies = originals
                .iter()
                .map(|block| copy_to_day(block, owner, target))
                .collect::<Vec<_>>();

            let removed = self.store.delete_by_day(owner, target)?;
            if let Err(error) = self.store.bulk_insert(&copies) {
                return Err(InfraError::PartialWrite {
                    operation: "duplicate_day",
                    detail: format!(
                        "removed {removed} block(s) from {target} but copying {} block(s) from {source} failed: {error}",
                        copies.len()
                    ),
                });
            }
            Ok(DayOpOutcome::Applied(copies))
        })
    }

    /// Appends the template's blocks to `day`; existing blocks are kept.
    pub fn apply_template(
        &self,
        owner: &str,
        day: DayOfWeek,
        template_key: &str,
    ) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
        let Some(template) = find_template(template_key) else {
            return Ok(DayOpOutcome::NothingToDo(NoOpReason::UnknownTemplate));
        };
        let blocks = template.instantiate(owner, day);
        self.with_days(owner, &[day], || self.store.bulk_insert(&blocks))?;
        Ok(DayOpOutcome::Applied(blocks))
    }

    /// Validates every row before inserting any; one bad row rejects the file.
    pub fn import_csv(
        &self,
        owner: &str,
        day: DayOfWeek,
        text: &str,
    ) -> Result<DayOpOutcome<Vec<ScheduleBlock>>, InfraError> {
        let drafts = csv_codec::parse_strict(text)?;
        if drafts.is_empty() {
            return Ok(DayOpOutcome::NothingToDo(NoOpReason::EmptyImport));
        }
        let blocks = drafts
            .into_iter()
            .map(|draft| draft.into_block(owner, day))
            .collect::<Vec<_>>();
        self.with_days(owner, &[day], || self.store.bulk_insert(&blocks))?;
        Ok(DayOpOutcome::Applied(blocks))
    }

    pub fn export_csv(
        &self,
        owner: &str,
        day: DayOfWeek,
    ) -> Result<DayOpOutcome<CsvExport>, InfraError> {
        let blocks = self.store.list_by_day(owner, day)?;
        if blocks.is_empty() {
            return Ok(DayOpOutcome::NothingToDo(NoOpReason::EmptyDay));
        }
        Ok(DayOpOutcome::Applied(CsvExport {
            file_name: export_file_name(day),
            content: csv_codec::serialize(&blocks)?,
        }))
    }

    pub fn add_sub_task(
        &self,
        owner: &str,
        block_id: &str,
        text: &str,
    ) -> Result<ScheduleBlock, InfraError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InfraError::invalid_input("sub-task text must not be empty"));
        }
        self.with_block(owner, block_id, |mut block| {
            block.sub_tasks.push(SubTask {
                id: next_id("sub"),
                text: text.to_string(),
                completed: false,
            });
            self.store.upsert(&block)?;
            Ok(block)
        })
    }

    pub fn toggle_sub_task(
        &self,
        owner: &str,
        block_id: &str,
        sub_task_id: &str,
    ) -> Result<ScheduleBlock, InfraError> {
        self.with_block(owner, block_id, |mut block| {
            let sub_task = block
                .sub_tasks
                .iter_mut()
                .find(|sub_task| sub_task.id == sub_task_id)
                .ok_or_else(|| {
                    InfraError::invalid_input(format!(
                        "sub-task {sub_task_id} not found on block {block_id}"
                    ))
                })?;
            sub_task.completed = !sub_task.completed;
            self.store.upsert(&block)?;
            Ok(block)
        })
    }

    pub fn remove_sub_task(
        &self,
        owner: &str,
        block_id: &str,
        sub_task_id: &str,
    ) -> Result<ScheduleBlock, InfraError> {
        self.with_block(owner, block_id, |mut block| {
            let before = block.sub_tasks.len();
            block.sub_tasks.retain(|sub_task| sub_task.id != sub_task_id);
            if block.sub_tasks.len() == before {
                return Err(InfraError::invalid_input(format!(
                    "sub-task {sub_task_id} not found on block {block_id}"
                )));
            }
            self.store.upsert(&block)?;
            Ok(block)
        })
    }
}

pub fn export_file_name(day: DayOfWeek) -> String {
    format!("{}_schedule.csv", day.name())
}

/// Fresh ids, same content, completion and sub-task state.
fn copy_to_day(block: &ScheduleBlock, owner: &str, day: DayOfWeek) -> ScheduleBlock {
    let mut copy = block.draft().into_block(owner, day);
    copy.completed = block.completed;
    copy.sub_tasks = block
        .sub_tasks
        .iter()
        .map(|sub_task| SubTask {
            id: next_id("sub"),
            text: sub_task.text.clone(),
            completed: sub_task.completed,
        })
        .collect();
    copy
}
