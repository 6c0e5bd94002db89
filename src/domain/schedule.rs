use crate::domain::models::{
    BlockStatus, DayOfWeek, ScheduleBlock, format_hhmm, truncate_to_minute,
};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone};
use serde::Serialize;

pub const NOTHING_SCHEDULED: &str = "Nothing scheduled";

/// Wall-clock position within the week, minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WallClock {
    pub day: DayOfWeek,
    #[serde(with = "crate::domain::models::hhmm")]
    pub time: NaiveTime,
}

impl WallClock {
    pub fn new(day: DayOfWeek, time: NaiveTime) -> Self {
        Self {
            day,
            time: truncate_to_minute(time),
        }
    }

    pub fn from_datetime<Tz: TimeZone>(value: &DateTime<Tz>) -> Self {
        Self::new(
            DayOfWeek::from_weekday(value.weekday()),
            value.time(),
        )
    }
}

/// Derives a block's display status. Blocks on another day than `now.day`
/// are only ever Completed or Pending.
pub fn block_status(block: &ScheduleBlock, now: WallClock) -> BlockStatus {
    if block.completed {
        return BlockStatus::Completed;
    }
    if block.day_of_week != now.day {
        return BlockStatus::Pending;
    }
    if now.time >= block.end_time {
        BlockStatus::Missed
    } else if block.contains(now.time) {
        BlockStatus::Active
    } else {
        BlockStatus::Pending
    }
}

/// First block, in ascending start time, whose interval contains `now`.
/// Completed blocks still count; only the interval matters.
pub fn resolve_active(blocks: &[ScheduleBlock], now: WallClock) -> Option<&ScheduleBlock> {
    let mut candidates = blocks
        .iter()
        .filter(|block| block.day_of_week == now.day && block.contains(now.time))
        .collect::<Vec<_>>();
    candidates.sort_by_key(|block| block.start_time);
    candidates.into_iter().next()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStatusEntry {
    pub block_id: String,
    pub activity: String,
    #[serde(with = "crate::domain::models::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::domain::models::hhmm")]
    pub end_time: NaiveTime,
    pub status: BlockStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayProgress {
    pub total: usize,
    pub completed: usize,
    pub missed: usize,
    pub active: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSnapshot {
    pub now: WallClock,
    pub active: Option<ScheduleBlock>,
    pub statuses: Vec<BlockStatusEntry>,
    pub progress: DayProgress,
}

impl ScheduleSnapshot {
    pub fn empty(now: WallClock) -> Self {
        Self {
            now,
            active: None,
            statuses: Vec::new(),
            progress: DayProgress::default(),
        }
    }

    pub fn active_label(&self) -> &str {
        self.active
            .as_ref()
            .map(|block| block.activity.as_str())
            .unwrap_or(NOTHING_SCHEDULED)
    }

    pub fn status_of(&self, block_id: &str) -> Option<BlockStatus> {
        self.statuses
            .iter()
            .find(|entry| entry.block_id == block_id)
            .map(|entry| entry.status)
    }
}

/// Resolves a full day view at `now`. Blocks for other days are ignored.
pub fn snapshot(blocks: &[ScheduleBlock], now: WallClock) -> ScheduleSnapshot {
    let mut today = blocks
        .iter()
        .filter(|block| block.day_of_week == now.day)
        .collect::<Vec<_>>();
    today.sort_by_key(|block| block.start_time);

    let mut progress = DayProgress::default();
    let statuses = today
        .iter()
        .map(|block| {
            let status = block_status(block, now);
            progress.total += 1;
            match status {
                BlockStatus::Completed => progress.completed += 1,
                BlockStatus::Missed => progress.missed += 1,
                BlockStatus::Active => progress.active += 1,
                BlockStatus::Pending => progress.pending += 1,
            }
            BlockStatusEntry {
                block_id: block.id.clone(),
                activity: block.activity.clone(),
                start_time: block.start_time,
                end_time: block.end_time,
                status,
            }
        })
        .collect::<Vec<_>>();

    ScheduleSnapshot {
        now,
        active: resolve_active(blocks, now).cloned(),
        statuses,
        progress,
    }
}

pub fn describe_block(block: &ScheduleBlock) -> String {
    format!(
        "{} {}-{} ({})",
        block.activity,
        format_hhmm(block.start_time),
        format_hhmm(block.end_time),
        block.day_of_week
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BlockDraft;
    use chrono::Utc;
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn block(activity: &str, start: NaiveTime, end: NaiveTime) -> ScheduleBlock {
        BlockDraft {
            activity: activity.to_string(),
            category: "study".to_string(),
            start_time: start,
            end_time: end,
            reminder_enabled: false,
            color: None,
            details: None,
        }
        .into_block("user-1", DayOfWeek::MONDAY)
    }

    fn monday(hour: u32, minute: u32) -> WallClock {
        WallClock::new(DayOfWeek::MONDAY, hm(hour, minute))
    }

    #[test]
    fn statuses_follow_the_clock_through_two_adjacent_blocks() {
        let blocks = vec![
            block("First", hm(9, 0), hm(10, 0)),
            block("Second", hm(10, 0), hm(11, 0)),
        ];

        let at_0930 = snapshot(&blocks, monday(9, 30));
        assert_eq!(block_status(&blocks[0], monday(9, 30)), BlockStatus::Active);
        assert_eq!(block_status(&blocks[1], monday(9, 30)), BlockStatus::Pending);
        assert_eq!(at_0930.active_label(), "First");

        let at_1030 = snapshot(&blocks, monday(10, 30));
        assert_eq!(at_1030.status_of(&blocks[0].id), Some(BlockStatus::Missed));
        assert_eq!(at_1030.status_of(&blocks[1].id), Some(BlockStatus::Active));
        assert_eq!(at_1030.active_label(), "Second");

        let at_1130 = snapshot(&blocks, monday(11, 30));
        assert_eq!(at_1130.status_of(&blocks[0].id), Some(BlockStatus::Missed));
        assert_eq!(at_1130.status_of(&blocks[1].id), Some(BlockStatus::Missed));
        assert_eq!(at_1130.active_label(), NOTHING_SCHEDULED);
        assert_eq!(at_1130.progress.missed, 2);
    }

    #[test]
    fn completed_wins_over_time() {
        let mut done = block("Done", hm(9, 0), hm(10, 0));
        done.completed = true;
        assert_eq!(block_status(&done, monday(8, 0)), BlockStatus::Completed);
        assert_eq!(block_status(&done, monday(9, 30)), BlockStatus::Completed);
        assert_eq!(block_status(&done, monday(12, 0)), BlockStatus::Completed);
    }

    #[test]
    fn overlapping_blocks_resolve_to_earliest_start() {
        let blocks = vec![
            block("Late", hm(9, 30), hm(11, 0)),
            block("Early", hm(9, 0), hm(12, 0)),
        ];
        let active = resolve_active(&blocks, monday(10, 0)).expect("active block");
        assert_eq!(active.activity, "Early");
    }

    #[test]
    fn other_days_never_resolve_as_active() {
        let blocks = vec![block("Monday only", hm(9, 0), hm(10, 0))];
        let tuesday = WallClock::new(DayOfWeek::TUESDAY, hm(9, 30));
        assert!(resolve_active(&blocks, tuesday).is_none());
        assert_eq!(block_status(&blocks[0], tuesday), BlockStatus::Pending);
        assert!(snapshot(&blocks, tuesday).statuses.is_empty());
    }

    #[test]
    fn wall_clock_uses_local_timezone_and_truncates_seconds() {
        let tz: Tz = "Asia/Tokyo".parse().expect("valid timezone");
        let utc = chrono::DateTime::parse_from_rfc3339("2026-02-15T23:30:45Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let local = utc.with_timezone(&tz);
        let clock = WallClock::from_datetime(&local);
        assert_eq!(clock.day, DayOfWeek::MONDAY);
        assert_eq!(clock.time, hm(8, 30));
    }

    proptest! {
        #[test]
        fn at_most_one_status_is_active_for_disjoint_blocks(minute in 0u32..1440u32) {
            let blocks = vec![
                block("A", hm(6, 0), hm(8, 0)),
                block("B", hm(8, 0), hm(12, 30)),
                block("C", hm(13, 0), hm(18, 0)),
            ];
            let view = snapshot(&blocks, monday(minute / 60, minute % 60));
            prop_assert!(view.progress.active <= 1);
            prop_assert_eq!(view.progress.active == 1, view.active.is_some());
            prop_assert_eq!(view.progress.total, 3);
        }
    }
}
