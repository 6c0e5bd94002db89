use crate::domain::models::{ScheduleBlock, format_hhmm};
use crate::domain::schedule::WallClock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderNotification {
    pub block_id: String,
    pub activity: String,
    /// `HH:MM`
    pub start_time: String,
}

impl ReminderNotification {
    pub fn body(&self) -> String {
        format!("It's time for: {}", self.activity)
    }
}

/// Fires once per block for the exact minute its start time matches the clock.
#[derive(Debug, Default)]
pub struct ReminderScanner {
    minute: Option<WallClock>,
    notified: HashSet<String>,
}

impl ReminderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, blocks: &[ScheduleBlock], now: WallClock) -> Vec<ReminderNotification> {
        if self.minute != Some(now) {
            self.minute = Some(now);
            self.notified.clear();
        }

        let mut due = Vec::new();
        for block in blocks {
            if !block.reminder_enabled
                || block.day_of_week != now.day
                || block.start_time != now.time
            {
                continue;
            }
            if !self.notified.insert(block.id.clone()) {
                continue;
            }
            due.push(ReminderNotification {
                block_id: block.id.clone(),
                activity: block.activity.clone(),
                start_time: format_hhmm(block.start_time),
            });
        }
        due
    }
}
