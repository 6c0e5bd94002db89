use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Day of the week, Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayOfWeek(u8);

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

impl DayOfWeek {
    pub const SUNDAY: Self = Self(0);
    pub const MONDAY: Self = Self(1);
    pub const TUESDAY: Self = Self(2);
    pub const WEDNESDAY: Self = Self(3);
    pub const THURSDAY: Self = Self(4);
    pub const FRIDAY: Self = Self(5);
    pub const SATURDAY: Self = Self(6);

    pub fn new(index: u8) -> Option<Self> {
        (index < 7).then_some(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        DAY_NAMES
            .get(usize::from(self.0))
            .copied()
            .unwrap_or("Sunday")
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        Self(weekday.num_days_from_sunday() as u8)
    }

    pub fn week() -> impl Iterator<Item = Self> {
        (0..7).map(Self)
    }
}

impl TryFrom<u8> for DayOfWeek {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("day_of_week must be 0-6, got {value}"))
    }
}

impl From<DayOfWeek> for u8 {
    fn from(value: DayOfWeek) -> Self {
        value.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serde adapter storing a `NaiveTime` as `HH:MM`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_hhmm(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw, "time").map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTask {
    pub id: String,
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleBlock {
    pub id: String,
    pub owner: String,
    pub day_of_week: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub activity: String,
    pub category: String,
    pub color: Option<String>,
    pub completed: bool,
    pub reminder_enabled: bool,
    pub details: Option<String>,
    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_non_empty(&self.owner, "block.owner")?;
        validate_non_empty(&self.activity, "block.activity")?;
        validate_non_empty(&self.category, "block.category")?;
        validate_time_range(self.start_time, self.end_time)?;
        for sub_task in &self.sub_tasks {
            validate_non_empty(&sub_task.id, "block.sub_tasks[].id")?;
            validate_non_empty(&sub_task.text, "block.sub_tasks[].text")?;
        }
        Ok(())
    }

    /// Half-open `[start_time, end_time)` containment.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time < self.end_time
    }

    pub fn display_color(&self) -> &str {
        self.color
            .as_deref()
            .filter(|color| !color.trim().is_empty())
            .unwrap_or_else(|| category_color(&self.category))
    }

    pub fn draft(&self) -> BlockDraft {
        BlockDraft {
            activity: self.activity.clone(),
            category: self.category.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            reminder_enabled: self.reminder_enabled,
            color: self.color.clone(),
            details: self.details.clone(),
        }
    }
}

/// Block content with no identity, owner, or day bound yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockDraft {
    pub activity: String,
    pub category: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub reminder_enabled: bool,
    pub color: Option<String>,
    pub details: Option<String>,
}

impl BlockDraft {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.activity, "activity")?;
        validate_non_empty(&self.category, "category")?;
        validate_time_range(self.start_time, self.end_time)
    }

    pub fn into_block(self, owner: &str, day_of_week: DayOfWeek) -> ScheduleBlock {
        ScheduleBlock {
            id: next_id("blk"),
            owner: owner.to_string(),
            day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            activity: self.activity.trim().to_string(),
            category: self.category.trim().to_string(),
            color: normalize_optional(self.color),
            completed: false,
            reminder_enabled: self.reminder_enabled,
            details: normalize_optional(self.details),
            sub_tasks: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockField {
    Completed(bool),
    ReminderEnabled(bool),
}

impl BlockField {
    pub fn column(self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::ReminderEnabled(_) => "reminder_enabled",
        }
    }

    pub fn value(self) -> bool {
        match self {
            Self::Completed(value) | Self::ReminderEnabled(value) => value,
        }
    }

    pub fn apply(self, block: &mut ScheduleBlock) {
        match self {
            Self::Completed(value) => block.completed = value,
            Self::ReminderEnabled(value) => block.reminder_enabled = value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Active,
    Completed,
    Missed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    FocusSession,
    MeditationSession,
    WaterIntake,
    Mood,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FocusSession => "focus_session",
            Self::MeditationSession => "meditation_session",
            Self::WaterIntake => "water_intake",
            Self::Mood => "mood",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "focus_session" => Some(Self::FocusSession),
            "meditation_session" => Some(Self::MeditationSession),
            "water_intake" => Some(Self::WaterIntake),
            "mood" => Some(Self::Mood),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Duration { seconds: u32 },
    Amount { milliliters: u32 },
    Rating { rating: u8 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricEvent {
    pub owner: String,
    pub metric_type: MetricType,
    pub value: MetricValue,
    pub created_at: DateTime<Utc>,
}

impl MetricEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.owner, "metric.owner")?;
        match (self.metric_type, self.value) {
            (MetricType::FocusSession | MetricType::MeditationSession, MetricValue::Duration { seconds }) => {
                if seconds == 0 {
                    return Err("metric.duration must be > 0".to_string());
                }
                Ok(())
            }
            (MetricType::WaterIntake, MetricValue::Amount { milliliters }) => {
                if milliliters == 0 {
                    return Err("metric.amount must be > 0".to_string());
                }
                Ok(())
            }
            (MetricType::Mood, MetricValue::Rating { rating }) => {
                if !(1..=5).contains(&rating) {
                    return Err("metric.rating must be within 1..=5".to_string());
                }
                Ok(())
            }
            (metric_type, _) => Err(format!(
                "metric value does not match metric type {}",
                metric_type.as_str()
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Focus,
    Meditation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Work,
    Break,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    pub focus_minutes: u32,
    pub break_minutes: u32,
    pub meditation_minutes: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            focus_minutes: 45,
            break_minutes: 5,
            meditation_minutes: 10,
        }
    }
}

impl SessionSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.focus_minutes == 0 {
            return Err("settings.focus_minutes must be > 0".to_string());
        }
        if self.break_minutes == 0 {
            return Err("settings.break_minutes must be > 0".to_string());
        }
        if self.meditation_minutes == 0 {
            return Err("settings.meditation_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

pub fn category_color(category: &str) -> &'static str {
    match category.trim() {
        "body-care" => "border-orange-500",
        "shop" => "border-blue-500",
        "break" => "border-green-500",
        "study" => "border-primary",
        "skill-dev" => "border-indigo-500",
        "content" => "border-pink-500",
        "personal" => "border-violet-500",
        _ => "border-gray-500",
    }
}

pub fn format_hhmm(value: NaiveTime) -> String {
    value.format("%H:%M").to_string()
}

/// Parses `HH:MM` (or `H:MM`); seconds are not accepted.
pub fn parse_hhmm(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    let mut split = value.trim().split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() || minute_str.len() != 2 {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u32>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u32>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("{field_name} must be HH:MM"))
}

pub fn truncate_to_minute(value: NaiveTime) -> NaiveTime {
    value
        .with_second(0)
        .and_then(|time| time.with_nanosecond(0))
        .unwrap_or(value)
}

fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<(), String> {
    if start >= end {
        return Err(format!(
            "start_time {} must be before end_time {}",
            format_hhmm(start),
            format_hhmm(end)
        ));
    }
    Ok(())
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn sample_block() -> ScheduleBlock {
        BlockDraft {
            activity: "Deep Work".to_string(),
            category: "study".to_string(),
            start_time: hm(9, 0),
            end_time: hm(10, 0),
            reminder_enabled: true,
            color: None,
            details: Some("  ".to_string()),
        }
        .into_block("user-1", DayOfWeek::MONDAY)
    }

    #[test]
    fn block_validate_accepts_valid_block() {
        let block = sample_block();
        assert!(block.validate().is_ok());
        assert_eq!(block.details, None);
        assert!(!block.completed);
    }

    #[test]
    fn block_validate_rejects_inverted_or_empty_range() {
        let mut block = sample_block();
        block.end_time = block.start_time;
        assert!(block.validate().is_err());
        block.end_time = hm(8, 0);
        assert!(block.validate().is_err());
    }

    #[test]
    fn into_block_trims_text_fields() {
        let block = BlockDraft {
            activity: " Deep Work ".to_string(),
            category: "study ".to_string(),
            start_time: hm(9, 0),
            end_time: hm(10, 0),
            reminder_enabled: false,
            color: Some(" border-l-rose-500 ".to_string()),
            details: None,
        }
        .into_block("user-1", DayOfWeek::MONDAY);
        assert_eq!(block.activity, "Deep Work");
        assert_eq!(block.category, "study");
        assert_eq!(block.color.as_deref(), Some("border-l-rose-500"));
    }

    #[test]
    fn block_contains_is_half_open() {
        let block = sample_block();
        assert!(block.contains(hm(9, 0)));
        assert!(block.contains(hm(9, 59)));
        assert!(!block.contains(hm(10, 0)));
        assert!(!block.contains(hm(8, 59)));
    }

    #[test]
    fn display_color_falls_back_to_category() {
        let mut block = sample_block();
        assert_eq!(block.display_color(), "border-primary");
        block.category = "gardening".to_string();
        assert_eq!(block.display_color(), "border-gray-500");
        block.color = Some("border-l-rose-500".to_string());
        assert_eq!(block.display_color(), "border-l-rose-500");
    }

    #[test]
    fn parse_hhmm_rejects_malformed_values() {
        assert_eq!(parse_hhmm("09:30", "t"), Ok(hm(9, 30)));
        assert_eq!(parse_hhmm("9:05", "t"), Ok(hm(9, 5)));
        assert!(parse_hhmm("24:00", "t").is_err());
        assert!(parse_hhmm("09:60", "t").is_err());
        assert!(parse_hhmm("09:30:00", "t").is_err());
        assert!(parse_hhmm("0930", "t").is_err());
        assert!(parse_hhmm("", "t").is_err());
    }

    #[test]
    fn day_of_week_rejects_out_of_range() {
        assert!(DayOfWeek::new(7).is_none());
        assert_eq!(DayOfWeek::from_weekday(Weekday::Sun), DayOfWeek::SUNDAY);
        assert_eq!(DayOfWeek::from_weekday(Weekday::Sat).index(), 6);
        assert_eq!(DayOfWeek::TUESDAY.name(), "Tuesday");
        assert!(serde_json::from_str::<DayOfWeek>("9").is_err());
    }

    #[test]
    fn metric_event_value_must_match_type() {
        let mut event = MetricEvent {
            owner: "user-1".to_string(),
            metric_type: MetricType::FocusSession,
            value: MetricValue::Duration { seconds: 2_700 },
            created_at: Utc::now(),
        };
        assert!(event.validate().is_ok());
        event.value = MetricValue::Rating { rating: 3 };
        assert!(event.validate().is_err());
        event.metric_type = MetricType::Mood;
        assert!(event.validate().is_ok());
        event.value = MetricValue::Rating { rating: 6 };
        assert!(event.validate().is_err());
    }

    #[test]
    fn session_settings_default_and_validation() {
        let settings = SessionSettings::default();
        assert_eq!(
            (settings.focus_minutes, settings.break_minutes, settings.meditation_minutes),
            (45, 5, 10)
        );
        assert!(settings.validate().is_ok());
        let invalid = SessionSettings {
            break_minutes: 0,
            ..settings
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn block_serializes_times_as_hhmm() {
        let block = sample_block();
        let json = serde_json::to_value(&block).expect("serialize block");
        assert_eq!(json["start_time"], "09:00");
        assert_eq!(json["day_of_week"], 1);
        let roundtrip: ScheduleBlock = serde_json::from_value(json).expect("deserialize block");
        assert_eq!(roundtrip, block);
    }

    proptest! {
        #[test]
        fn drafts_validate_only_when_start_precedes_end(
            start in 0u32..1440u32,
            end in 0u32..1440u32
        ) {
            let draft = BlockDraft {
                activity: "Block".to_string(),
                category: "study".to_string(),
                start_time: hm(start / 60, start % 60),
                end_time: hm(end / 60, end % 60),
                reminder_enabled: false,
                color: None,
                details: None,
            };
            prop_assert_eq!(draft.validate().is_ok(), start < end);
        }
    }
}
