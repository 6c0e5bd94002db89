use crate::domain::models::{BlockDraft, DayOfWeek, ScheduleBlock};
use chrono::NaiveTime;
use serde::Serialize;

pub const TEMPLATE_CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct BlockTemplate {
    pub activity: &'static str,
    pub category: &'static str,
    pub start: (u32, u32),
    pub end: (u32, u32),
    pub reminder_enabled: bool,
    pub color: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub blocks: &'static [BlockTemplate],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSummary {
    pub key: String,
    pub name: String,
    pub block_count: usize,
}

const fn entry(
    activity: &'static str,
    category: &'static str,
    start: (u32, u32),
    end: (u32, u32),
    reminder_enabled: bool,
    color: &'static str,
) -> BlockTemplate {
    BlockTemplate {
        activity,
        category,
        start,
        end,
        reminder_enabled,
        color,
    }
}

const STUDY_FOCUS: &[BlockTemplate] = &[
    entry("Deep Work Session 1", "study", (9, 0), (11, 0), true, "border-l-indigo-500"),
    entry("Break & Snack", "break", (11, 0), (11, 30), false, "border-l-green-500"),
    entry("Review & Notes", "study", (11, 30), (12, 30), false, "border-l-blue-500"),
    entry("Lunch", "personal", (12, 30), (13, 30), false, "border-l-sky-500"),
    entry("Skill Development", "skill-dev", (13, 30), (15, 0), true, "border-l-violet-500"),
];

const BALANCED_DAY: &[BlockTemplate] = &[
    entry("Morning Exercise", "body-care", (8, 0), (9, 0), false, "border-l-orange-500"),
    entry("Work Block 1", "study", (9, 30), (12, 0), true, "border-l-indigo-500"),
    entry("Lunch & Walk", "personal", (12, 0), (13, 0), false, "border-l-lime-500"),
    entry("Work Block 2", "study", (13, 0), (15, 30), true, "border-l-indigo-500"),
    entry("Personal Project", "skill-dev", (16, 0), (17, 0), false, "border-l-violet-500"),
    entry("Dinner", "personal", (18, 0), (19, 0), false, "border-l-sky-500"),
    entry("Relax & Unwind", "break", (20, 0), (22, 0), false, "border-l-green-500"),
];

const CONTENT_CREATOR: &[BlockTemplate] = &[
    entry("Brainstorm Ideas", "content", (10, 0), (11, 0), false, "border-l-yellow-500"),
    entry("Scripting / Writing", "content", (11, 0), (13, 0), true, "border-l-pink-500"),
    entry("Lunch", "personal", (13, 0), (14, 0), false, "border-l-sky-500"),
    entry("Recording / Filming", "content", (14, 0), (16, 0), true, "border-l-red-500"),
    entry("Editing Session", "content", (16, 0), (18, 0), false, "border-l-purple-500"),
    entry("Engage with Community", "personal", (18, 0), (18, 30), false, "border-l-rose-500"),
];

const FITNESS_FOUNDATION: &[BlockTemplate] = &[
    entry("Morning Cardio", "body-care", (7, 0), (7, 45), false, "border-l-orange-500"),
    entry("Healthy Breakfast", "personal", (8, 0), (8, 30), false, "border-l-lime-500"),
    entry("Meal Prep", "shop", (11, 0), (12, 0), false, "border-l-blue-500"),
    entry("Lunch", "personal", (12, 30), (13, 15), false, "border-l-lime-500"),
    entry("Afternoon Walk", "break", (15, 0), (15, 30), false, "border-l-green-500"),
    entry("Strength Training", "body-care", (17, 30), (18, 45), true, "border-l-red-500"),
    entry("Stretching & Foam Roll", "body-care", (18, 45), (19, 15), false, "border-l-teal-500"),
];

pub const TEMPLATES: &[ScheduleTemplate] = &[
    ScheduleTemplate {
        key: "study-focus",
        name: "Study Focus",
        blocks: STUDY_FOCUS,
    },
    ScheduleTemplate {
        key: "balanced-day",
        name: "Balanced Day",
        blocks: BALANCED_DAY,
    },
    ScheduleTemplate {
        key: "content-creator",
        name: "Content Creator",
        blocks: CONTENT_CREATOR,
    },
    ScheduleTemplate {
        key: "fitness-foundation",
        name: "Fitness Foundation",
        blocks: FITNESS_FOUNDATION,
    },
];

pub fn find_template(key: &str) -> Option<&'static ScheduleTemplate> {
    let key = key.trim();
    TEMPLATES.iter().find(|template| template.key == key)
}

pub fn list_templates() -> Vec<TemplateSummary> {
    TEMPLATES
        .iter()
        .map(|template| TemplateSummary {
            key: template.key.to_string(),
            name: template.name.to_string(),
            block_count: template.blocks.len(),
        })
        .collect()
}

impl BlockTemplate {
    pub fn draft(&self) -> Option<BlockDraft> {
        let start_time = NaiveTime::from_hms_opt(self.start.0, self.start.1, 0)?;
        let end_time = NaiveTime::from_hms_opt(self.end.0, self.end.1, 0)?;
        Some(BlockDraft {
            activity: self.activity.to_string(),
            category: self.category.to_string(),
            start_time,
            end_time,
            reminder_enabled: self.reminder_enabled,
            color: Some(self.color.to_string()),
            details: None,
        })
    }
}

impl ScheduleTemplate {
    /// Stamps owner and day onto every template block, in catalog order.
    pub fn instantiate(&self, owner: &str, day: DayOfWeek) -> Vec<ScheduleBlock> {
        self.blocks
            .iter()
            .filter_map(BlockTemplate::draft)
            .map(|draft| draft.into_block(owner, day))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_block_is_valid() {
        for template in TEMPLATES {
            assert!(!template.blocks.is_empty(), "{} is empty", template.key);
            for block in template.blocks {
                let draft = block.draft().expect("template times are valid");
                assert!(draft.validate().is_ok(), "{} / {}", template.key, block.activity);
            }
        }
    }

    #[test]
    fn instantiate_stamps_owner_and_day() {
        let template = find_template("study-focus").expect("known template");
        let blocks = template.instantiate("user-7", DayOfWeek::FRIDAY);
        assert_eq!(blocks.len(), 5);
        assert!(blocks.iter().all(|block| block.owner == "user-7"));
        assert!(blocks.iter().all(|block| block.day_of_week == DayOfWeek::FRIDAY));
        assert!(blocks.iter().all(|block| !block.completed));
        assert_eq!(blocks[0].activity, "Deep Work Session 1");
        assert!(blocks[0].reminder_enabled);
    }

    #[test]
    fn unknown_keys_are_not_found() {
        assert!(find_template("night-owl").is_none());
        assert!(find_template(" balanced-day ").is_some());
        assert_eq!(list_templates().len(), 4);
    }
}
