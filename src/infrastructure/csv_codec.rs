use crate::domain::models::{BlockDraft, ScheduleBlock, format_hhmm, normalize_optional, parse_hhmm};
use crate::infrastructure::error::{InfraError, RowError};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

pub const CSV_COLUMNS: [&str; 7] = [
    "activity",
    "category",
    "start_time",
    "end_time",
    "reminder_enabled",
    "color",
    "details",
];

#[derive(Debug, Default)]
struct Columns {
    activity: Option<usize>,
    category: Option<usize>,
    start_time: Option<usize>,
    end_time: Option<usize>,
    reminder_enabled: Option<usize>,
    color: Option<usize>,
    details: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut columns = Self::default();
        for (index, header) in headers.iter().enumerate() {
            let name = header.trim_start_matches('\u{feff}').trim().to_ascii_lowercase();
            let slot = match name.as_str() {
                "activity" => &mut columns.activity,
                "category" => &mut columns.category,
                "start_time" => &mut columns.start_time,
                "end_time" => &mut columns.end_time,
                "reminder_enabled" => &mut columns.reminder_enabled,
                "color" => &mut columns.color,
                "details" => &mut columns.details,
                _ => continue,
            };
            slot.get_or_insert(index);
        }
        columns
    }
}

fn field<'r>(record: &'r StringRecord, column: Option<usize>) -> Option<&'r str> {
    column
        .and_then(|index| record.get(index))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_reminder(raw: Option<&str>) -> Result<bool, String> {
    match raw {
        None => Ok(false),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(format!("reminder_enabled must be true or false, got '{value}'")),
    }
}

fn parse_record(record: &StringRecord, columns: &Columns) -> Result<BlockDraft, String> {
    let mut problems = Vec::new();

    let activity = field(record, columns.activity);
    if activity.is_none() {
        problems.push("missing activity".to_string());
    }
    let category = field(record, columns.category);
    if category.is_none() {
        problems.push("missing category".to_string());
    }

    let mut read_time = |column: Option<usize>, name: &str| match field(record, column) {
        None => {
            problems.push(format!("missing {name}"));
            None
        }
        Some(raw) => parse_hhmm(raw, name)
            .map_err(|error| problems.push(format!("{error}, got '{raw}'")))
            .ok(),
    };
    let start_time = read_time(columns.start_time, "start_time");
    let end_time = read_time(columns.end_time, "end_time");

    let reminder_enabled = parse_reminder(field(record, columns.reminder_enabled))
        .map_err(|error| problems.push(error))
        .unwrap_or(false);

    let (Some(activity), Some(category), Some(start_time), Some(end_time)) =
        (activity, category, start_time, end_time)
    else {
        return Err(problems.join("; "));
    };
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }

    let draft = BlockDraft {
        activity: activity.to_string(),
        category: category.to_string(),
        start_time,
        end_time,
        reminder_enabled,
        color: normalize_optional(field(record, columns.color).map(ToOwned::to_owned)),
        details: normalize_optional(field(record, columns.details).map(ToOwned::to_owned)),
    };
    draft.validate()?;
    Ok(draft)
}

/// Parses header-addressed CSV text into drafts. Blank lines are skipped and
/// unknown columns ignored. Row indexes count data rows from 1.
pub fn parse(text: &str) -> (Vec<BlockDraft>, Vec<RowError>) {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let columns = match reader.headers() {
        Ok(headers) => Columns::from_headers(headers),
        Err(error) => {
            return (
                Vec::new(),
                vec![RowError {
                    row_index: 0,
                    reason: format!("unreadable header: {error}"),
                }],
            );
        }
    };

    let mut drafts = Vec::new();
    let mut errors = Vec::new();
    for (position, record) in reader.records().enumerate() {
        let row_index = position + 1;
        let parsed = record
            .map_err(|error| format!("malformed row: {error}"))
            .and_then(|record| parse_record(&record, &columns));
        match parsed {
            Ok(draft) => drafts.push(draft),
            Err(reason) => errors.push(RowError { row_index, reason }),
        }
    }
    (drafts, errors)
}

/// All-or-nothing variant of `parse`: any row error rejects the whole text.
pub fn parse_strict(text: &str) -> Result<Vec<BlockDraft>, InfraError> {
    let (drafts, errors) = parse(text);
    if !errors.is_empty() {
        return Err(InfraError::Validation(errors));
    }
    Ok(drafts)
}

/// Emits `CSV_COLUMNS` in order; ids, owner, completion and timestamps are dropped.
pub fn serialize(blocks: &[ScheduleBlock]) -> Result<String, InfraError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS)?;
    for block in blocks {
        let start_time = format_hhmm(block.start_time);
        let end_time = format_hhmm(block.end_time);
        writer.write_record([
            block.activity.as_str(),
            block.category.as_str(),
            start_time.as_str(),
            end_time.as_str(),
            if block.reminder_enabled { "true" } else { "false" },
            block.color.as_deref().unwrap_or(""),
            block.details.as_deref().unwrap_or(""),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| InfraError::Io(error.into_error()))?;
    String::from_utf8(bytes).map_err(|error| InfraError::store(format!("CSV output is not UTF-8: {error}")))
}
