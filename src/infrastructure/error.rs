use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One rejected CSV row. `row_index` is 1-based and counts data rows only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row_index: usize,
    pub reason: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Import rejected: {}", describe_rows(.0))]
    Validation(Vec<RowError>),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Partial write during {operation}: {detail}")]
    PartialWrite {
        operation: &'static str,
        detail: String,
    },
}

impl InfraError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Sqlite(_) | Self::Io(_))
    }
}

fn describe_rows(rows: &[RowError]) -> String {
    let mut message = format!("{} invalid row(s)", rows.len());
    for row in rows {
        message.push_str("; ");
        message.push_str(&row.to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_row() {
        let error = InfraError::Validation(vec![
            RowError {
                row_index: 2,
                reason: "missing activity".to_string(),
            },
            RowError {
                row_index: 5,
                reason: "start_time must be before end_time".to_string(),
            },
        ]);
        let message = error.to_string();
        assert!(message.contains("2 invalid row(s)"));
        assert!(message.contains("row 2: missing activity"));
        assert!(message.contains("row 5: start_time must be before end_time"));
    }

    #[test]
    fn partial_write_names_operation() {
        let error = InfraError::PartialWrite {
            operation: "duplicate_day",
            detail: "target day Tuesday left empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Partial write during duplicate_day: target day Tuesday left empty"
        );
    }
}
