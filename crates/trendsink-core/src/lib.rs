//! Core domain model for trendsink: trend records, normalized rows, run outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column order shared by the warehouse schema and the spreadsheet header row.
pub const SHEET_HEADER: [&str; 3] = ["trend_date", "keyword", "value"];

/// Search volume as reported by the trend source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrendVolume {
    Count(u64),
    Text(String),
}

impl From<u64> for TrendVolume {
    fn from(value: u64) -> Self {
        Self::Count(value)
    }
}

impl From<&str> for TrendVolume {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One trending search term for a locale, handed off by a trend source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub keyword: String,
    pub volume: TrendVolume,
}

impl TrendRecord {
    pub fn new(keyword: impl Into<String>, volume: impl Into<TrendVolume>) -> Self {
        Self {
            keyword: keyword.into(),
            volume: volume.into(),
        }
    }
}

/// Canonical row written to both the warehouse and the spreadsheet mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub trend_date: NaiveDate,
    pub keyword: String,
    pub value: u64,
}

/// Result of normalizing one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// The source returned nothing; not an error.
    Empty,
    Rows(Vec<NormalizedRow>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("volume {raw:?} for keyword {keyword:?} is not a non-negative integer")]
    InvalidVolume { keyword: String, raw: String },
}

/// Parse a textual volume such as `"12,345"` into its integer value.
pub fn parse_volume_text(raw: &str) -> Option<u64> {
    let digits = raw
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect::<String>();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Convert fetched records into rows stamped with `run_date`, preserving input order.
pub fn normalize(records: &[TrendRecord], run_date: NaiveDate) -> Result<Normalized, NormalizeError> {
    if records.is_empty() {
        return Ok(Normalized::Empty);
    }

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let value = match &record.volume {
            TrendVolume::Count(n) => *n,
            TrendVolume::Text(raw) => {
                parse_volume_text(raw).ok_or_else(|| NormalizeError::InvalidVolume {
                    keyword: record.keyword.clone(),
                    raw: raw.clone(),
                })?
            }
        };
        rows.push(NormalizedRow {
            trend_date: run_date,
            keyword: record.keyword.clone(),
            value,
        });
    }
    Ok(Normalized::Rows(rows))
}

/// Structured outcome of one pipeline run, serialized as the trigger response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Success { inserted_rows: usize },
    Warning { message: String },
    Error { message: String },
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Warning { .. } => "warning",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Warning { message } | Self::Error { message } => Some(message),
        }
    }
}
