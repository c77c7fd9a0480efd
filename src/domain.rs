use std::fmt;
use std::str::FromStr;

use chrono::{Month, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

/// One element of the upstream JSON array, as loosely typed as it arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "memberStateName", default)]
    pub member_state_name: Option<Value>,
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default)]
    pub month: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub tonnes: Option<Value>,
}

/// Canonical row persisted to the destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub country: String,
    /// Always the first day of the reporting month.
    pub year_month: NaiveDate,
    pub tonnes: f64,
    pub category: String,
}

impl NormalizedRow {
    pub fn year_month_iso(&self) -> String {
        self.year_month.format("%Y-%m-%d").to_string()
    }
}

/// Resolves a full English month name, ignoring case and surrounding whitespace.
pub fn parse_month_name(value: &str) -> Option<Month> {
    let trimmed = value.trim();
    (1u8..=12)
        .filter_map(|n| Month::try_from(n).ok())
        .find(|month| month.name().eq_ignore_ascii_case(trimmed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum KeyColumn {
    Country,
    YearMonth,
    Category,
}

impl KeyColumn {
    pub fn column_name(self) -> &'static str {
        match self {
            KeyColumn::Country => "country",
            KeyColumn::YearMonth => "year_month",
            KeyColumn::Category => "category",
        }
    }

    fn value_of(self, row: &NormalizedRow) -> String {
        match self {
            KeyColumn::Country => row.country.clone(),
            KeyColumn::YearMonth => row.year_month_iso(),
            KeyColumn::Category => row.category.clone(),
        }
    }
}

impl fmt::Display for KeyColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for KeyColumn {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "country" => Ok(KeyColumn::Country),
            "year_month" => Ok(KeyColumn::YearMonth),
            "category" => Ok(KeyColumn::Category),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown natural key column: {other}"
            ))),
        }
    }
}

/// The set of columns that identifies a logical row for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    columns: Vec<KeyColumn>,
}

impl NaturalKey {
    pub fn new(columns: Vec<KeyColumn>) -> Result<Self, PipelineError> {
        if columns.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "natural key must name at least one column".to_string(),
            ));
        }
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].contains(column) {
                return Err(PipelineError::InvalidConfig(format!(
                    "natural key lists `{column}` twice"
                )));
            }
        }
        for required in [KeyColumn::Country, KeyColumn::YearMonth] {
            if !columns.contains(&required) {
                return Err(PipelineError::InvalidConfig(format!(
                    "natural key must include `{required}`"
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    pub fn key_of(&self, row: &NormalizedRow) -> KeyValue {
        KeyValue(
            self.columns
                .iter()
                .map(|column| (*column, column.value_of(row)))
                .collect(),
        )
    }
}

impl Default for NaturalKey {
    fn default() -> Self {
        Self {
            columns: vec![KeyColumn::Country, KeyColumn::YearMonth],
        }
    }
}

/// Concrete key values of one row, in natural key column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue(Vec<(KeyColumn, String)>);

impl KeyValue {
    pub fn parts(&self) -> &[(KeyColumn, String)] {
        &self.0
    }

    pub fn get(&self, column: KeyColumn) -> Option<&str> {
        self.0
            .iter()
            .find(|(col, _)| *col == column)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (column, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

impl Serialize for KeyValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column.column_name(), value)?;
        }
        map.end()
    }
}
