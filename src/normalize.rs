//! Raw payload decoding and record normalization.
//!
//! Normalization is pure: it turns one loosely typed upstream record into a
//! [`NormalizedRow`] or explains why it cannot.

use chrono::NaiveDate;
use serde_json::Value;

use crate::domain::{NormalizedRow, RawRecord, parse_month_name};
use crate::error::{PipelineError, RejectionReason};

/// Decodes an object body into its top-level records.
///
/// Anything other than a JSON array is a payload-level failure.
pub fn decode_payload(bytes: &[u8]) -> Result<Vec<Value>, PipelineError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| PipelineError::MalformedPayload(err.to_string()))?;
    match value {
        Value::Array(records) => Ok(records),
        other => Err(PipelineError::MalformedPayload(format!(
            "expected a JSON array, found {}",
            json_kind(&other)
        ))),
    }
}

/// Normalizes one element of a decoded payload.
pub fn normalize_value(value: &Value) -> Result<NormalizedRow, RejectionReason> {
    if !value.is_object() {
        return Err(RejectionReason::NotAnObject);
    }
    let raw: RawRecord =
        serde_json::from_value(value.clone()).map_err(|_| RejectionReason::NotAnObject)?;
    normalize(&raw)
}

pub fn normalize(raw: &RawRecord) -> Result<NormalizedRow, RejectionReason> {
    let country = required_string(raw.member_state_name.as_ref(), "memberStateName")?;
    let year = parse_year(raw.year.as_ref())?;
    let month_name = required_string(raw.month.as_ref(), "month")?;
    let month = parse_month_name(&month_name).ok_or(RejectionReason::UnknownMonth(month_name))?;
    let category = required_string(raw.category.as_ref(), "category")?;
    let tonnes = parse_tonnes(raw.tonnes.as_ref())?;

    let year_month = NaiveDate::from_ymd_opt(year, month.number_from_month(), 1)
        .ok_or_else(|| RejectionReason::InvalidYear(year.to_string()))?;

    Ok(NormalizedRow {
        country,
        year_month,
        tonnes,
        category,
    })
}

fn required_string(value: Option<&Value>, field: &str) -> Result<String, RejectionReason> {
    match value {
        None => Err(RejectionReason::MissingField(field.to_string())),
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Some(other) => Err(RejectionReason::InvalidField {
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_year(value: Option<&Value>) -> Result<i32, RejectionReason> {
    let year = match value {
        None => return Err(RejectionReason::MissingField("year".to_string())),
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    let Some(year) = year else {
        return Err(RejectionReason::InvalidField {
            field: "year".to_string(),
            value: value.map(Value::to_string).unwrap_or_default(),
        });
    };
    if year <= 0 {
        return Err(RejectionReason::InvalidYear(year.to_string()));
    }
    i32::try_from(year).map_err(|_| RejectionReason::InvalidYear(year.to_string()))
}

fn parse_tonnes(value: Option<&Value>) -> Result<f64, RejectionReason> {
    let tonnes = match value {
        None => return Err(RejectionReason::MissingField("tonnes".to_string())),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(other) => {
            return Err(RejectionReason::InvalidField {
                field: "tonnes".to_string(),
                value: other.to_string(),
            });
        }
    };
    match tonnes {
        Some(tonnes) if tonnes.is_finite() && tonnes >= 0.0 => Ok(tonnes),
        _ => Err(RejectionReason::InvalidTonnes(
            value.map(Value::to_string).unwrap_or_default(),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
