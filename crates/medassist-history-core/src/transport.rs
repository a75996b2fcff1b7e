//! JSON import/export document: a top-level array of history entries.
//!
//! Exports never carry ids. Imports are validated as a whole: one bad element
//! rejects the document before anything reaches the store.

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    parse_iso_millis, truncate_summary, EntryStatus, HistoryEntry, HistoryError, ModuleKind,
    SUMMARY_MAX, UNKNOWN_ERROR,
};

pub const EXPORT_FILE_INFIX: &str = "historial";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImportMode {
    /// Clear the log, then insert the document.
    Replace,
    /// Append the document to the log without de-duplication.
    Add,
}

impl ImportMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Add => "add",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "replace" => Some(Self::Replace),
            "add" => Some(Self::Add),
            _ => None,
        }
    }
}

/// `<prefix>_historial_<yyyyMMdd_HHmmss>.json`, with `at` rendered in UTC.
///
/// # Errors
/// Returns [`HistoryError::Configuration`] if the stamp format is invalid and
/// [`HistoryError::Validation`] if the timestamp cannot be formatted.
pub fn export_file_name(prefix: &str, at: OffsetDateTime) -> Result<String, HistoryError> {
    let format = time::format_description::parse("[year][month][day]_[hour][minute][second]")
        .map_err(|err| HistoryError::Configuration(format!("invalid file name format: {err}")))?;
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .map_err(|err| HistoryError::Validation(format!("failed to format export time: {err}")))?;
    Ok(format!("{prefix}_{EXPORT_FILE_INFIX}_{stamp}.json"))
}

/// Serializes `entries` (in the given order) as a pretty-printed array
/// without ids.
///
/// # Errors
/// Returns [`HistoryError::Format`] if serialization fails.
pub fn export_document(entries: &[HistoryEntry]) -> Result<String, HistoryError> {
    let stripped: Vec<HistoryEntry> = entries.iter().map(HistoryEntry::without_id).collect();
    serde_json::to_string_pretty(&stripped)
        .map_err(|err| HistoryError::Format(format!("failed to serialize export: {err}")))
}

/// Parses and normalizes an import document.
///
/// Returned entries have no id and keep their own timestamps.
///
/// # Errors
/// Returns [`HistoryError::Format`] when the text is not JSON, the top level is
/// not an array, or any element lacks a known `module`, a `timestamp` or a
/// known `status`.
pub fn parse_import_document(text: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
    let document: Value = serde_json::from_str(text)
        .map_err(|err| HistoryError::Format(format!("document is not valid JSON: {err}")))?;
    let Value::Array(items) = document else {
        return Err(HistoryError::Format(
            "document MUST be a JSON array of history entries".to_string(),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_element(index, item))
        .collect()
}

fn parse_element(index: usize, item: &Value) -> Result<HistoryEntry, HistoryError> {
    let Value::Object(object) = item else {
        return Err(element_error(index, "MUST be an object"));
    };

    let module_tag = required_text(index, object, "module")?;
    let module = ModuleKind::parse(module_tag)
        .ok_or_else(|| element_error(index, &format!("unknown module `{module_tag}`")))?;

    let status_tag = required_text(index, object, "status")?;
    let status = EntryStatus::parse(status_tag)
        .ok_or_else(|| element_error(index, &format!("unknown status `{status_tag}`")))?;

    let timestamp = parse_timestamp(index, object.get("timestamp"))?;

    let error_details = match status {
        EntryStatus::Error => Some(
            optional_text(object, "errorDetails")
                .filter(|details| !details.trim().is_empty())
                .unwrap_or(UNKNOWN_ERROR)
                .to_string(),
        ),
        EntryStatus::Completed | EntryStatus::Pending => None,
    };

    Ok(HistoryEntry {
        id: None,
        timestamp,
        module,
        input_type: optional_text(object, "inputType")
            .unwrap_or_default()
            .to_string(),
        input_summary: truncate_summary(
            optional_text(object, "inputSummary").unwrap_or_default(),
            SUMMARY_MAX,
        ),
        output_summary: truncate_summary(
            optional_text(object, "outputSummary").unwrap_or_default(),
            SUMMARY_MAX,
        ),
        full_input: object.get("fullInput").cloned().unwrap_or(Value::Null),
        full_output: object.get("fullOutput").cloned().unwrap_or(Value::Null),
        status,
        error_details,
    })
}

fn element_error(index: usize, message: &str) -> HistoryError {
    HistoryError::Format(format!("entry {index}: {message}"))
}

fn required_text<'a>(
    index: usize,
    object: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, HistoryError> {
    match object.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.as_str()),
        Some(Value::String(_) | Value::Null) | None => {
            Err(element_error(index, &format!("`{key}` is required")))
        }
        Some(_) => Err(element_error(index, &format!("`{key}` MUST be a string"))),
    }
}

fn optional_text<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// Epoch milliseconds, as a number, a numeric string or an ISO-8601 string.
/// Dates and datetimes without an offset are read as UTC.
fn parse_timestamp(index: usize, value: Option<&Value>) -> Result<i64, HistoryError> {
    match value {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(whole_millis))
            .ok_or_else(|| element_error(index, "`timestamp` is out of range")),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            let text = text.trim();
            if let Ok(millis) = text.parse::<i64>() {
                return Ok(millis);
            }
            parse_iso_millis(text).map_err(|err| element_error(index, &err.to_string()))
        }
        _ => Err(element_error(index, "`timestamp` is required")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn whole_millis(value: f64) -> Option<i64> {
    // i64::MAX is not representable as f64; stay strictly below 2^63.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (value.is_finite() && value.abs() < LIMIT).then(|| value.trunc() as i64)
}
