//! Work history model for the MedAssist clinical documentation assistant.
//!
//! Every feature module (diagnosis support, discharge summary, chat, ...)
//! records the operations it completes as a [`HistoryEntry`]. This crate holds
//! the I/O-free part of that history:
//! - the entry model and its invariants ([`EntryDraft::validate`]),
//! - the shared summary truncation rule ([`truncate_summary`]),
//! - the module dispatch table ([`dispatch`]),
//! - the per-module entry codec and "load to module" rehydration ([`codec`]),
//! - module sessions with request gating ([`session`]),
//! - the import/export document format ([`transport`]).

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub mod codec;
pub mod diagnosis;
pub mod dispatch;
pub mod modules;
pub mod session;
pub mod transport;

pub use codec::{FieldReader, ModuleCodec, ModuleState, Rehydrated};
pub use diagnosis::{DiagnosisList, DiagnosisRecord};
pub use dispatch::ModuleDescriptor;
pub use session::{ModuleSession, RequestGate, RequestTicket};
pub use transport::{export_document, export_file_name, parse_import_document, ImportMode};

/// Returned by [`truncate_summary`] for empty text.
pub const EMPTY_SUMMARY: &str = "N/A";
pub const ELLIPSIS: &str = "...";
/// Stored as `errorDetails` when an error entry arrives without a message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

pub const SUMMARY_SHORT: usize = 20;
pub const SUMMARY_DEFAULT: usize = 50;
pub const SUMMARY_WIDE: usize = 70;
pub const SUMMARY_MAX: usize = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HistoryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid format: {0}")]
    Format(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ModuleKind {
    ImageAnalysis,
    PdfExtraction,
    TextAnalysis,
    ClinicalAnalysis,
    DiagnosisSupport,
    MedicalOrders,
    TreatmentPlan,
    PatientAdvice,
    MedicalJustification,
    MedicalAssistantChat,
    DoseCalculator,
    DischargeSummary,
    LabStandardizer,
    InterrogationQuestions,
    PhysicalExam,
}

impl ModuleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageAnalysis => "ImageAnalysis",
            Self::PdfExtraction => "PdfExtraction",
            Self::TextAnalysis => "TextAnalysis",
            Self::ClinicalAnalysis => "ClinicalAnalysis",
            Self::DiagnosisSupport => "DiagnosisSupport",
            Self::MedicalOrders => "MedicalOrders",
            Self::TreatmentPlan => "TreatmentPlan",
            Self::PatientAdvice => "PatientAdvice",
            Self::MedicalJustification => "MedicalJustification",
            Self::MedicalAssistantChat => "MedicalAssistantChat",
            Self::DoseCalculator => "DoseCalculator",
            Self::DischargeSummary => "DischargeSummary",
            Self::LabStandardizer => "LabStandardizer",
            Self::InterrogationQuestions => "InterrogationQuestions",
            Self::PhysicalExam => "PhysicalExam",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl Display for ModuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Reserved; no current flow persists an unfinished operation.
    Pending,
    Completed,
    Error,
}

impl EntryStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Caller-side shape of an entry: everything except the store-assigned
/// `id` and `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryDraft {
    pub module: ModuleKind,
    pub input_type: String,
    pub input_summary: String,
    pub output_summary: String,
    pub full_input: Value,
    pub full_output: Value,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl EntryDraft {
    /// Validates the status/error pairing and summary bounds before append.
    ///
    /// # Errors
    /// Returns [`HistoryError::Validation`] when an error entry has no
    /// details, a non-error entry carries details, or a summary is blank or
    /// exceeds [`SUMMARY_MAX`] characters.
    pub fn validate(&self) -> Result<(), HistoryError> {
        match self.status {
            EntryStatus::Error => {
                let has_details = self
                    .error_details
                    .as_deref()
                    .is_some_and(|details| !details.trim().is_empty());
                if !has_details {
                    return Err(HistoryError::Validation(
                        "errorDetails MUST be non-empty when status=error".to_string(),
                    ));
                }
            }
            EntryStatus::Completed | EntryStatus::Pending => {
                if self.error_details.is_some() {
                    return Err(HistoryError::Validation(format!(
                        "errorDetails MUST be absent when status={}",
                        self.status.as_str()
                    )));
                }
            }
        }

        for (name, value) in [
            ("inputSummary", &self.input_summary),
            ("outputSummary", &self.output_summary),
        ] {
            if value.trim().is_empty() {
                return Err(HistoryError::Validation(format!(
                    "{name} MUST not be blank; use {EMPTY_SUMMARY} when there is nothing to show"
                )));
            }
            if value.chars().count() > SUMMARY_MAX {
                return Err(HistoryError::Validation(format!(
                    "{name} MUST be at most {SUMMARY_MAX} characters"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: i64,
    pub module: ModuleKind,
    pub input_type: String,
    pub input_summary: String,
    pub output_summary: String,
    pub full_input: Value,
    pub full_output: Value,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl HistoryEntry {
    /// Builds an unpersisted entry (`id = None`) stamped at `timestamp`.
    #[must_use]
    pub fn from_draft(draft: EntryDraft, timestamp: i64) -> Self {
        Self {
            id: None,
            timestamp,
            module: draft.module,
            input_type: draft.input_type,
            input_summary: draft.input_summary,
            output_summary: draft.output_summary,
            full_input: draft.full_input,
            full_output: draft.full_output,
            status: draft.status,
            error_details: draft.error_details,
        }
    }

    #[must_use]
    pub fn to_draft(&self) -> EntryDraft {
        EntryDraft {
            module: self.module,
            input_type: self.input_type.clone(),
            input_summary: self.input_summary.clone(),
            output_summary: self.output_summary.clone(),
            full_input: self.full_input.clone(),
            full_output: self.full_output.clone(),
            status: self.status,
            error_details: self.error_details.clone(),
        }
    }

    #[must_use]
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }
}

/// Shared summary rule: sentinel for empty text, unchanged within `limit`,
/// otherwise the first `limit - 3` characters plus [`ELLIPSIS`].
///
/// `limit` counts characters and is clamped to `3..=`[`SUMMARY_MAX`]. Applying
/// the rule to its own output returns that output unchanged.
#[must_use]
pub fn truncate_summary(text: &str, limit: usize) -> String {
    if text.trim().is_empty() {
        return EMPTY_SUMMARY.to_string();
    }

    let limit = limit.clamp(ELLIPSIS.len(), SUMMARY_MAX);
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let mut truncated: String = text
        .chars()
        .take(limit.saturating_sub(ELLIPSIS.len()))
        .collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn now_millis() -> i64 {
    millis_from_datetime(now_utc())
}

#[must_use]
pub fn millis_from_datetime(value: OffsetDateTime) -> i64 {
    let millis = value.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(if millis < 0 { i64::MIN } else { i64::MAX })
}

/// Converts epoch milliseconds to a UTC datetime.
///
/// # Errors
/// Returns [`HistoryError::Validation`] when the instant is out of range.
pub fn datetime_from_millis(millis: i64) -> Result<OffsetDateTime, HistoryError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| HistoryError::Validation(format!("timestamp out of range: {err}")))
}

/// Offsetless layouts accepted on import, read as UTC.
const LOCAL_DATETIME_FORMATS: [&str; 4] = [
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
    "[year]-[month]-[day]T[hour]:[minute]",
    "[year]-[month]-[day] [hour]:[minute]:[second]",
];

/// Parses an ISO-8601 timestamp into epoch milliseconds.
///
/// RFC3339 text keeps its offset. A datetime without an offset and a bare
/// `YYYY-MM-DD` date are taken as UTC, the latter at midnight.
///
/// # Errors
/// Returns [`HistoryError::Format`] when no accepted layout matches.
pub fn parse_iso_millis(value: &str) -> Result<i64, HistoryError> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
    {
        return Ok(millis_from_datetime(parsed));
    }

    for layout in LOCAL_DATETIME_FORMATS {
        let format = time::format_description::parse(layout)
            .map_err(|err| HistoryError::Configuration(format!("invalid timestamp layout: {err}")))?;
        if let Ok(parsed) = PrimitiveDateTime::parse(value, &format) {
            return Ok(millis_from_datetime(parsed.assume_utc()));
        }
    }

    let format = time::format_description::parse("[year]-[month]-[day]")
        .map_err(|err| HistoryError::Configuration(format!("invalid timestamp layout: {err}")))?;
    let date = Date::parse(value, &format)
        .map_err(|err| HistoryError::Format(format!("invalid ISO timestamp `{value}`: {err}")))?;
    Ok(millis_from_datetime(date.midnight().assume_utc()))
}

/// Formats epoch milliseconds as RFC3339 in UTC.
///
/// # Errors
/// Returns [`HistoryError::Validation`] when the instant is out of range or
/// formatting fails.
pub fn format_rfc3339_millis(millis: i64) -> Result<String, HistoryError> {
    datetime_from_millis(millis)?
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            HistoryError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn fixture_draft(status: EntryStatus, error_details: Option<&str>) -> EntryDraft {
        EntryDraft {
            module: ModuleKind::TextAnalysis,
            input_type: "text/plain".to_string(),
            input_summary: "hola".to_string(),
            output_summary: "N/A".to_string(),
            full_input: json!("hola"),
            full_output: Value::Null,
            status,
            error_details: error_details.map(str::to_string),
        }
    }

    #[test]
    fn empty_text_yields_sentinel() {
        assert_eq!(truncate_summary("", 50), EMPTY_SUMMARY);
        assert_eq!(truncate_summary("   \n", 50), EMPTY_SUMMARY);
    }

    #[test]
    fn text_within_limit_is_unchanged() {
        assert_eq!(truncate_summary("dolor torácico", 20), "dolor torácico");
        let exact = "a".repeat(50);
        assert_eq!(truncate_summary(&exact, 50), exact);
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let summary = truncate_summary(&"x".repeat(60), 20);
        assert_eq!(summary.chars().count(), 20);
        assert!(summary.ends_with(ELLIPSIS));
        assert_eq!(&summary[..17], "x".repeat(17));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let summary = truncate_summary(&"ñ".repeat(30), 20);
        assert_eq!(summary.chars().count(), 20);
        assert!(summary.starts_with("ñññ"));
    }

    #[test]
    fn limit_is_clamped_to_max() {
        let summary = truncate_summary(&"y".repeat(300), 500);
        assert_eq!(summary.chars().count(), SUMMARY_MAX);
    }

    proptest! {
        #[test]
        fn prop_truncation_is_idempotent(text in ".{0,160}", limit in 0usize..130) {
            let once = truncate_summary(&text, limit);
            let twice = truncate_summary(&once, limit);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_truncation_respects_limit(text in ".{1,160}", limit in 3usize..=100) {
            let summary = truncate_summary(&text, limit);
            prop_assert!(summary.chars().count() <= limit.max(EMPTY_SUMMARY.len()));
        }
    }

    #[test]
    fn error_entries_require_details() {
        assert!(fixture_draft(EntryStatus::Error, None).validate().is_err());
        assert!(fixture_draft(EntryStatus::Error, Some("  ")).validate().is_err());
        assert!(fixture_draft(EntryStatus::Error, Some("timeout"))
            .validate()
            .is_ok());
    }

    #[test]
    fn completed_entries_reject_details() {
        assert!(fixture_draft(EntryStatus::Completed, Some("boom"))
            .validate()
            .is_err());
        assert!(fixture_draft(EntryStatus::Completed, None).validate().is_ok());
        assert!(fixture_draft(EntryStatus::Pending, None).validate().is_ok());
    }

    #[test]
    fn oversized_summary_is_rejected() {
        let mut draft = fixture_draft(EntryStatus::Completed, None);
        draft.output_summary = "z".repeat(SUMMARY_MAX + 1);
        assert!(draft.validate().is_err());
    }

    #[test]
    fn blank_summaries_are_rejected() {
        for blank in ["", "  ", "\n\t"] {
            let mut draft = fixture_draft(EntryStatus::Completed, None);
            draft.input_summary = blank.to_string();
            assert!(draft.validate().is_err(), "input summary {blank:?}");

            let mut draft = fixture_draft(EntryStatus::Completed, None);
            draft.output_summary = blank.to_string();
            assert!(draft.validate().is_err(), "output summary {blank:?}");
        }
        assert!(fixture_draft(EntryStatus::Completed, None).validate().is_ok());
    }

    #[test]
    fn module_tags_round_trip_through_parse() {
        for kind in ModuleKind::ALL {
            assert_eq!(ModuleKind::parse(kind.as_str()), Some(kind));
            let serialized = must_ok(serde_json::to_value(kind));
            assert_eq!(serialized, json!(kind.as_str()));
        }
        assert_eq!(ModuleKind::parse("Unknown"), None);
    }

    #[test]
    fn entry_json_uses_camel_case_and_omits_absent_id() {
        let entry = HistoryEntry::from_draft(fixture_draft(EntryStatus::Completed, None), 42);
        let value = must_ok(serde_json::to_value(&entry));
        assert_eq!(
            value,
            json!({
                "timestamp": 42,
                "module": "TextAnalysis",
                "inputType": "text/plain",
                "inputSummary": "hola",
                "outputSummary": "N/A",
                "fullInput": "hola",
                "fullOutput": null,
                "status": "completed"
            })
        );
    }

    #[test]
    fn rfc3339_parse_yields_epoch_millis() {
        let millis = must_ok(parse_iso_millis("2024-01-01T00:00:00.000Z"));
        assert_eq!(millis, 1_704_067_200_000);
        assert_eq!(
            must_ok(format_rfc3339_millis(millis)),
            "2024-01-01T00:00:00Z"
        );
        assert_eq!(
            must_ok(parse_iso_millis("2024-01-01T02:00:00+02:00")),
            1_704_067_200_000
        );
    }

    #[test]
    fn offsetless_and_date_only_timestamps_read_as_utc() {
        for text in [
            "2024-01-01",
            "2024-01-01T00:00",
            "2024-01-01T00:00:00",
            "2024-01-01T00:00:00.000",
            "2024-01-01 00:00:00",
        ] {
            assert_eq!(must_ok(parse_iso_millis(text)), 1_704_067_200_000, "{text}");
        }
        assert_eq!(
            must_ok(parse_iso_millis("2024-01-01T12:30:00.250")),
            1_704_067_200_000 + 45_000_250
        );
    }

    #[test]
    fn non_iso_timestamps_are_rejected() {
        for text in ["yesterday", "01/02/2024", "2024-13-01", "2024-01-01T25:00:00"] {
            assert!(
                matches!(parse_iso_millis(text), Err(HistoryError::Format(_))),
                "{text}"
            );
        }
    }
}
