//! Two-way mapping between a module's live session and the generic
//! [`HistoryEntry`] shape.
//!
//! Encoding goes through [`ModuleState::to_draft`]. Decoding
//! ([`ModuleState::rehydrate`]) never fails on payload shape: each field is
//! read through a [`FieldReader`], which substitutes the field's empty default
//! when it is missing or mistyped and records the field path so callers can
//! report a partial load.

use std::fmt::Debug;

use serde::Serialize;
use serde_json::Value;

use crate::modules::{
    ChatModule, ClinicalAnalysisModule, DiagnosisSupportModule, DischargeSummaryModule,
    DoseCalculatorModule, ImageAnalysisModule, InterrogationQuestionsModule,
    LabStandardizerModule, MedicalJustificationModule, MedicalOrdersModule,
    PatientAdviceModule, PdfExtractionModule, PhysicalExamModule, TextAnalysisModule,
    TreatmentPlanModule,
};
use crate::session::ModuleSession;
use crate::{
    truncate_summary, EntryDraft, EntryStatus, HistoryEntry, HistoryError, ModuleKind,
    SUMMARY_DEFAULT, UNKNOWN_ERROR,
};

/// Per-module payload contract.
pub trait ModuleCodec {
    const KIND: ModuleKind;
    type Input: Clone + Debug + Default + PartialEq + Serialize;
    type Output: Clone + Debug + PartialEq + Serialize;

    fn input_type(input: &Self::Input) -> String;
    fn input_summary(input: &Self::Input) -> String;
    fn output_summary(output: &Self::Output) -> String;

    fn encode_input(input: &Self::Input) -> Value {
        serde_json::to_value(input).unwrap_or(Value::Null)
    }

    fn encode_output(output: &Self::Output) -> Value {
        serde_json::to_value(output).unwrap_or(Value::Null)
    }

    /// `input_type` is the stored entry's `inputType`.
    fn decode_input(input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input;
    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output;

    /// Hook for modules that can rebuild a missing output from the input.
    fn restore_output(_input: &Self::Input, output: Option<Self::Output>) -> Option<Self::Output> {
        output
    }
}

/// Lenient reader over a stored JSON payload.
pub struct FieldReader<'a> {
    value: &'a Value,
    path: String,
    fallbacks: Vec<String>,
}

impl<'a> FieldReader<'a> {
    #[must_use]
    pub fn new(value: &'a Value, path: impl Into<String>) -> Self {
        Self {
            value,
            path: path.into(),
            fallbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn value(&self) -> &'a Value {
        self.value
    }

    /// The whole payload when it is a bare string.
    #[must_use]
    pub fn as_text(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    /// Records a fallback that is not tied to a single field.
    pub fn note(&mut self, what: &str) {
        self.fallbacks.push(format!("{}: {what}", self.path));
    }

    #[must_use]
    pub fn into_fallbacks(self) -> Vec<String> {
        self.fallbacks
    }

    fn record(&mut self, key: &str) {
        self.fallbacks.push(format!("{}.{key}", self.path));
    }

    fn field(&mut self, key: &str) -> Option<&'a Value> {
        let value = self.value;
        match value.get(key) {
            Some(Value::Null) | None => {
                self.record(key);
                None
            }
            Some(value) => Some(value),
        }
    }

    fn optional_field(&self, key: &str) -> Option<&'a Value> {
        match self.value.get(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// A text payload stored either bare or under `key`.
    pub fn text_or_field(&mut self, key: &str) -> String {
        match self.as_text() {
            Some(text) => text.to_string(),
            None => self.string(key),
        }
    }

    pub fn string(&mut self, key: &str) -> String {
        match self.field(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            Some(_) => {
                self.record(key);
                String::new()
            }
            None => String::new(),
        }
    }

    pub fn opt_string(&mut self, key: &str) -> Option<String> {
        match self.optional_field(key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(_) => {
                self.record(key);
                None
            }
            None => None,
        }
    }

    pub fn boolean(&mut self, key: &str) -> bool {
        match self.field(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) if text == "true" => true,
            Some(Value::String(text)) if text == "false" => false,
            Some(_) => {
                self.record(key);
                false
            }
            None => false,
        }
    }

    /// Flag that older payloads may omit; absence is not a fallback.
    pub fn flag(&mut self, key: &str) -> bool {
        if self.optional_field(key).is_none() {
            return false;
        }
        self.boolean(key)
    }

    pub fn number(&mut self, key: &str) -> f64 {
        self.opt_number_inner(key, true).unwrap_or(0.0)
    }

    pub fn opt_number(&mut self, key: &str) -> Option<f64> {
        self.opt_number_inner(key, false)
    }

    fn opt_number_inner(&mut self, key: &str, required: bool) -> Option<f64> {
        let raw = if required {
            self.field(key)
        } else {
            self.optional_field(key)
        };

        match raw {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => match text.trim().replace(',', ".").parse::<f64>() {
                Ok(parsed) if parsed.is_finite() => Some(parsed),
                _ => {
                    self.record(key);
                    None
                }
            },
            Some(_) => {
                self.record(key);
                None
            }
            None => None,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn count(&mut self, key: &str) -> u32 {
        let value = self.number(key);
        if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) {
            value.round() as u32
        } else {
            self.record(key);
            0
        }
    }

    pub fn strings(&mut self, key: &str) -> Vec<String> {
        match self.field(key) {
            Some(Value::Array(items)) => {
                let mut values = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match item {
                        Value::String(text) => values.push(text.clone()),
                        Value::Number(number) => values.push(number.to_string()),
                        _ => self.record(&format!("{key}[{index}]")),
                    }
                }
                values
            }
            // Legacy single-string lists.
            Some(Value::String(text)) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Some(_) => {
                self.record(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Decodes an array of objects stored under `key`.
    pub fn records<T, F>(&mut self, key: &str, decode: F) -> Vec<T>
    where
        F: Fn(&mut FieldReader<'a>) -> T,
    {
        match self.field(key) {
            Some(Value::Array(items)) => {
                let base = format!("{}.{key}", self.path);
                self.decode_items(&base, items, decode)
            }
            Some(_) => {
                self.record(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Decodes the payload itself as an array of objects.
    pub fn elements<T, F>(&mut self, decode: F) -> Vec<T>
    where
        F: Fn(&mut FieldReader<'a>) -> T,
    {
        if let Value::Array(items) = self.value {
            let base = self.path.clone();
            self.decode_items(&base, items, decode)
        } else {
            self.note("expected a list");
            Vec::new()
        }
    }

    fn decode_items<T, F>(&mut self, base: &str, items: &'a [Value], decode: F) -> Vec<T>
    where
        F: Fn(&mut FieldReader<'a>) -> T,
    {
        let mut values = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut child = FieldReader::new(item, format!("{base}[{index}]"));
            if !item.is_object() {
                child.note("expected an object");
                self.fallbacks.extend(child.into_fallbacks());
                continue;
            }
            values.push(decode(&mut child));
            self.fallbacks.extend(child.into_fallbacks());
        }
        values
    }
}

/// Result of "load to module": the rebuilt state plus every field path that
/// fell back to its default.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rehydrated {
    pub state: ModuleState,
    pub fallbacks: Vec<String>,
}

impl Rehydrated {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// Builds the entry draft for a session's current state.
#[must_use]
pub fn draft_from_session<C: ModuleCodec>(
    session: &ModuleSession<C::Input, C::Output>,
) -> EntryDraft {
    let full_input = C::encode_input(&session.input);
    let input_summary = C::input_summary(&session.input);
    let input_type = C::input_type(&session.input);
    let full_output = session
        .result
        .as_ref()
        .map_or(Value::Null, |output| C::encode_output(output));

    if let Some(message) = &session.error {
        let details = if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message.clone()
        };
        return EntryDraft {
            module: C::KIND,
            input_type,
            input_summary,
            output_summary: truncate_summary(&details, SUMMARY_DEFAULT),
            full_input,
            full_output,
            status: EntryStatus::Error,
            error_details: Some(details),
        };
    }

    let (status, output_summary) = match &session.result {
        Some(output) => (EntryStatus::Completed, C::output_summary(output)),
        None => (EntryStatus::Pending, truncate_summary("", SUMMARY_DEFAULT)),
    };

    EntryDraft {
        module: C::KIND,
        input_type,
        input_summary,
        output_summary,
        full_input,
        full_output,
        status,
        error_details: None,
    }
}

/// Rebuilds a session from a stored entry, collecting fallback field paths.
#[must_use]
pub fn session_from_entry<C: ModuleCodec>(
    entry: &HistoryEntry,
) -> (ModuleSession<C::Input, C::Output>, Vec<String>) {
    let mut input_reader = FieldReader::new(&entry.full_input, "fullInput");
    let input = C::decode_input(&entry.input_type, &mut input_reader);
    let mut fallbacks = input_reader.into_fallbacks();

    let decoded = if entry.full_output.is_null() {
        None
    } else {
        let mut output_reader = FieldReader::new(&entry.full_output, "fullOutput");
        let output = C::decode_output(&mut output_reader);
        fallbacks.extend(output_reader.into_fallbacks());
        Some(output)
    };
    let output = C::restore_output(&input, decoded);

    let mut session = ModuleSession::new(input);
    match entry.status {
        EntryStatus::Completed => {
            if output.is_none() {
                fallbacks.push("fullOutput".to_string());
            }
            session.result = output;
        }
        EntryStatus::Error => {
            let details = entry
                .error_details
                .as_deref()
                .filter(|details| !details.trim().is_empty());
            if details.is_none() {
                fallbacks.push("errorDetails".to_string());
            }
            session.error = Some(details.unwrap_or(UNKNOWN_ERROR).to_string());
            session.result = output;
        }
        EntryStatus::Pending => {}
    }

    (session, fallbacks)
}

/// Builds a session from raw JSON payloads (as produced by the AI flow
/// boundary) through the module's decoder.
#[must_use]
pub fn session_from_payloads<C: ModuleCodec>(
    input_type: &str,
    input: &Value,
    outcome: Result<&Value, &str>,
) -> (ModuleSession<C::Input, C::Output>, Vec<String>) {
    let mut input_reader = FieldReader::new(input, "input");
    let decoded_input = C::decode_input(input_type, &mut input_reader);
    let mut fallbacks = input_reader.into_fallbacks();

    let session = match outcome {
        Ok(output) => {
            let mut output_reader = FieldReader::new(output, "output");
            let decoded_output = C::decode_output(&mut output_reader);
            fallbacks.extend(output_reader.into_fallbacks());
            ModuleSession::with_result(decoded_input, decoded_output)
        }
        Err(message) => ModuleSession::with_error(decoded_input, message),
    };

    (session, fallbacks)
}

macro_rules! module_states {
    ($($variant:ident => $codec:ty),+ $(,)?) => {
        /// Live state of one module, one variant per [`ModuleKind`].
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(tag = "module", content = "session")]
        pub enum ModuleState {
            $($variant(ModuleSession<<$codec as ModuleCodec>::Input, <$codec as ModuleCodec>::Output>),)+
        }

        impl ModuleState {
            #[must_use]
            pub fn kind(&self) -> ModuleKind {
                match self {
                    $(Self::$variant(_) => <$codec as ModuleCodec>::KIND,)+
                }
            }

            /// Fresh, empty state for `kind`.
            #[must_use]
            pub fn empty(kind: ModuleKind) -> Self {
                match kind {
                    $(ModuleKind::$variant => Self::$variant(ModuleSession::default()),)+
                }
            }

            #[must_use]
            pub fn to_draft(&self) -> EntryDraft {
                match self {
                    $(Self::$variant(session) => draft_from_session::<$codec>(session),)+
                }
            }

            #[must_use]
            pub fn is_concluded(&self) -> bool {
                match self {
                    $(Self::$variant(session) => session.is_concluded(),)+
                }
            }

            /// Rebuilds the originating module's state from a stored entry.
            #[must_use]
            pub fn rehydrate(entry: &HistoryEntry) -> Rehydrated {
                match entry.module {
                    $(ModuleKind::$variant => {
                        let (session, fallbacks) = session_from_entry::<$codec>(entry);
                        Rehydrated { state: Self::$variant(session), fallbacks }
                    })+
                }
            }

            /// Concluded state for `kind` built from raw JSON payloads.
            #[must_use]
            pub fn from_payloads(
                kind: ModuleKind,
                input_type: &str,
                input: &Value,
                outcome: Result<&Value, &str>,
            ) -> Rehydrated {
                match kind {
                    $(ModuleKind::$variant => {
                        let (session, fallbacks) =
                            session_from_payloads::<$codec>(input_type, input, outcome);
                        Rehydrated { state: Self::$variant(session), fallbacks }
                    })+
                }
            }
        }
    };
}

module_states! {
    ImageAnalysis => ImageAnalysisModule,
    PdfExtraction => PdfExtractionModule,
    TextAnalysis => TextAnalysisModule,
    ClinicalAnalysis => ClinicalAnalysisModule,
    DiagnosisSupport => DiagnosisSupportModule,
    MedicalOrders => MedicalOrdersModule,
    TreatmentPlan => TreatmentPlanModule,
    PatientAdvice => PatientAdviceModule,
    MedicalJustification => MedicalJustificationModule,
    MedicalAssistantChat => ChatModule,
    DoseCalculator => DoseCalculatorModule,
    DischargeSummary => DischargeSummaryModule,
    LabStandardizer => LabStandardizerModule,
    InterrogationQuestions => InterrogationQuestionsModule,
    PhysicalExam => PhysicalExamModule,
}

impl ModuleState {
    /// Like [`ModuleState::rehydrate`], for a caller that targets one module.
    ///
    /// # Errors
    /// Returns [`HistoryError::Codec`] when the entry was produced by a
    /// different module.
    pub fn rehydrate_as(target: ModuleKind, entry: &HistoryEntry) -> Result<Rehydrated, HistoryError> {
        if entry.module != target {
            return Err(HistoryError::Codec(format!(
                "entry belongs to {} and cannot be loaded into {target}",
                entry.module
            )));
        }
        Ok(Self::rehydrate(entry))
    }
}
