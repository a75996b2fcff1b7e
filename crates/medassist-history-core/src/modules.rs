//! Input/output payloads of every feature module and their [`ModuleCodec`]
//! implementations.

use serde::Serialize;
use serde_json::Value;

use crate::codec::{FieldReader, ModuleCodec};
use crate::diagnosis::{DiagnosisList, DiagnosisRecord};
use crate::session::{ModuleSession, RequestTicket};
use crate::{truncate_summary, ModuleKind, SUMMARY_DEFAULT, SUMMARY_MAX, SUMMARY_WIDE};

const TEXT_PLAIN: &str = "text/plain";
const APPLICATION_JSON: &str = "application/json";
const APPLICATION_PDF: &str = "application/pdf";
const IMAGE_ANY: &str = "image/*";
const CHAT: &str = "chat";

/// File modules persist this placeholder instead of the file content.
const FILE_PLACEHOLDER_PREFIX: &str = "Data URI for ";

fn file_placeholder(file_name: &str) -> Value {
    Value::String(format!("{FILE_PLACEHOLDER_PREFIX}{file_name}"))
}

fn file_name_from(reader: &mut FieldReader<'_>) -> String {
    if let Some(text) = reader.as_text() {
        if let Some(name) = text.strip_prefix(FILE_PLACEHOLDER_PREFIX) {
            return name.to_string();
        }
        reader.note("unrecognized file placeholder");
        return String::new();
    }
    reader.string("fileName")
}

/// Older entries stored object-shaped inputs as a bare string.
fn legacy_text(reader: &mut FieldReader<'_>) -> Option<String> {
    let text = reader.as_text()?;
    reader.note("legacy text input");
    Some(text.to_string())
}

fn text_input(text: &str) -> Value {
    Value::String(text.to_string())
}

// Image analysis

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysisInput {
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysisOutput {
    pub summary: String,
    pub findings: Vec<String>,
}

pub struct ImageAnalysisModule;

impl ModuleCodec for ImageAnalysisModule {
    const KIND: ModuleKind = ModuleKind::ImageAnalysis;
    type Input = ImageAnalysisInput;
    type Output = ImageAnalysisOutput;

    fn input_type(input: &Self::Input) -> String {
        if input.mime_type.trim().is_empty() {
            IMAGE_ANY.to_string()
        } else {
            input.mime_type.clone()
        }
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.file_name, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.summary, SUMMARY_DEFAULT)
    }

    fn encode_input(input: &Self::Input) -> Value {
        file_placeholder(&input.file_name)
    }

    fn decode_input(input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        let mime_type = if input_type == IMAGE_ANY {
            String::new()
        } else {
            input_type.to_string()
        };
        ImageAnalysisInput {
            file_name: file_name_from(reader),
            mime_type,
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        ImageAnalysisOutput {
            summary: reader.string("summary"),
            findings: reader.strings("findings"),
        }
    }
}

// PDF extraction

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PdfExtractionInput {
    pub file_name: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExtractedField {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PdfExtractionOutput {
    pub clinical_notes: String,
    pub structured_data: Vec<ExtractedField>,
}

pub struct PdfExtractionModule;

impl ModuleCodec for PdfExtractionModule {
    const KIND: ModuleKind = ModuleKind::PdfExtraction;
    type Input = PdfExtractionInput;
    type Output = PdfExtractionOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_PDF.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.file_name, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.clinical_notes, SUMMARY_DEFAULT)
    }

    fn encode_input(input: &Self::Input) -> Value {
        file_placeholder(&input.file_name)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        PdfExtractionInput {
            file_name: file_name_from(reader),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        PdfExtractionOutput {
            clinical_notes: reader.string("clinicalNotes"),
            structured_data: reader.records("structuredData", |row| ExtractedField {
                label: row.string("label"),
                value: row.string("value"),
            }),
        }
    }
}

// Text improvement

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TextAnalysisInput {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TextAnalysisOutput {
    pub improved_text: String,
    pub suggestions: Vec<String>,
}

pub struct TextAnalysisModule;

impl ModuleCodec for TextAnalysisModule {
    const KIND: ModuleKind = ModuleKind::TextAnalysis;
    type Input = TextAnalysisInput;
    type Output = TextAnalysisOutput;

    fn input_type(_input: &Self::Input) -> String {
        TEXT_PLAIN.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.text, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.improved_text, SUMMARY_DEFAULT)
    }

    fn encode_input(input: &Self::Input) -> Value {
        text_input(&input.text)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        TextAnalysisInput {
            text: reader.text_or_field("text"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        TextAnalysisOutput {
            improved_text: reader.string("improvedText"),
            suggestions: reader.strings("suggestions"),
        }
    }
}

// Clinical analysis

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalAnalysisInput {
    pub clinical_text: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalAnalysisOutput {
    pub summary: String,
    pub key_findings: Vec<String>,
    pub red_flags: Vec<String>,
}

pub struct ClinicalAnalysisModule;

impl ModuleCodec for ClinicalAnalysisModule {
    const KIND: ModuleKind = ModuleKind::ClinicalAnalysis;
    type Input = ClinicalAnalysisInput;
    type Output = ClinicalAnalysisOutput;

    fn input_type(_input: &Self::Input) -> String {
        TEXT_PLAIN.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.clinical_text, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.summary, SUMMARY_DEFAULT)
    }

    fn encode_input(input: &Self::Input) -> Value {
        text_input(&input.clinical_text)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        ClinicalAnalysisInput {
            clinical_text: reader.text_or_field("clinicalText"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        ClinicalAnalysisOutput {
            summary: reader.string("summary"),
            key_findings: reader.strings("keyFindings"),
            red_flags: reader.strings("redFlags"),
        }
    }
}

// Diagnosis support

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisSupportInput {
    pub clinical_info: String,
}

pub struct DiagnosisSupportModule;

fn decode_diagnosis(row: &mut FieldReader<'_>) -> DiagnosisRecord {
    DiagnosisRecord {
        code: row.string("code"),
        description: row.string("description"),
        confidence: row.opt_number("confidence"),
        is_validated: row.flag("isValidated"),
        is_principal: row.flag("isPrincipal"),
    }
}

impl ModuleCodec for DiagnosisSupportModule {
    const KIND: ModuleKind = ModuleKind::DiagnosisSupport;
    type Input = DiagnosisSupportInput;
    type Output = DiagnosisList;

    fn input_type(_input: &Self::Input) -> String {
        TEXT_PLAIN.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.clinical_info, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        let codes: Vec<&str> = output
            .records()
            .iter()
            .map(|record| record.code.as_str())
            .filter(|code| !code.trim().is_empty())
            .collect();
        truncate_summary(&codes.join(", "), SUMMARY_MAX)
    }

    fn encode_input(input: &Self::Input) -> Value {
        text_input(&input.clinical_info)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        DiagnosisSupportInput {
            clinical_info: reader.text_or_field("clinicalInfo"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        let records = if reader.value().is_array() {
            reader.elements(decode_diagnosis)
        } else {
            reader.records("diagnoses", decode_diagnosis)
        };

        let list = DiagnosisList::new(records.clone());
        if list.records() != records.as_slice() {
            reader.note("several principal diagnoses, kept the first");
        }
        list
    }
}

// Medical orders

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalOrdersInput {
    pub clinical_summary: String,
    pub diagnoses: String,
    pub allergies: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    pub care_setting: String,
    pub include_laboratory: bool,
    pub include_imaging: bool,
    pub include_medications: bool,
    pub include_nursing_care: bool,
    pub include_diet: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalOrdersOutput {
    pub orders_text: String,
}

pub struct MedicalOrdersModule;

impl ModuleCodec for MedicalOrdersModule {
    const KIND: ModuleKind = ModuleKind::MedicalOrders;
    type Input = MedicalOrdersInput;
    type Output = MedicalOrdersOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.clinical_summary, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.orders_text, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return MedicalOrdersInput {
                clinical_summary: text,
                ..MedicalOrdersInput::default()
            };
        }

        MedicalOrdersInput {
            clinical_summary: reader.string("clinicalSummary"),
            diagnoses: reader.string("diagnoses"),
            allergies: reader.string("allergies"),
            weight_kg: reader.opt_number("weightKg"),
            care_setting: reader.string("careSetting"),
            include_laboratory: reader.boolean("includeLaboratory"),
            include_imaging: reader.boolean("includeImaging"),
            include_medications: reader.boolean("includeMedications"),
            include_nursing_care: reader.boolean("includeNursingCare"),
            include_diet: reader.boolean("includeDiet"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        MedicalOrdersOutput {
            orders_text: reader.text_or_field("ordersText"),
        }
    }
}

// Treatment plan

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentPlanInput {
    pub clinical_summary: String,
    pub diagnoses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TreatmentPlanOutput {
    pub plan: String,
    pub monitoring: Vec<String>,
}

pub struct TreatmentPlanModule;

impl ModuleCodec for TreatmentPlanModule {
    const KIND: ModuleKind = ModuleKind::TreatmentPlan;
    type Input = TreatmentPlanInput;
    type Output = TreatmentPlanOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.clinical_summary, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.plan, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return TreatmentPlanInput {
                clinical_summary: text,
                ..TreatmentPlanInput::default()
            };
        }

        TreatmentPlanInput {
            clinical_summary: reader.string("clinicalSummary"),
            diagnoses: reader.strings("diagnoses"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        TreatmentPlanOutput {
            plan: reader.string("plan"),
            monitoring: reader.strings("monitoring"),
        }
    }
}

// Patient advice

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatientAdviceInput {
    pub diagnosis: String,
    pub patient_context: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatientAdviceOutput {
    pub advice: String,
    pub warning_signs: Vec<String>,
}

pub struct PatientAdviceModule;

impl ModuleCodec for PatientAdviceModule {
    const KIND: ModuleKind = ModuleKind::PatientAdvice;
    type Input = PatientAdviceInput;
    type Output = PatientAdviceOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.diagnosis, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.advice, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return PatientAdviceInput {
                diagnosis: text,
                ..PatientAdviceInput::default()
            };
        }

        PatientAdviceInput {
            diagnosis: reader.string("diagnosis"),
            patient_context: reader.string("patientContext"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        PatientAdviceOutput {
            advice: reader.string("advice"),
            warning_signs: reader.strings("warningSigns"),
        }
    }
}

// Medical justification

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalJustificationInput {
    pub procedure: String,
    pub clinical_context: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MedicalJustificationOutput {
    pub justification: String,
}

pub struct MedicalJustificationModule;

impl ModuleCodec for MedicalJustificationModule {
    const KIND: ModuleKind = ModuleKind::MedicalJustification;
    type Input = MedicalJustificationInput;
    type Output = MedicalJustificationOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.procedure, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.justification, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return MedicalJustificationInput {
                procedure: text,
                ..MedicalJustificationInput::default()
            };
        }

        MedicalJustificationInput {
            procedure: reader.string("procedure"),
            clinical_context: reader.string("clinicalContext"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        MedicalJustificationOutput {
            justification: reader.text_or_field("justification"),
        }
    }
}

// Medical assistant chat

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    #[default]
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender: ChatSender,
    pub text: String,
    pub is_error: bool,
}

impl ChatMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::User,
            text: text.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::Assistant,
            text: text.into(),
            is_error: false,
        }
    }
}

/// Conversation before the latest user message, plus that message.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChatInput {
    pub history: Vec<ChatMessage>,
    pub message: String,
}

/// The visible transcript.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChatOutput {
    pub messages: Vec<ChatMessage>,
}

pub type ChatSession = ModuleSession<ChatInput, ChatOutput>;

impl ModuleSession<ChatInput, ChatOutput> {
    /// Appends a user message to the transcript and opens a request for the
    /// reply. Blank messages and busy sessions yield `None`.
    pub fn submit_message(&mut self, text: impl Into<String>) -> Option<RequestTicket> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        let ticket = self.gate.begin()?;

        let mut transcript = self
            .result
            .take()
            .map(|output| output.messages)
            .unwrap_or_default();
        self.input = ChatInput {
            history: transcript.clone(),
            message: text.clone(),
        };
        transcript.push(ChatMessage::user(text));
        self.result = Some(ChatOutput {
            messages: transcript,
        });
        self.error = None;
        Some(ticket)
    }

    /// Applies the assistant reply for `ticket`. A failed reply is shown in
    /// the transcript as an error message and marks the session failed.
    pub fn receive_reply(&mut self, ticket: &RequestTicket, reply: Result<String, String>) -> bool {
        if !self.gate.finish(ticket) {
            return false;
        }

        let transcript = &mut self.result.get_or_insert_with(ChatOutput::default).messages;
        match reply {
            Ok(text) => transcript.push(ChatMessage::assistant(text)),
            Err(message) => {
                transcript.push(ChatMessage {
                    sender: ChatSender::Assistant,
                    text: message.clone(),
                    is_error: true,
                });
                self.error = Some(message);
            }
        }
        true
    }
}

fn decode_chat_message(row: &mut FieldReader<'_>) -> ChatMessage {
    let sender = match row.string("sender").as_str() {
        "user" => ChatSender::User,
        "assistant" => ChatSender::Assistant,
        _ => {
            row.note("unknown sender");
            ChatSender::Assistant
        }
    };
    ChatMessage {
        sender,
        text: row.string("text"),
        is_error: row.flag("isError"),
    }
}

pub struct ChatModule;

impl ModuleCodec for ChatModule {
    const KIND: ModuleKind = ModuleKind::MedicalAssistantChat;
    type Input = ChatInput;
    type Output = ChatOutput;

    fn input_type(_input: &Self::Input) -> String {
        CHAT.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.message, SUMMARY_WIDE)
    }

    fn output_summary(output: &Self::Output) -> String {
        let reply = output
            .messages
            .iter()
            .rev()
            .find(|message| message.sender == ChatSender::Assistant)
            .map_or("", |message| message.text.as_str());
        truncate_summary(reply, SUMMARY_WIDE)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return ChatInput {
                history: Vec::new(),
                message: text,
            };
        }

        ChatInput {
            history: reader.records("history", decode_chat_message),
            message: reader.string("message"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        ChatOutput {
            messages: reader.records("messages", decode_chat_message),
        }
    }

    fn restore_output(input: &Self::Input, output: Option<Self::Output>) -> Option<Self::Output> {
        if output.is_some() || (input.history.is_empty() && input.message.trim().is_empty()) {
            return output;
        }

        let mut messages = input.history.clone();
        if !input.message.trim().is_empty() {
            messages.push(ChatMessage::user(input.message.clone()));
        }
        Some(ChatOutput { messages })
    }
}

// Dose calculator

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseCalculatorInput {
    pub drug_name: String,
    pub weight_kg: f64,
    pub dose_mg_per_kg: f64,
    pub doses_per_day: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentration_mg_per_ml: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseCalculatorOutput {
    pub dose_per_administration_mg: f64,
    pub daily_dose_mg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<f64>,
}

pub struct DoseCalculatorModule;

impl ModuleCodec for DoseCalculatorModule {
    const KIND: ModuleKind = ModuleKind::DoseCalculator;
    type Input = DoseCalculatorInput;
    type Output = DoseCalculatorOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        if input.drug_name.trim().is_empty() {
            return truncate_summary("", SUMMARY_DEFAULT);
        }
        truncate_summary(
            &format!("{} ({} kg)", input.drug_name, input.weight_kg),
            SUMMARY_DEFAULT,
        )
    }

    fn output_summary(output: &Self::Output) -> String {
        let mut summary = format!(
            "{:.2} mg/dose, {:.2} mg/day",
            output.dose_per_administration_mg, output.daily_dose_mg
        );
        if let Some(volume) = output.volume_ml {
            summary.push_str(&format!(", {volume:.2} ml"));
        }
        truncate_summary(&summary, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return DoseCalculatorInput {
                drug_name: text,
                ..DoseCalculatorInput::default()
            };
        }

        DoseCalculatorInput {
            drug_name: reader.string("drugName"),
            weight_kg: reader.number("weightKg"),
            dose_mg_per_kg: reader.number("doseMgPerKg"),
            doses_per_day: reader.count("dosesPerDay"),
            concentration_mg_per_ml: reader.opt_number("concentrationMgPerMl"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        DoseCalculatorOutput {
            dose_per_administration_mg: reader.number("dosePerAdministrationMg"),
            daily_dose_mg: reader.number("dailyDoseMg"),
            volume_ml: reader.opt_number("volumeMl"),
        }
    }
}

// Discharge summary

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DischargeSummaryInput {
    pub admission_reason: String,
    pub hospital_course: String,
    pub discharge_condition: String,
    pub discharge_medications: String,
    pub follow_up_instructions: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DischargeSummaryOutput {
    pub summary: String,
}

pub struct DischargeSummaryModule;

impl ModuleCodec for DischargeSummaryModule {
    const KIND: ModuleKind = ModuleKind::DischargeSummary;
    type Input = DischargeSummaryInput;
    type Output = DischargeSummaryOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.admission_reason, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.summary, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return DischargeSummaryInput {
                admission_reason: text,
                ..DischargeSummaryInput::default()
            };
        }

        DischargeSummaryInput {
            admission_reason: reader.string("admissionReason"),
            hospital_course: reader.string("hospitalCourse"),
            discharge_condition: reader.string("dischargeCondition"),
            discharge_medications: reader.string("dischargeMedications"),
            follow_up_instructions: reader.string("followUpInstructions"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        DischargeSummaryOutput {
            summary: reader.text_or_field("summary"),
        }
    }
}

// Lab standardizer

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabStandardizerInput {
    pub raw_results: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub test_name: String,
    pub value: String,
    pub unit: String,
    pub reference_range: String,
    pub flag: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LabStandardizerOutput {
    pub results: Vec<LabResult>,
    pub notes: String,
}

pub struct LabStandardizerModule;

impl ModuleCodec for LabStandardizerModule {
    const KIND: ModuleKind = ModuleKind::LabStandardizer;
    type Input = LabStandardizerInput;
    type Output = LabStandardizerOutput;

    fn input_type(_input: &Self::Input) -> String {
        TEXT_PLAIN.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.raw_results, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        let names: Vec<&str> = output
            .results
            .iter()
            .map(|result| result.test_name.as_str())
            .collect();
        if names.is_empty() {
            return truncate_summary(&output.notes, SUMMARY_DEFAULT);
        }
        truncate_summary(&names.join(", "), SUMMARY_DEFAULT)
    }

    fn encode_input(input: &Self::Input) -> Value {
        text_input(&input.raw_results)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        LabStandardizerInput {
            raw_results: reader.text_or_field("rawResults"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        LabStandardizerOutput {
            results: reader.records("results", |row| LabResult {
                test_name: row.string("testName"),
                value: row.string("value"),
                unit: row.string("unit"),
                reference_range: row.string("referenceRange"),
                flag: row.string("flag"),
            }),
            notes: reader.string("notes"),
        }
    }
}

// Interrogation questions

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InterrogationQuestionsInput {
    pub chief_complaint: String,
    pub patient_context: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct InterrogationQuestionsOutput {
    pub questions: Vec<String>,
}

pub struct InterrogationQuestionsModule;

impl ModuleCodec for InterrogationQuestionsModule {
    const KIND: ModuleKind = ModuleKind::InterrogationQuestions;
    type Input = InterrogationQuestionsInput;
    type Output = InterrogationQuestionsOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        truncate_summary(&input.chief_complaint, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.questions.join(" "), SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return InterrogationQuestionsInput {
                chief_complaint: text,
                ..InterrogationQuestionsInput::default()
            };
        }

        InterrogationQuestionsInput {
            chief_complaint: reader.string("chiefComplaint"),
            patient_context: reader.string("patientContext"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        InterrogationQuestionsOutput {
            questions: reader.strings("questions"),
        }
    }
}

// Physical exam

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalExamInput {
    pub focus_system: String,
    pub findings: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalExamOutput {
    pub exam_text: String,
}

pub struct PhysicalExamModule;

impl ModuleCodec for PhysicalExamModule {
    const KIND: ModuleKind = ModuleKind::PhysicalExam;
    type Input = PhysicalExamInput;
    type Output = PhysicalExamOutput;

    fn input_type(_input: &Self::Input) -> String {
        APPLICATION_JSON.to_string()
    }

    fn input_summary(input: &Self::Input) -> String {
        let text = if input.focus_system.trim().is_empty() {
            &input.findings
        } else {
            &input.focus_system
        };
        truncate_summary(text, SUMMARY_DEFAULT)
    }

    fn output_summary(output: &Self::Output) -> String {
        truncate_summary(&output.exam_text, SUMMARY_DEFAULT)
    }

    fn decode_input(_input_type: &str, reader: &mut FieldReader<'_>) -> Self::Input {
        if let Some(text) = legacy_text(reader) {
            return PhysicalExamInput {
                findings: text,
                ..PhysicalExamInput::default()
            };
        }

        PhysicalExamInput {
            focus_system: reader.string("focusSystem"),
            findings: reader.string("findings"),
        }
    }

    fn decode_output(reader: &mut FieldReader<'_>) -> Self::Output {
        PhysicalExamOutput {
            exam_text: reader.text_or_field("examText"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::ModuleState;
    use crate::{EntryStatus, HistoryEntry, EMPTY_SUMMARY};

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    fn stored(state: &ModuleState) -> HistoryEntry {
        let mut entry = HistoryEntry::from_draft(state.to_draft(), 1_704_067_200_000);
        entry.id = Some(1);
        entry
    }

    fn legacy_entry(module: ModuleKind, full_input: Value, full_output: Value) -> HistoryEntry {
        HistoryEntry {
            id: Some(3),
            timestamp: 1,
            module,
            input_type: APPLICATION_JSON.to_string(),
            input_summary: EMPTY_SUMMARY.to_string(),
            output_summary: EMPTY_SUMMARY.to_string(),
            full_input,
            full_output,
            status: EntryStatus::Completed,
            error_details: None,
        }
    }

    fn assert_exact_round_trip(state: &ModuleState) {
        let entry = stored(state);
        assert!(entry.to_draft().validate().is_ok());
        let rehydrated = ModuleState::rehydrate(&entry);
        assert!(
            rehydrated.fallbacks.is_empty(),
            "unexpected fallbacks: {:?}",
            rehydrated.fallbacks
        );
        assert_eq!(&rehydrated.state, state);
    }

    #[test]
    fn text_analysis_scenario_stores_raw_text() {
        let state = ModuleState::TextAnalysis(ModuleSession::with_result(
            TextAnalysisInput {
                text: "hola".to_string(),
            },
            TextAnalysisOutput {
                improved_text: "Hola.".to_string(),
                suggestions: vec!["Usar mayúscula inicial".to_string()],
            },
        ));
        let draft = state.to_draft();
        assert_eq!(draft.input_type, "text/plain");
        assert_eq!(draft.input_summary, "hola");
        assert_eq!(draft.full_input, json!("hola"));
        assert_eq!(draft.status, EntryStatus::Completed);
        assert_exact_round_trip(&state);
    }

    #[test]
    fn structured_modules_round_trip_exactly() {
        let states = vec![
            ModuleState::ClinicalAnalysis(ModuleSession::with_result(
                ClinicalAnalysisInput {
                    clinical_text: "Paciente con fiebre".to_string(),
                },
                ClinicalAnalysisOutput {
                    summary: "Síndrome febril".to_string(),
                    key_findings: vec!["Fiebre 39 °C".to_string()],
                    red_flags: vec![],
                },
            )),
            ModuleState::MedicalOrders(ModuleSession::with_result(
                MedicalOrdersInput {
                    clinical_summary: "Neumonía adquirida en la comunidad".to_string(),
                    diagnoses: "J18.9".to_string(),
                    allergies: "Penicilina".to_string(),
                    weight_kg: Some(72.5),
                    care_setting: "hospitalization".to_string(),
                    include_laboratory: true,
                    include_imaging: true,
                    include_medications: true,
                    include_nursing_care: false,
                    include_diet: false,
                },
                MedicalOrdersOutput {
                    orders_text: "1. Hemograma".to_string(),
                },
            )),
            ModuleState::TreatmentPlan(ModuleSession::with_result(
                TreatmentPlanInput {
                    clinical_summary: "HTA no controlada".to_string(),
                    diagnoses: vec!["I10".to_string()],
                },
                TreatmentPlanOutput {
                    plan: "Iniciar IECA".to_string(),
                    monitoring: vec!["PA semanal".to_string()],
                },
            )),
            ModuleState::DoseCalculator(ModuleSession::with_result(
                DoseCalculatorInput {
                    drug_name: "Amoxicilina".to_string(),
                    weight_kg: 20.0,
                    dose_mg_per_kg: 50.0,
                    doses_per_day: 3,
                    concentration_mg_per_ml: Some(50.0),
                },
                DoseCalculatorOutput {
                    dose_per_administration_mg: 333.33,
                    daily_dose_mg: 1000.0,
                    volume_ml: Some(6.67),
                },
            )),
            ModuleState::LabStandardizer(ModuleSession::with_result(
                LabStandardizerInput {
                    raw_results: "Hb 10.2".to_string(),
                },
                LabStandardizerOutput {
                    results: vec![LabResult {
                        test_name: "Hemoglobina".to_string(),
                        value: "10.2".to_string(),
                        unit: "g/dL".to_string(),
                        reference_range: "12-16".to_string(),
                        flag: "low".to_string(),
                    }],
                    notes: String::new(),
                },
            )),
            ModuleState::PdfExtraction(ModuleSession::with_result(
                PdfExtractionInput {
                    file_name: "epicrisis.pdf".to_string(),
                },
                PdfExtractionOutput {
                    clinical_notes: "Ingreso por disnea".to_string(),
                    structured_data: vec![ExtractedField {
                        label: "Edad".to_string(),
                        value: "67".to_string(),
                    }],
                },
            )),
        ];

        for state in &states {
            assert_exact_round_trip(state);
        }
    }

    #[test]
    fn image_entry_keeps_file_name_and_mime_but_not_content() {
        let state = ModuleState::ImageAnalysis(ModuleSession::with_result(
            ImageAnalysisInput {
                file_name: "rx-torax.png".to_string(),
                mime_type: "image/png".to_string(),
            },
            ImageAnalysisOutput {
                summary: "Sin consolidaciones".to_string(),
                findings: vec![],
            },
        ));
        let draft = state.to_draft();
        assert_eq!(draft.input_type, "image/png");
        assert_eq!(draft.full_input, json!("Data URI for rx-torax.png"));
        assert_exact_round_trip(&state);
    }

    #[test]
    fn image_without_mime_uses_wildcard_type() {
        let state = ModuleState::ImageAnalysis(ModuleSession::new(ImageAnalysisInput {
            file_name: "foto.jpg".to_string(),
            mime_type: String::new(),
        }));
        assert_eq!(state.to_draft().input_type, IMAGE_ANY);
        assert_exact_round_trip(&state);
    }

    #[test]
    fn legacy_string_input_fills_main_text_field() {
        let entry = legacy_entry(
            ModuleKind::PatientAdvice,
            json!("Diabetes tipo 2"),
            json!({"advice": "Dieta", "warningSigns": []}),
        );
        let rehydrated = ModuleState::rehydrate(&entry);
        assert!(rehydrated.is_partial());
        match rehydrated.state {
            ModuleState::PatientAdvice(session) => {
                assert_eq!(session.input.diagnosis, "Diabetes tipo 2");
                assert_eq!(session.input.patient_context, "");
                assert_eq!(must_some(session.result).advice, "Dieta");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn missing_output_fields_fall_back_to_empty_defaults() {
        let entry = legacy_entry(
            ModuleKind::ClinicalAnalysis,
            json!("texto"),
            json!({"summary": "Resumen"}),
        );
        let rehydrated = ModuleState::rehydrate(&entry);
        assert_eq!(
            rehydrated.fallbacks,
            vec![
                "fullOutput.keyFindings".to_string(),
                "fullOutput.redFlags".to_string(),
            ]
        );
        match rehydrated.state {
            ModuleState::ClinicalAnalysis(session) => {
                let output = must_some(session.result);
                assert_eq!(output.summary, "Resumen");
                assert!(output.key_findings.is_empty());
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn diagnosis_list_round_trips_with_flags() {
        let mut list = DiagnosisList::new(vec![
            DiagnosisRecord {
                confidence: Some(0.82),
                ..DiagnosisRecord::new("J18.9", "Neumonía")
            },
            DiagnosisRecord::new("R50.9", "Fiebre"),
        ]);
        assert!(list.set_principal(0));
        assert!(list.toggle_validated(1));

        let state = ModuleState::DiagnosisSupport(ModuleSession::with_result(
            DiagnosisSupportInput {
                clinical_info: "Tos y fiebre".to_string(),
            },
            list,
        ));
        let draft = state.to_draft();
        assert_eq!(draft.output_summary, "J18.9, R50.9");
        assert!(draft.full_output.is_array());
        assert_exact_round_trip(&state);
    }

    #[test]
    fn legacy_diagnoses_object_keeps_first_principal() {
        let entry = legacy_entry(
            ModuleKind::DiagnosisSupport,
            json!("Dolor abdominal"),
            json!({"diagnoses": [
                {"code": "K35.8", "description": "Apendicitis", "isPrincipal": true},
                {"code": "N20.0", "description": "Litiasis renal", "isPrincipal": true},
                "junk"
            ]}),
        );
        let rehydrated = ModuleState::rehydrate(&entry);
        assert!(rehydrated.is_partial());
        match rehydrated.state {
            ModuleState::DiagnosisSupport(session) => {
                let list = must_some(session.result);
                assert_eq!(list.len(), 2);
                assert_eq!(list.principal_count(), 1);
                assert_eq!(list.principal().map(|item| item.code.as_str()), Some("K35.8"));
                assert!(!list.records()[0].is_validated);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn chat_exchange_persists_history_and_transcript() {
        let mut session = ChatSession::default();
        let first = must_some(session.submit_message("¿Dosis de paracetamol?"));
        assert!(session.submit_message("otra").is_none());
        assert!(session.receive_reply(&first, Ok("15 mg/kg cada 6 h".to_string())));

        let second = must_some(session.submit_message("¿Y en adultos?"));
        assert!(session.receive_reply(&second, Ok("1 g cada 8 h".to_string())));

        assert_eq!(session.input.history.len(), 2);
        assert_eq!(session.input.message, "¿Y en adultos?");
        let state = ModuleState::MedicalAssistantChat(session);
        let draft = state.to_draft();
        assert_eq!(draft.input_type, "chat");
        assert_eq!(draft.output_summary, "1 g cada 8 h");
        assert_eq!(draft.full_output["messages"].as_array().map(Vec::len), Some(4));
        assert_exact_round_trip(&state);
    }

    #[test]
    fn failed_chat_reply_is_stored_as_error_with_partial_transcript() {
        let mut session = ChatSession::default();
        let ticket = must_some(session.submit_message("Hola"));
        assert!(session.receive_reply(&ticket, Err("quota exceeded".to_string())));

        let draft = ModuleState::MedicalAssistantChat(session).to_draft();
        assert_eq!(draft.status, EntryStatus::Error);
        assert_eq!(draft.error_details.as_deref(), Some("quota exceeded"));
        let messages = must_some(draft.full_output["messages"].as_array().cloned());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["isError"], json!(true));
    }

    #[test]
    fn chat_without_transcript_rebuilds_it_from_input() {
        let entry = HistoryEntry {
            input_type: CHAT.to_string(),
            ..legacy_entry(
                ModuleKind::MedicalAssistantChat,
                json!({
                    "history": [
                        {"sender": "user", "text": "Hola", "isError": false},
                        {"sender": "assistant", "text": "¿En qué ayudo?", "isError": false}
                    ],
                    "message": "Dolor de cabeza"
                }),
                Value::Null,
            )
        };
        let rehydrated = ModuleState::rehydrate(&entry);
        assert!(rehydrated.fallbacks.is_empty());
        match rehydrated.state {
            ModuleState::MedicalAssistantChat(session) => {
                let transcript = must_some(session.result).messages;
                assert_eq!(transcript.len(), 3);
                assert_eq!(transcript[2], ChatMessage::user("Dolor de cabeza"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn dose_input_accepts_numeric_strings() {
        let entry = legacy_entry(
            ModuleKind::DoseCalculator,
            json!({"drugName": "Ibuprofeno", "weightKg": "18", "doseMgPerKg": 10, "dosesPerDay": "3"}),
            json!({"dosePerAdministrationMg": 180, "dailyDoseMg": 540}),
        );
        let rehydrated = ModuleState::rehydrate(&entry);
        assert!(rehydrated.fallbacks.is_empty());
        match rehydrated.state {
            ModuleState::DoseCalculator(session) => {
                assert!((session.input.weight_kg - 18.0).abs() < f64::EPSILON);
                assert_eq!(session.input.doses_per_day, 3);
                assert_eq!(session.input.concentration_mg_per_ml, None);
                assert_eq!(must_some(session.result).volume_ml, None);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn long_inputs_are_summarized_within_bounds() {
        let state = ModuleState::DischargeSummary(ModuleSession::with_result(
            DischargeSummaryInput {
                admission_reason: "Insuficiencia cardiaca descompensada ".repeat(5),
                ..DischargeSummaryInput::default()
            },
            DischargeSummaryOutput {
                summary: "x".repeat(400),
            },
        ));
        let draft = state.to_draft();
        assert_eq!(draft.input_summary.chars().count(), SUMMARY_DEFAULT);
        assert!(draft.output_summary.ends_with("..."));
        assert!(draft.validate().is_ok());
    }
}
