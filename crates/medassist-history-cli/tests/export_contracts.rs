use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use medassist_history_core::{export_document, parse_import_document, ModuleKind, ModuleState};
use medassist_history_store_sqlite::SqliteHistoryStore;
use serde_json::{json, Value};

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}

fn schema_path() -> PathBuf {
    repo_root().join("contracts/export/v1/history-export.schema.json")
}

fn schema_errors(value: &Value) -> Vec<String> {
    let path = schema_path();
    let schema = read_json(&path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", path.display()));
    compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
        .unwrap_or_default()
}

fn assert_schema(value: &Value) {
    let errors = schema_errors(value);
    assert!(
        errors.is_empty(),
        "schema validation failed for {}:\n{}",
        schema_path().display(),
        errors.join("\n")
    );
}

fn seeded_store() -> SqliteHistoryStore {
    let store = SqliteHistoryStore::open_in_memory()
        .unwrap_or_else(|err| panic!("failed to open store: {err}"));
    store
        .migrate()
        .unwrap_or_else(|err| panic!("failed to migrate store: {err}"));

    let recorded = [
        ModuleState::from_payloads(
            ModuleKind::TextAnalysis,
            "",
            &json!("paciente refiere cefalea"),
            Ok(&json!({"improvedText": "Paciente refiere cefalea.", "suggestions": []})),
        ),
        ModuleState::from_payloads(
            ModuleKind::DiagnosisSupport,
            "",
            &json!("dolor torácico opresivo"),
            Ok(&json!([
                {"code": "I20.0", "description": "Angina inestable", "confidence": 0.8},
                {"code": "I21.9", "description": "Infarto agudo de miocardio", "confidence": 0.6}
            ])),
        ),
        ModuleState::from_payloads(
            ModuleKind::PdfExtraction,
            "application/pdf",
            &json!({"fileName": "laboratorio.pdf"}),
            Err("PDF protegido"),
        ),
        ModuleState::from_payloads(
            ModuleKind::MedicalAssistantChat,
            "",
            &json!({"history": [], "message": "¿Dosis de amoxicilina en niños?"}),
            Ok(&json!({"messages": [
                {"sender": "user", "text": "¿Dosis de amoxicilina en niños?"},
                {"sender": "assistant", "text": "50 mg/kg/día divididos cada 8 horas"}
            ]})),
        ),
    ];
    for rehydrated in &recorded {
        store
            .append(&rehydrated.state.to_draft())
            .unwrap_or_else(|err| panic!("failed to append entry: {err}"));
    }
    store
}

#[test]
fn sample_fixture_matches_export_schema() {
    let fixture = read_json(
        &repo_root().join("contracts/export/v1/fixtures/history-export.sample.json"),
    );
    assert_schema(&fixture);

    let imported = parse_import_document(&fixture.to_string())
        .unwrap_or_else(|err| panic!("fixture rejected by import: {err}"));
    assert_eq!(imported.len(), 2);
    assert_eq!(imported[0].module, ModuleKind::PhysicalExam);
    assert_eq!(imported[0].error_details.as_deref(), Some("timeout"));
}

#[test]
fn exported_document_matches_export_schema() {
    let store = seeded_store();
    let entries = store
        .list_all()
        .unwrap_or_else(|err| panic!("failed to list entries: {err}"));
    let document = export_document(&entries)
        .unwrap_or_else(|err| panic!("failed to export entries: {err}"));
    let value: Value = serde_json::from_str(&document)
        .unwrap_or_else(|err| panic!("export is not JSON: {err}"));

    assert_schema(&value);
    assert_eq!(value.as_array().map(Vec::len), Some(4));
}

#[test]
fn schema_rejects_exported_ids_and_unknown_modules() {
    let with_id = json!([{
        "id": 7,
        "timestamp": 1_760_870_400_000_i64,
        "module": "TextAnalysis",
        "status": "completed"
    }]);
    assert!(!schema_errors(&with_id).is_empty());

    let unknown_module = json!([{
        "timestamp": 1_760_870_400_000_i64,
        "module": "Radiology",
        "status": "completed"
    }]);
    assert!(!schema_errors(&unknown_module).is_empty());
}
