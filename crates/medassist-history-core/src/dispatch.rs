//! Static module table: display label, icon and the UI anchor a "load to
//! module" action scrolls to.
//!
//! The table is one exhaustive match over [`ModuleKind`]; the codec dispatch in
//! [`crate::codec`] matches the same enum, so a new kind does not compile until
//! both are filled in.

use serde::Serialize;

use crate::ModuleKind;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub kind: ModuleKind,
    pub label: &'static str,
    pub icon: &'static str,
    pub anchor: &'static str,
}

impl ModuleKind {
    pub const ALL: [Self; 15] = [
        Self::ImageAnalysis,
        Self::PdfExtraction,
        Self::TextAnalysis,
        Self::ClinicalAnalysis,
        Self::DiagnosisSupport,
        Self::MedicalOrders,
        Self::TreatmentPlan,
        Self::PatientAdvice,
        Self::MedicalJustification,
        Self::MedicalAssistantChat,
        Self::DoseCalculator,
        Self::DischargeSummary,
        Self::LabStandardizer,
        Self::InterrogationQuestions,
        Self::PhysicalExam,
    ];

    #[must_use]
    pub fn descriptor(self) -> ModuleDescriptor {
        let (label, icon, anchor) = match self {
            Self::ImageAnalysis => ("Image Analysis", "image", "image-analysis-module"),
            Self::PdfExtraction => ("PDF Extraction", "file-text", "pdf-extraction-module"),
            Self::TextAnalysis => ("Text Improvement", "sparkles", "text-analysis-module"),
            Self::ClinicalAnalysis => (
                "Clinical Analysis",
                "stethoscope",
                "clinical-analysis-module",
            ),
            Self::DiagnosisSupport => (
                "Diagnosis Support",
                "list-checks",
                "diagnosis-support-module",
            ),
            Self::MedicalOrders => ("Medical Orders", "clipboard-list", "medical-orders-module"),
            Self::TreatmentPlan => ("Treatment Plan", "pill", "treatment-plan-module"),
            Self::PatientAdvice => (
                "Patient Advice",
                "heart-handshake",
                "patient-advice-module",
            ),
            Self::MedicalJustification => (
                "Medical Justification",
                "file-check",
                "medical-justification-module",
            ),
            Self::MedicalAssistantChat => (
                "Medical Assistant Chat",
                "message-square",
                "medical-assistant-chat-module",
            ),
            Self::DoseCalculator => ("Dose Calculator", "calculator", "dose-calculator-module"),
            Self::DischargeSummary => (
                "Discharge Summary",
                "file-output",
                "discharge-summary-module",
            ),
            Self::LabStandardizer => (
                "Lab Standardizer",
                "flask-conical",
                "lab-standardizer-module",
            ),
            Self::InterrogationQuestions => (
                "Interrogation Questions",
                "help-circle",
                "interrogation-questions-module",
            ),
            Self::PhysicalExam => ("Physical Exam", "activity", "physical-exam-module"),
        };

        ModuleDescriptor {
            kind: self,
            label,
            icon,
            anchor,
        }
    }
}

#[must_use]
pub fn all_descriptors() -> Vec<ModuleDescriptor> {
    ModuleKind::ALL.into_iter().map(ModuleKind::descriptor).collect()
}
