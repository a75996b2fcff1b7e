use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRecord {
    pub code: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub is_validated: bool,
    pub is_principal: bool,
}

impl DiagnosisRecord {
    #[must_use]
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            ..Self::default()
        }
    }
}

/// Ordered diagnosis rows of the diagnosis-support module.
///
/// At most one row carries `is_principal`. Every mutation that sets the flag
/// clears it from the other rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct DiagnosisList {
    records: Vec<DiagnosisRecord>,
}

impl DiagnosisList {
    #[must_use]
    pub fn new(records: Vec<DiagnosisRecord>) -> Self {
        let mut list = Self { records };
        list.normalize_principal();
        list
    }

    #[must_use]
    pub fn records(&self) -> &[DiagnosisRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: DiagnosisRecord) {
        let principal = record.is_principal;
        self.records.push(record);
        if principal {
            let last = self.records.len() - 1;
            let _ = self.set_principal(last);
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<DiagnosisRecord> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }

    pub fn set_principal(&mut self, index: usize) -> bool {
        if index >= self.records.len() {
            return false;
        }

        for (position, record) in self.records.iter_mut().enumerate() {
            record.is_principal = position == index;
        }
        true
    }

    pub fn clear_principal(&mut self) {
        for record in &mut self.records {
            record.is_principal = false;
        }
    }

    #[must_use]
    pub fn principal(&self) -> Option<&DiagnosisRecord> {
        self.records.iter().find(|record| record.is_principal)
    }

    #[must_use]
    pub fn principal_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.is_principal)
            .count()
    }

    pub fn toggle_validated(&mut self, index: usize) -> bool {
        match self.records.get_mut(index) {
            Some(record) => {
                record.is_validated = !record.is_validated;
                true
            }
            None => false,
        }
    }

    /// Drag-and-drop reorder: moves the row at `from` so it lands at `to`.
    pub fn move_row(&mut self, from: usize, to: usize) -> bool {
        if from >= self.records.len() || to >= self.records.len() {
            return false;
        }

        let record = self.records.remove(from);
        self.records.insert(to, record);
        true
    }

    pub fn validated(&self) -> impl Iterator<Item = &DiagnosisRecord> {
        self.records.iter().filter(|record| record.is_validated)
    }

    /// Keeps only the first principal flag. Returns `true` if any flag was
    /// cleared.
    pub fn normalize_principal(&mut self) -> bool {
        let mut seen = false;
        let mut changed = false;
        for record in &mut self.records {
            if record.is_principal {
                if seen {
                    record.is_principal = false;
                    changed = true;
                }
                seen = true;
            }
        }
        changed
    }
}
