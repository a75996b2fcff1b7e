//! Application-facing history API.
//!
//! Nothing here returns an error to the caller. Failures are logged, reported
//! through the [`Notifier`] and turned into `None`/`false`; the entry or
//! operation is dropped without retry.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use medassist_history_core::{
    export_document, export_file_name, now_utc, parse_import_document, EntryDraft, HistoryEntry,
    HistoryError, ImportMode, ModuleState, Rehydrated,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{AutosavePolicy, SqliteHistoryStore};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    fn new(level: NotificationLevel, title: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

/// User-facing feedback sink (toasts in the UI, stderr in the CLI).
pub trait Notifier {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            level,
            title,
            message,
        } = notification;
        match level {
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(%title, "{message}");
            }
            NotificationLevel::Warning => tracing::warn!(%title, "{message}"),
            NotificationLevel::Error => tracing::error!(%title, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Page size of `list` and of subscription pages.
    pub list_limit: usize,
    /// First segment of export file names.
    pub export_prefix: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            list_limit: 50,
            export_prefix: "medassist".to_string(),
        }
    }
}

/// What the completion handler did with a concluded operation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum RecordOutcome {
    Appended(HistoryEntry),
    /// Autosave is off; the caller may pass the draft to
    /// [`HistoryService::save_to_history`].
    Deferred(EntryDraft),
    /// Persistence failed and the entry was dropped.
    Dropped(EntryDraft),
    /// The module has neither a result nor an error yet; nothing was stored.
    NotConcluded(EntryDraft),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Listener = Box<dyn Fn(&[HistoryEntry])>;

struct Subscription {
    id: SubscriptionId,
    limit: usize,
    listener: Listener,
}

pub struct HistoryService {
    store: SqliteHistoryStore,
    notifier: Box<dyn Notifier>,
    config: HistoryConfig,
    autosave: AutosavePolicy,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
}

impl HistoryService {
    /// Migrates the store and loads the autosave preference.
    ///
    /// # Errors
    /// Fails when the schema cannot be applied or the preference cannot be
    /// read or initialized.
    pub fn new(
        store: SqliteHistoryStore,
        notifier: Box<dyn Notifier>,
        config: HistoryConfig,
    ) -> Result<Self> {
        store.migrate().context("failed to migrate history store")?;
        let autosave =
            AutosavePolicy::initialize(&store).context("failed to initialize autosave")?;
        tracing::debug!(autosave = autosave.enabled(), "history service ready");

        Ok(Self {
            store,
            notifier,
            config,
            autosave,
            subscriptions: Vec::new(),
            next_subscription: 1,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SqliteHistoryStore {
        &self.store
    }

    /// Completion handler: appends the module's state when autosave is on,
    /// otherwise hands the draft back. A session without a result or an
    /// error is never stored.
    pub fn record_completion(&mut self, state: &ModuleState) -> RecordOutcome {
        let draft = state.to_draft();
        if !state.is_concluded() {
            tracing::debug!(module = %draft.module, "operation not concluded, nothing recorded");
            return RecordOutcome::NotConcluded(draft);
        }
        if !self.autosave.enabled() {
            tracing::debug!(module = %draft.module, "autosave disabled, entry deferred");
            return RecordOutcome::Deferred(draft);
        }

        match self.store.append(&draft) {
            Ok(entry) => {
                self.publish();
                RecordOutcome::Appended(entry)
            }
            Err(err) => {
                self.report_failure("Could not save to history", &err);
                RecordOutcome::Dropped(draft)
            }
        }
    }

    /// Manual "Save to History": appends regardless of autosave.
    pub fn save_to_history(&mut self, draft: &EntryDraft) -> Option<HistoryEntry> {
        match self.store.append(draft) {
            Ok(entry) => {
                self.notify(
                    NotificationLevel::Success,
                    "Saved to history",
                    format!("{} entry saved", draft.module.descriptor().label),
                );
                self.publish();
                Some(entry)
            }
            Err(err) => {
                self.report_failure("Could not save to history", &err);
                None
            }
        }
    }

    /// Newest first; `limit` defaults to the configured page size.
    pub fn list(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let limit = limit.unwrap_or(self.config.list_limit);
        self.store.list(limit).unwrap_or_else(|err| {
            self.report_failure("Could not load history", &err);
            Vec::new()
        })
    }

    pub fn list_all(&self) -> Vec<HistoryEntry> {
        self.store.list_all().unwrap_or_else(|err| {
            self.report_failure("Could not load history", &err);
            Vec::new()
        })
    }

    pub fn get(&self, id: i64) -> Option<HistoryEntry> {
        self.store.get(id).unwrap_or_else(|err| {
            self.report_failure("Could not load history", &err);
            None
        })
    }

    /// Idempotent; `false` only when the delete itself failed.
    pub fn delete_one(&mut self, id: i64) -> bool {
        match self.store.delete_one(id) {
            Ok(_) => {
                self.publish();
                true
            }
            Err(err) => {
                self.report_failure("Could not delete entry", &err);
                false
            }
        }
    }

    pub fn clear_all(&mut self) -> bool {
        match self.store.clear_all() {
            Ok(removed) => {
                self.notify(
                    NotificationLevel::Success,
                    "History cleared",
                    format!("{removed} entries removed"),
                );
                self.publish();
                true
            }
            Err(err) => {
                self.report_failure("Could not clear history", &err);
                false
            }
        }
    }

    /// "Load to module": rebuilds the originating module's state. Partial
    /// loads are reported with a warning.
    pub fn load(&self, id: i64) -> Option<Rehydrated> {
        let entry = match self.store.get(id) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.notify(
                    NotificationLevel::Warning,
                    "Entry not found",
                    format!("history entry {id} does not exist"),
                );
                return None;
            }
            Err(err) => {
                self.report_failure("Could not load history", &err);
                return None;
            }
        };

        let rehydrated = ModuleState::rehydrate(&entry);
        let label = entry.module.descriptor().label;
        if rehydrated.is_partial() {
            tracing::warn!(id, fallbacks = ?rehydrated.fallbacks, "entry loaded with defaults");
            self.notify(
                NotificationLevel::Warning,
                "Loaded with defaults",
                format!(
                    "{label}: {} field(s) were missing or unreadable",
                    rehydrated.fallbacks.len()
                ),
            );
        } else {
            self.notify(
                NotificationLevel::Success,
                "Entry loaded",
                format!("Loaded into {label}"),
            );
        }
        Some(rehydrated)
    }

    /// Writes the whole log into `dir`. An empty log writes nothing.
    pub fn export_to_dir(&self, dir: &Path) -> Option<PathBuf> {
        self.export_to_dir_at(dir, now_utc())
    }

    pub fn export_to_dir_at(&self, dir: &Path, at: OffsetDateTime) -> Option<PathBuf> {
        let entries = match self.store.list_all() {
            Ok(entries) => entries,
            Err(err) => {
                self.report_failure("Could not export history", &err);
                return None;
            }
        };
        if entries.is_empty() {
            self.notify(
                NotificationLevel::Info,
                "Nothing to export",
                "the history is empty",
            );
            return None;
        }

        match write_export(dir, &self.config.export_prefix, at, &entries) {
            Ok(path) => {
                tracing::info!(path = %path.display(), entries = entries.len(), "history exported");
                self.notify(
                    NotificationLevel::Success,
                    "History exported",
                    format!("{} entries written to {}", entries.len(), path.display()),
                );
                Some(path)
            }
            Err(err) => {
                self.report_failure("Could not export history", &err);
                None
            }
        }
    }

    /// Returns the number of imported entries.
    pub fn import_file(&mut self, path: &Path, mode: ImportMode) -> Option<usize> {
        match std::fs::read_to_string(path) {
            Ok(text) => self.import_str(&text, mode),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "import file unreadable");
                self.notify(
                    NotificationLevel::Error,
                    "Import failed",
                    format!("could not read file {}: {err}", path.display()),
                );
                None
            }
        }
    }

    pub fn import_str(&mut self, text: &str, mode: ImportMode) -> Option<usize> {
        let entries = match parse_import_document(text) {
            Ok(entries) => entries,
            Err(err) => {
                let message = match &err {
                    HistoryError::Format(detail) => format!("invalid format: {detail}"),
                    other => other.to_string(),
                };
                tracing::warn!(error = %err, "import document rejected");
                self.notify(NotificationLevel::Error, "Import failed", message);
                return None;
            }
        };

        let written = match mode {
            ImportMode::Replace => self.store.replace_all(&entries),
            ImportMode::Add => self.store.bulk_append(&entries),
        };
        match written {
            Ok(count) => {
                self.notify(
                    NotificationLevel::Success,
                    "History imported",
                    format!("{count} entries imported ({})", mode.as_str()),
                );
                self.publish();
                Some(count)
            }
            Err(err) => {
                self.report_failure("Import failed", &err);
                None
            }
        }
    }

    #[must_use]
    pub fn autosave_enabled(&self) -> bool {
        self.autosave.enabled()
    }

    /// Returns the new value, or `None` when it could not be persisted.
    pub fn toggle_autosave(&mut self) -> Option<bool> {
        match self.autosave.toggle(&self.store) {
            Ok(enabled) => Some(enabled),
            Err(err) => {
                self.report_failure("Could not update autosave", &err);
                None
            }
        }
    }

    pub fn set_autosave(&mut self, enabled: bool) -> bool {
        match self.autosave.set(&self.store, enabled) {
            Ok(()) => true,
            Err(err) => {
                self.report_failure("Could not update autosave", &err);
                false
            }
        }
    }

    /// Registers a listener for the newest `limit` entries. It receives the
    /// current page now and again after every successful write.
    pub fn subscribe<F>(&mut self, limit: usize, listener: F) -> SubscriptionId
    where
        F: Fn(&[HistoryEntry]) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        listener(&self.list(Some(limit)));
        self.subscriptions.push(Subscription {
            id,
            limit,
            listener: Box::new(listener),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|subscription| subscription.id != id);
        self.subscriptions.len() != before
    }

    fn publish(&self) {
        for subscription in &self.subscriptions {
            let page = self.list(Some(subscription.limit));
            (subscription.listener)(&page);
        }
    }

    fn notify(&self, level: NotificationLevel, title: &str, message: impl Into<String>) {
        self.notifier.notify(Notification::new(level, title, message));
    }

    fn report_failure(&self, title: &str, err: &anyhow::Error) {
        tracing::warn!(error = %format!("{err:#}"), "{title}");
        self.notify(NotificationLevel::Error, title, format!("{err:#}"));
    }
}

fn write_export(
    dir: &Path,
    prefix: &str,
    at: OffsetDateTime,
    entries: &[HistoryEntry],
) -> Result<PathBuf> {
    let name = export_file_name(prefix, at)?;
    let document = export_document(entries)?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, document)
        .with_context(|| format!("failed to write export file {}", path.display()))?;
    Ok(path)
}
