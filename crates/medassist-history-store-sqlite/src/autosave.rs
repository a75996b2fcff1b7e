use anyhow::Result;

use crate::SqliteHistoryStore;

pub const AUTOSAVE_PREFERENCE_KEY: &str = "autosave-preference";

/// In-memory copy of the persisted autosave switch.
///
/// Every change is written through to the `preferences` table before the
/// in-memory value flips, so a failed write leaves both unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosavePolicy {
    enabled: bool,
}

impl AutosavePolicy {
    pub const DEFAULT_ENABLED: bool = true;

    /// Reads the stored preference. Absent or unparsable values are replaced
    /// by the default, which is persisted.
    pub fn initialize(store: &SqliteHistoryStore) -> Result<Self> {
        let stored = store.get_preference(AUTOSAVE_PREFERENCE_KEY)?;
        let enabled = match stored.as_deref().map(parse_flag) {
            Some(Some(enabled)) => return Ok(Self { enabled }),
            Some(None) => {
                tracing::warn!(
                    value = stored.as_deref().unwrap_or_default(),
                    "unreadable autosave preference, resetting to default"
                );
                Self::DEFAULT_ENABLED
            }
            None => Self::DEFAULT_ENABLED,
        };

        store.set_preference(AUTOSAVE_PREFERENCE_KEY, flag_value(enabled))?;
        Ok(Self { enabled })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Flips the switch and returns the new value.
    pub fn toggle(&mut self, store: &SqliteHistoryStore) -> Result<bool> {
        let next = !self.enabled;
        self.set(store, next)?;
        Ok(next)
    }

    pub fn set(&mut self, store: &SqliteHistoryStore, enabled: bool) -> Result<()> {
        store.set_preference(AUTOSAVE_PREFERENCE_KEY, flag_value(enabled))?;
        self.enabled = enabled;
        tracing::info!(enabled, "autosave preference updated");
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn flag_value(enabled: bool) -> &'static str {
    if enabled {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn fixture_store() -> SqliteHistoryStore {
        let store = must(SqliteHistoryStore::open_in_memory());
        must(store.migrate());
        store
    }

    #[test]
    fn first_run_defaults_to_enabled_and_persists() {
        let store = fixture_store();
        let policy = must(AutosavePolicy::initialize(&store));
        assert!(policy.enabled());
        assert_eq!(
            must(store.get_preference(AUTOSAVE_PREFERENCE_KEY)).as_deref(),
            Some("true")
        );
    }

    #[test]
    fn toggle_persists_immediately() {
        let store = fixture_store();
        let mut policy = must(AutosavePolicy::initialize(&store));
        assert!(!must(policy.toggle(&store)));

        let reloaded = must(AutosavePolicy::initialize(&store));
        assert!(!reloaded.enabled());
        assert_eq!(
            must(store.get_preference(AUTOSAVE_PREFERENCE_KEY)).as_deref(),
            Some("false")
        );
    }

    #[test]
    fn unreadable_value_is_rewritten_to_default() {
        let store = fixture_store();
        must(store.set_preference(AUTOSAVE_PREFERENCE_KEY, "maybe"));
        let policy = must(AutosavePolicy::initialize(&store));
        assert!(policy.enabled());
        assert_eq!(
            must(store.get_preference(AUTOSAVE_PREFERENCE_KEY)).as_deref(),
            Some("true")
        );
    }

    #[test]
    fn set_is_idempotent() {
        let store = fixture_store();
        let mut policy = must(AutosavePolicy::initialize(&store));
        must(policy.set(&store, false));
        must(policy.set(&store, false));
        assert!(!policy.enabled());
    }
}
