//! ProfileSwitcher: queues a pending profile change and applies it only at
//! a drive boundary (spec.md §4.1 routing: `drive_end` ->
//! `ProfileSwitcher(apply pending)`), never mid-drive.
//!
//! Grounded on `driver::types::DriverCommand`'s queued-mutation pattern.

use crate::logging::{StructuredLogger, get_logger};
use crate::profiles::ProfileStore;
use std::sync::Mutex;

/// Holds at most one pending profile id. A second `request_switch` before
/// the pending one applies simply replaces it — only the latest request
/// matters.
pub struct ProfileSwitcher {
    pending: Mutex<Option<String>>,
    logger: StructuredLogger,
}

impl ProfileSwitcher {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            logger: get_logger("profile_switcher"),
        }
    }

    /// Queue `id` to become active at the next drive boundary. Does not
    /// touch `ProfileStore` yet.
    pub fn request_switch(&self, id: String) {
        self.logger
            .info(&format!("queued profile switch to '{}'", id));
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Apply the queued switch, if any, against `profiles`. Returns the
    /// newly-active profile id when a switch actually happened.
    pub fn apply_pending(&self, profiles: &ProfileStore) -> crate::error::Result<Option<String>> {
        let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(id) = guard.take() else {
            return Ok(None);
        };
        profiles.set_active(&id)?;
        self.logger
            .info(&format!("applied queued profile switch to '{}'", id));
        Ok(Some(id))
    }
}

impl Default for ProfileSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilesConfig;
    use crate::store::Store;

    #[test]
    fn apply_pending_is_noop_when_nothing_queued() {
        let store = Store::open_in_memory().unwrap();
        let profiles = ProfileStore::from_config(&ProfilesConfig::default(), &store).unwrap();
        let switcher = ProfileSwitcher::new();
        assert_eq!(switcher.apply_pending(&profiles).unwrap(), None);
    }

    #[test]
    fn request_then_apply_switches_active_profile() {
        let store = Store::open_in_memory().unwrap();
        let profiles = ProfileStore::from_config(&ProfilesConfig::default(), &store).unwrap();
        let switcher = ProfileSwitcher::new();
        switcher.request_switch("performance".to_string());
        assert!(switcher.has_pending());

        let applied = switcher.apply_pending(&profiles).unwrap();
        assert_eq!(applied, Some("performance".to_string()));
        assert_eq!(profiles.active_id(), "performance");
        assert!(!switcher.has_pending());
    }

    #[test]
    fn second_request_before_apply_replaces_the_first() {
        let store = Store::open_in_memory().unwrap();
        let profiles = ProfileStore::from_config(&ProfilesConfig::default(), &store).unwrap();
        let switcher = ProfileSwitcher::new();
        switcher.request_switch("performance".to_string());
        switcher.request_switch("daily".to_string());

        let applied = switcher.apply_pending(&profiles).unwrap();
        assert_eq!(applied, Some("daily".to_string()));
    }
}
