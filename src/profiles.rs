//! ProfileStore: the catalog of available tuning profiles and the single
//! active-profile cell every other component reads from.
//!
//! The active profile id lives in an [`ArcSwap`] rather than a `Mutex` or
//! `watch` channel: reads (every Poller tick, every Reading tag) vastly
//! outnumber writes (one per drive boundary), and `ArcSwap` makes the read
//! path lock-free.

use crate::config::{ProfileConfig, ProfilesConfig, ThresholdDirection};
use crate::error::{Result, VigilError};
use crate::logging::{StructuredLogger, get_logger};
use crate::store::model::{Direction, Profile, Threshold};
use crate::store::Store;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Catalog of configured profiles plus the currently active one.
pub struct ProfileStore {
    profiles: HashMap<String, Profile>,
    active: ArcSwap<String>,
    logger: StructuredLogger,
}

impl ProfileStore {
    /// Build the catalog from config, validate the active id exists, and
    /// persist each profile's definition to `store` so history stays
    /// attributable even if the config later changes.
    pub fn from_config(cfg: &ProfilesConfig, store: &Store) -> Result<Self> {
        let mut profiles = HashMap::new();
        for p in &cfg.available_profiles {
            let profile = to_profile(p);
            store.upsert_profile(
                &profile.id,
                &profile.name,
                profile.poll_interval_ms,
                &profile.thresholds,
            )?;
            profiles.insert(profile.id.clone(), profile);
        }

        if !profiles.contains_key(&cfg.active_profile) {
            return Err(VigilError::config(format!(
                "activeProfile '{}' is not a known profile id",
                cfg.active_profile
            )));
        }

        Ok(Self {
            profiles,
            active: ArcSwap::new(Arc::new(cfg.active_profile.clone())),
            logger: get_logger("profiles"),
        })
    }

    /// Currently active profile id.
    pub fn active_id(&self) -> String {
        (**self.active.load()).clone()
    }

    /// The active profile's full definition.
    pub fn active(&self) -> Profile {
        let id = self.active_id();
        self.profiles
            .get(&id)
            .cloned()
            .expect("active profile id always refers to a loaded profile")
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(|s| s.as_str())
    }

    /// Switch the active profile immediately. Callers that must defer the
    /// switch to a drive boundary should go through `ProfileSwitcher`
    /// instead of calling this directly.
    pub fn set_active(&self, id: &str) -> Result<()> {
        if !self.profiles.contains_key(id) {
            return Err(VigilError::validation(
                "profile_id".to_string(),
                format!("unknown profile id: {}", id),
            ));
        }
        self.active.store(Arc::new(id.to_string()));
        self.logger.info(&format!("active profile switched to '{}'", id));
        Ok(())
    }
}

fn to_profile(cfg: &ProfileConfig) -> Profile {
    Profile {
        id: cfg.id.clone(),
        name: cfg.name.clone(),
        poll_interval_ms: cfg.poll_interval_ms,
        thresholds: cfg
            .thresholds
            .iter()
            .map(|t| Threshold {
                id: Uuid::new_v4().to_string(),
                parameter: t.parameter.clone(),
                direction: match t.direction {
                    ThresholdDirection::Above => Direction::Above,
                    ThresholdDirection::Below => Direction::Below,
                },
                value: t.value,
                cooldown_ms: t.cooldown_ms,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilesConfig;

    #[test]
    fn loads_default_profiles_and_validates_active() {
        let store = Store::open_in_memory().unwrap();
        let cfg = ProfilesConfig::default();
        let ps = ProfileStore::from_config(&cfg, &store).unwrap();
        assert_eq!(ps.active_id(), "daily");
        assert!(ps.get("performance").is_some());
    }

    #[test]
    fn rejects_unknown_active_profile() {
        let store = Store::open_in_memory().unwrap();
        let mut cfg = ProfilesConfig::default();
        cfg.active_profile = "nonexistent".to_string();
        assert!(ProfileStore::from_config(&cfg, &store).is_err());
    }

    #[test]
    fn set_active_switches_and_rejects_unknown() {
        let store = Store::open_in_memory().unwrap();
        let ps = ProfileStore::from_config(&ProfilesConfig::default(), &store).unwrap();
        ps.set_active("performance").unwrap();
        assert_eq!(ps.active_id(), "performance");
        assert!(ps.set_active("nope").is_err());
        assert_eq!(ps.active_id(), "performance");
    }
}
