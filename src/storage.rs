/// Persistence gateway for the settings record in chrome.storage
use crate::config::{ExtensionSettings, SETTINGS_STORAGE_KEY};
use crate::settings::{SettingsPatch, merge, merge_value};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Named chrome.storage partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaName {
    Sync,
    Local,
    Session,
    Managed,
}

impl AreaName {
    /// Partitions tried for the settings record, in order of preference
    pub const PREFERRED: [AreaName; 2] = [AreaName::Sync, AreaName::Local];

    pub fn as_str(self) -> &'static str {
        match self {
            AreaName::Sync => "sync",
            AreaName::Local => "local",
            AreaName::Session => "session",
            AreaName::Managed => "managed",
        }
    }

    pub fn parse(name: &str) -> Option<AreaName> {
        match name {
            "sync" => Some(AreaName::Sync),
            "local" => Some(AreaName::Local),
            "session" => Some(AreaName::Session),
            "managed" => Some(AreaName::Managed),
            _ => None,
        }
    }

    /// Whether change events from this partition can carry the settings record
    pub fn carries_settings(self) -> bool {
        Self::PREFERRED.contains(&self)
    }
}

impl fmt::Display for AreaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage.{area}.{operation} failed: {message}")]
    Backend {
        area: AreaName,
        operation: &'static str,
        message: String,
    },
    #[error("failed to encode settings: {0}")]
    Encode(String),
}

/// One key-value storage partition
#[allow(async_fn_in_trait)]
pub trait StorageArea {
    fn name(&self) -> AreaName;

    /// Read a key; `Ok(None)` when it has never been written
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// The only read/write path for the settings record.
///
/// `area` is `None` when no storage API is reachable (e.g. a page opened
/// outside the extension): loads then return defaults and saves are not
/// persisted.
pub struct SettingsGateway<A> {
    area: Option<A>,
    key: &'static str,
}

impl<A: StorageArea> SettingsGateway<A> {
    pub fn new(area: Option<A>) -> Self {
        SettingsGateway {
            area,
            key: SETTINGS_STORAGE_KEY,
        }
    }

    pub fn unavailable() -> Self {
        Self::new(None)
    }

    pub fn area(&self) -> Option<&A> {
        self.area.as_ref()
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub async fn load(&self) -> Result<ExtensionSettings, StorageError> {
        let Some(area) = &self.area else {
            return Ok(merge(None));
        };

        let stored = area.get(self.key).await?;
        Ok(merge_value(stored.as_ref()))
    }

    /// Load, overlay `patch`, write the whole merged record back.
    pub async fn save(&self, patch: &SettingsPatch) -> Result<ExtensionSettings, StorageError> {
        let current = self.load().await?;
        let next = current.merged(patch);

        let Some(area) = &self.area else {
            log::debug!("No storage area available; settings change not persisted");
            return Ok(next);
        };

        let value = serde_json::to_value(&next).map_err(|e| StorageError::Encode(e.to_string()))?;
        area.set(self.key, value).await?;

        log::debug!("Saved settings to storage.{}", area.name());
        Ok(next)
    }

    /// Remove the record so the next load materializes defaults again
    pub async fn clear(&self) -> Result<(), StorageError> {
        match &self.area {
            Some(area) => area.remove(self.key).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThemePreference;
    use crate::testing::MemoryArea;
    use futures::executor::block_on;
    use serde_json::json;

    fn gateway(area: &MemoryArea) -> SettingsGateway<MemoryArea> {
        SettingsGateway::new(Some(area.clone()))
    }

    #[test]
    fn test_load_defaults_when_storage_empty() {
        let area = MemoryArea::new(AreaName::Sync);
        let settings = block_on(gateway(&area).load()).unwrap();

        assert_eq!(settings, ExtensionSettings::default());
    }

    #[test]
    fn test_load_defaults_when_storage_unavailable() {
        let gateway = SettingsGateway::<MemoryArea>::unavailable();
        let settings = block_on(gateway.load()).unwrap();

        assert_eq!(settings, ExtensionSettings::default());
    }

    #[test]
    fn test_load_merges_stored_record() {
        let area = MemoryArea::new(AreaName::Sync);
        area.insert(
            SETTINGS_STORAGE_KEY,
            json!({ "pinnedHosts": ["Example.com"], "sidePanel": { "autoOpen": false } }),
        );

        let settings = block_on(gateway(&area).load()).unwrap();

        assert_eq!(settings.theme, ThemePreference::System);
        assert_eq!(settings.pinned_hosts, vec!["example.com".to_string()]);
        assert!(!settings.side_panel.auto_open);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let area = MemoryArea::new(AreaName::Sync);
        let gateway = gateway(&area);

        let saved = block_on(gateway.save(&SettingsPatch::theme(ThemePreference::Dark))).unwrap();
        let loaded = block_on(gateway.load()).unwrap();

        assert_eq!(saved, loaded);
        assert_eq!(loaded.theme, ThemePreference::Dark);
        assert_eq!(loaded.pinned_hosts, ExtensionSettings::default().pinned_hosts);
        assert_eq!(loaded.side_panel, ExtensionSettings::default().side_panel);
    }

    #[test]
    fn test_save_writes_full_record() {
        let area = MemoryArea::new(AreaName::Local);
        block_on(gateway(&area).save(&SettingsPatch::side_panel_auto_open(false))).unwrap();

        assert_eq!(
            area.value(SETTINGS_STORAGE_KEY),
            Some(json!({ "theme": "system", "pinnedHosts": [], "sidePanel": { "autoOpen": false } }))
        );
    }

    #[test]
    fn test_fresh_install_scenario() {
        let area = MemoryArea::new(AreaName::Sync);
        let gateway = gateway(&area);

        let fresh = block_on(gateway.load()).unwrap();
        assert_eq!(fresh.theme, ThemePreference::System);
        assert!(fresh.pinned_hosts.is_empty());
        assert!(fresh.side_panel.auto_open);

        block_on(gateway.save(&SettingsPatch::pinned_hosts(vec!["Example.COM".to_string()]))).unwrap();
        let loaded = block_on(gateway.load()).unwrap();

        assert_eq!(loaded.pinned_hosts, vec!["example.com".to_string()]);
        assert_eq!(loaded.theme, fresh.theme);
        assert_eq!(loaded.side_panel, fresh.side_panel);
    }

    #[test]
    fn test_save_propagates_write_failure() {
        let area = MemoryArea::new(AreaName::Sync);
        area.fail_writes("QUOTA_BYTES_PER_ITEM quota exceeded");

        let result = block_on(gateway(&area).save(&SettingsPatch::theme(ThemePreference::Dark)));

        assert!(matches!(
            result,
            Err(StorageError::Backend { operation: "set", .. })
        ));
        assert_eq!(area.value(SETTINGS_STORAGE_KEY), None);
    }

    #[test]
    fn test_save_without_storage_returns_merged() {
        let gateway = SettingsGateway::<MemoryArea>::unavailable();
        let saved = block_on(gateway.save(&SettingsPatch::theme(ThemePreference::Light))).unwrap();

        assert_eq!(saved.theme, ThemePreference::Light);
    }

    #[test]
    fn test_clear_restores_defaults() {
        let area = MemoryArea::new(AreaName::Sync);
        let gateway = gateway(&area);
        block_on(gateway.save(&SettingsPatch::theme(ThemePreference::Dark))).unwrap();

        block_on(gateway.clear()).unwrap();

        assert_eq!(block_on(gateway.load()).unwrap(), ExtensionSettings::default());
    }

    #[test]
    fn test_area_names() {
        assert_eq!(AreaName::parse("sync"), Some(AreaName::Sync));
        assert_eq!(AreaName::parse("bogus"), None);
        assert!(AreaName::Local.carries_settings());
        assert!(!AreaName::Managed.carries_settings());
    }
}
