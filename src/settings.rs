/// Partial settings updates and the defaults <- stored <- partial merge
use crate::config::{ExtensionSettings, ThemePreference};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidePanelPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_open: Option<bool>,
}

/// A partially populated settings fragment: a caller's delta or a raw stored value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemePreference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_panel: Option<SidePanelPatch>,
}

impl SettingsPatch {
    pub fn theme(theme: ThemePreference) -> Self {
        SettingsPatch {
            theme: Some(theme),
            ..Default::default()
        }
    }

    pub fn pinned_hosts(hosts: Vec<String>) -> Self {
        SettingsPatch {
            pinned_hosts: Some(hosts),
            ..Default::default()
        }
    }

    pub fn side_panel_auto_open(auto_open: bool) -> Self {
        SettingsPatch {
            side_panel: Some(SidePanelPatch {
                auto_open: Some(auto_open),
            }),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.theme.is_none() && self.pinned_hosts.is_none() && self.side_panel.is_none()
    }

    /// Read a raw stored value field by field.
    ///
    /// Anything that is not an object yields an empty patch, and individual
    /// fields of the wrong type are dropped, so a malformed record degrades
    /// to defaults one field at a time instead of failing as a whole.
    pub fn from_value(value: &Value) -> SettingsPatch {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                log::warn!("Ignoring malformed settings record: {}", value);
            }
            return SettingsPatch::default();
        };

        let theme = object
            .get("theme")
            .and_then(Value::as_str)
            .and_then(ThemePreference::parse);

        let pinned_hosts = object.get("pinnedHosts").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        });

        let side_panel = object
            .get("sidePanel")
            .and_then(Value::as_object)
            .map(|panel| SidePanelPatch {
                auto_open: panel.get("autoOpen").and_then(Value::as_bool),
            });

        SettingsPatch {
            theme,
            pinned_hosts,
            side_panel,
        }
    }
}

impl From<ExtensionSettings> for SettingsPatch {
    fn from(settings: ExtensionSettings) -> Self {
        SettingsPatch {
            theme: Some(settings.theme),
            pinned_hosts: Some(settings.pinned_hosts),
            side_panel: Some(SidePanelPatch {
                auto_open: Some(settings.side_panel.auto_open),
            }),
        }
    }
}

impl ExtensionSettings {
    /// Overlay `patch` on top of these settings and re-normalize.
    pub fn merged(&self, patch: &SettingsPatch) -> ExtensionSettings {
        let pinned_hosts = match &patch.pinned_hosts {
            Some(hosts) => normalize_hosts(hosts),
            None => normalize_hosts(&self.pinned_hosts),
        };

        let auto_open = patch
            .side_panel
            .as_ref()
            .and_then(|panel| panel.auto_open)
            .unwrap_or(self.side_panel.auto_open);

        let mut next = self.clone();
        next.theme = patch.theme.unwrap_or(self.theme);
        next.pinned_hosts = pinned_hosts;
        next.side_panel.auto_open = auto_open;
        next
    }
}

/// Merge a fragment onto the static defaults. Total: never fails.
pub fn merge(patch: Option<&SettingsPatch>) -> ExtensionSettings {
    let defaults = ExtensionSettings::default();
    match patch {
        Some(patch) => defaults.merged(patch),
        None => defaults,
    }
}

/// Merge a raw stored value (possibly absent or malformed) onto the defaults.
pub fn merge_value(value: Option<&Value>) -> ExtensionSettings {
    match value {
        Some(value) => merge(Some(&SettingsPatch::from_value(value))),
        None => merge(None),
    }
}

/// Lowercase, trim and de-duplicate hosts, keeping first-seen order
pub fn normalize_hosts<S: AsRef<str>>(hosts: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .iter()
        .map(|host| host.as_ref().trim().to_lowercase())
        .filter(|host| !host.is_empty())
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hosts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_none_is_defaults() {
        assert_eq!(merge(None), ExtensionSettings::default());
        assert_eq!(merge(Some(&SettingsPatch::default())), ExtensionSettings::default());
    }

    #[test]
    fn test_merge_keeps_unspecified_fields() {
        let merged = merge(Some(&SettingsPatch::theme(ThemePreference::Dark)));

        assert_eq!(merged.theme, ThemePreference::Dark);
        assert!(merged.pinned_hosts.is_empty());
        assert!(merged.side_panel.auto_open);
    }

    #[test]
    fn test_merge_lowercases_and_dedupes_hosts() {
        let patch = SettingsPatch::pinned_hosts(hosts(&[
            "Example.COM",
            "example.com",
            "foo.zh30.github.io",
            "EXAMPLE.com",
        ]));

        let merged = merge(Some(&patch));

        assert_eq!(merged.pinned_hosts, hosts(&["example.com", "foo.zh30.github.io"]));
    }

    #[test]
    fn test_merge_drops_blank_hosts() {
        let merged = merge(Some(&SettingsPatch::pinned_hosts(hosts(&["  ", " a.dev "]))));
        assert_eq!(merged.pinned_hosts, hosts(&["a.dev"]));
    }

    #[test]
    fn test_merge_side_panel_is_deep() {
        let base = ExtensionSettings {
            theme: ThemePreference::Light,
            pinned_hosts: hosts(&["a.dev"]),
            ..Default::default()
        };

        let merged = base.merged(&SettingsPatch::side_panel_auto_open(false));

        assert_eq!(merged.theme, ThemePreference::Light);
        assert_eq!(merged.pinned_hosts, hosts(&["a.dev"]));
        assert!(!merged.side_panel.auto_open);

        // An empty side panel object must not reset the stored flag
        let untouched = merged.merged(&SettingsPatch {
            side_panel: Some(SidePanelPatch::default()),
            ..Default::default()
        });
        assert!(!untouched.side_panel.auto_open);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let patches = vec![
            SettingsPatch::default(),
            SettingsPatch::theme(ThemePreference::Dark),
            SettingsPatch::pinned_hosts(hosts(&["B.dev", "b.dev", "a.dev"])),
            SettingsPatch::side_panel_auto_open(false),
        ];

        for patch in patches {
            let once = merge(Some(&patch));
            let twice = merge(Some(&SettingsPatch::from(once.clone())));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_from_value_reads_stored_record() {
        let value = json!({
            "theme": "dark",
            "pinnedHosts": ["Example.com", "foo.zh30.github.io"],
            "sidePanel": { "autoOpen": false }
        });

        let merged = merge_value(Some(&value));

        assert_eq!(merged.theme, ThemePreference::Dark);
        assert_eq!(merged.pinned_hosts, hosts(&["example.com", "foo.zh30.github.io"]));
        assert!(!merged.side_panel.auto_open);
    }

    #[test]
    fn test_from_value_malformed_degrades_to_defaults() {
        assert_eq!(merge_value(Some(&json!("garbage"))), ExtensionSettings::default());
        assert_eq!(merge_value(Some(&json!(null))), ExtensionSettings::default());
        assert_eq!(merge_value(None), ExtensionSettings::default());

        let partial = json!({
            "theme": 42,
            "pinnedHosts": ["ok.dev", 7, null],
            "sidePanel": "yes"
        });
        let merged = merge_value(Some(&partial));

        assert_eq!(merged.theme, ThemePreference::System);
        assert_eq!(merged.pinned_hosts, hosts(&["ok.dev"]));
        assert!(merged.side_panel.auto_open);
    }

    #[test]
    fn test_patch_serialization_omits_unset_fields() {
        let json = serde_json::to_value(SettingsPatch::theme(ThemePreference::Dark)).unwrap();
        assert_eq!(json, json!({ "theme": "dark" }));
    }
}
