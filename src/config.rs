/// Static extension configuration and the persisted settings shape
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EXTENSION_NAMESPACE: &str = "tiny-helmet";
pub const SETTINGS_STORAGE_KEY: &str = "tiny-helmet:settings";

/// User theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemePreference {
    /// Order used by the popup's theme toggle
    pub const CYCLE: [ThemePreference; 3] = [
        ThemePreference::System,
        ThemePreference::Light,
        ThemePreference::Dark,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
            ThemePreference::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<ThemePreference> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(ThemePreference::Light),
            "dark" => Some(ThemePreference::Dark),
            "system" => Some(ThemePreference::System),
            _ => None,
        }
    }

    pub fn next(self) -> ThemePreference {
        let index = Self::CYCLE.iter().position(|t| *t == self).unwrap_or(0);
        Self::CYCLE[(index + 1) % Self::CYCLE.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidePanelSettings {
    pub auto_open: bool,
}

impl Default for SidePanelSettings {
    fn default() -> Self {
        SidePanelSettings { auto_open: true }
    }
}

/// The single persisted settings record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    pub theme: ThemePreference,
    pub pinned_hosts: Vec<String>,
    pub side_panel: SidePanelSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAt {
    DocumentStart,
    DocumentEnd,
    DocumentIdle,
}

impl RunAt {
    pub fn as_str(self) -> &'static str {
        match self {
            RunAt::DocumentStart => "document_start",
            RunAt::DocumentEnd => "document_end",
            RunAt::DocumentIdle => "document_idle",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContentScriptConfig {
    pub matches: &'static [&'static str],
    pub run_at: RunAt,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtensionConfig {
    pub popup_asset_path: &'static str,
    pub side_panel_asset_path: &'static str,
    pub background_asset_path: &'static str,
    /// Bundled hosts, always eligible for the side panel
    pub allowed_hosts: &'static [&'static str],
    pub content_script: ContentScriptConfig,
    pub relay_timeout_ms: u32,
}

impl ExtensionConfig {
    pub fn default_settings(&self) -> ExtensionSettings {
        ExtensionSettings::default()
    }
}

pub const EXTENSION_CONFIG: ExtensionConfig = ExtensionConfig {
    popup_asset_path: "popup.html",
    side_panel_asset_path: "sidePanel.html",
    background_asset_path: "background.js",
    allowed_hosts: &["localhost", "zhanghe.dev"],
    content_script: ContentScriptConfig {
        matches: &["*://localhost/*", "*://*.zhanghe.dev/*"],
        run_at: RunAt::DocumentIdle,
    },
    relay_timeout_ms: 5_000,
};

/// Name/version/description shown by the UI surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl ManifestInfo {
    /// Build from the runtime manifest; missing fields fall back to local-build values.
    pub fn from_manifest(manifest: Option<&Value>) -> ManifestInfo {
        let Some(manifest) = manifest else {
            return ManifestInfo::local_build();
        };

        let field = |key: &str, fallback: &str| {
            manifest
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };

        ManifestInfo {
            name: field("name", "Tiny Helmet"),
            version: field("version", "0.0.0"),
            description: field("description", "Chrome extension scaffold"),
        }
    }

    pub fn local_build() -> ManifestInfo {
        ManifestInfo {
            name: "Tiny Helmet".to_string(),
            version: "0.0.0".to_string(),
            description: "Local development build".to_string(),
        }
    }
}
