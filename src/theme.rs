/// Theme resolution shared by every rendering context
use crate::config::ThemePreference;

pub const DARK_QUERY: &str = "(prefers-color-scheme: dark)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTheme {
    Light,
    Dark,
}

impl ResolvedTheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvedTheme::Light => "light",
            ResolvedTheme::Dark => "dark",
        }
    }
}

pub fn resolve_theme(preference: ThemePreference, system_prefers_dark: bool) -> ResolvedTheme {
    match preference {
        ThemePreference::Light => ResolvedTheme::Light,
        ThemePreference::Dark => ResolvedTheme::Dark,
        ThemePreference::System if system_prefers_dark => ResolvedTheme::Dark,
        ThemePreference::System => ResolvedTheme::Light,
    }
}

/// Attribute values written onto the theme target element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeAttributes {
    pub preference: &'static str,
    pub resolved: ResolvedTheme,
}

impl ThemeAttributes {
    pub fn new(preference: ThemePreference, system_prefers_dark: bool) -> Self {
        ThemeAttributes {
            preference: preference.as_str(),
            resolved: resolve_theme(preference, system_prefers_dark),
        }
    }

    /// Only `system` needs to follow OS changes
    pub fn follows_system(&self) -> bool {
        self.preference == ThemePreference::System.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_explicit_preferences() {
        assert_eq!(resolve_theme(ThemePreference::Light, true), ResolvedTheme::Light);
        assert_eq!(resolve_theme(ThemePreference::Dark, false), ResolvedTheme::Dark);
    }

    #[test]
    fn test_resolve_system_preference() {
        assert_eq!(resolve_theme(ThemePreference::System, true), ResolvedTheme::Dark);
        assert_eq!(resolve_theme(ThemePreference::System, false), ResolvedTheme::Light);
    }

    #[test]
    fn test_theme_attributes() {
        let attributes = ThemeAttributes::new(ThemePreference::System, true);

        assert_eq!(attributes.preference, "system");
        assert_eq!(attributes.resolved.as_str(), "dark");
        assert!(attributes.follows_system());
        assert!(!ThemeAttributes::new(ThemePreference::Dark, true).follows_system());
    }
}
