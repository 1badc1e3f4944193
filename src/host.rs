/// Hostname parsing and the side-panel host policy
use crate::config::{EXTENSION_CONFIG, ExtensionSettings};
use serde::Serialize;
use url::Url;

/// Extract the lowercase hostname from a full URL.
///
/// Unparseable input and URLs without a host (e.g. `about:blank`) yield `None`.
pub fn hostname_from_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    match Url::parse(href) {
        Ok(url) => url
            .host_str()
            .filter(|host| !host.is_empty())
            .map(str::to_lowercase),
        Err(e) => {
            log::warn!("Unable to parse URL {:?}: {}", href, e);
            None
        }
    }
}

/// Turn user input such as `Example.COM`, `example.com/path` or
/// `https://example.com:8080` into a bare lowercase hostname.
pub fn normalize_host(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let host = hostname_from_url(&candidate);
    if host.is_none() {
        log::warn!("Invalid host input: {:?}", input);
    }
    host
}

/// True if `hostname` equals a bundled host or is a subdomain of one
pub fn is_host_allowed(hostname: &str) -> bool {
    is_host_allowed_in(hostname, EXTENSION_CONFIG.allowed_hosts)
}

pub fn is_host_allowed_in(hostname: &str, allowed_hosts: &[&str]) -> bool {
    let hostname = hostname.to_lowercase();
    allowed_hosts.iter().any(|allowed| {
        hostname == *allowed
            || hostname
                .strip_suffix(allowed)
                .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
    })
}

/// The single gate for showing/enabling the side panel on a host.
///
/// Bundled hosts always qualify; pinned hosts only while auto-open is on.
pub fn is_side_panel_activation_target(hostname: &str, settings: &ExtensionSettings) -> bool {
    if is_host_allowed(hostname) {
        return true;
    }

    let hostname = hostname.to_lowercase();
    settings.side_panel.auto_open && settings.pinned_hosts.iter().any(|host| *host == hostname)
}

/// Inputs for `chrome.sidePanel.setOptions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidePanelOptions {
    pub path: String,
    pub enabled: bool,
}

/// What the background should do with a tab's side panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidePanelPlan {
    pub hostname: Option<String>,
    pub options: SidePanelOptions,
    pub auto_open: bool,
}

pub fn side_panel_plan(url: Option<&str>, settings: &ExtensionSettings) -> SidePanelPlan {
    let hostname = url.and_then(hostname_from_url);
    let enabled = hostname
        .as_deref()
        .is_some_and(|host| is_side_panel_activation_target(host, settings));

    SidePanelPlan {
        hostname,
        options: SidePanelOptions {
            path: EXTENSION_CONFIG.side_panel_asset_path.to_string(),
            enabled,
        },
        auto_open: enabled && settings.side_panel.auto_open,
    }
}
