/// Tiny Helmet - settings synchronization core for a Chrome MV3 extension
/// Built with Rust + WASM + Yew

pub mod background;
pub mod chrome;
pub mod config;
pub mod context;
pub mod host;
pub mod match_pattern;
pub mod notifier;
pub mod relay;
pub mod settings;
pub mod storage;
pub mod store;
pub mod theme;
pub mod ui;

#[cfg(test)]
mod testing;

pub use config::{EXTENSION_CONFIG, ExtensionSettings, ThemePreference};
pub use context::{BackgroundContext, ContextKind, ExtensionContext};
pub use settings::SettingsPatch;
pub use store::{ExtensionStore, StoreSnapshot, StoreStatus};

use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Entry point for the background service worker
#[wasm_bindgen]
pub fn start_background() -> BackgroundContext {
    BackgroundContext::start()
}

// Entry point for the popup, side panel and options page
#[wasm_bindgen]
pub fn start_context(kind: ContextKind) -> ExtensionContext {
    ExtensionContext::start(kind)
}

// Entry point for content scripts; `undefined` on pages outside the match patterns
#[wasm_bindgen]
pub fn start_content_script(href: Option<String>) -> Option<ExtensionContext> {
    ExtensionContext::start_content_script(href.as_deref())
}

// Re-export host policy for JavaScript access
#[wasm_bindgen]
pub fn is_host_allowed(hostname: &str) -> bool {
    host::is_host_allowed(hostname)
}

#[wasm_bindgen]
pub fn normalize_host(input: &str) -> Option<String> {
    host::normalize_host(input)
}

#[wasm_bindgen]
pub fn hostname_from_url(href: &str) -> Option<String> {
    host::hostname_from_url(href)
}
