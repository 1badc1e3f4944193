/// JS-facing handles that wire the store, relay and chrome events together per context
use crate::background::{Background, InstallReason};
use crate::chrome::{
    self, ChromeChangeSource, ChromeHost, ChromeStorageArea, ChromeTransport, js_error_message, to_js,
};
use crate::config::{EXTENSION_CONFIG, ThemePreference};
use crate::host;
use crate::match_pattern::ContentScriptMatcher;
use crate::notifier::Subscription;
use crate::relay::{self, MessageRouter, OpenSidePanel, OpenSidePanelResponse, TabInfo};
use crate::storage::SettingsGateway;
use crate::store::ExtensionStore;
use serde::Deserialize;
use std::fmt::Display;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

type ChromeStore = ExtensionStore<ChromeStorageArea>;

fn js_error(error: impl Display) -> JsValue {
    JsValue::from(js_sys::Error::new(&error.to_string()))
}

fn chrome_store() -> ChromeStore {
    ExtensionStore::new(SettingsGateway::new(ChromeStorageArea::preferred()))
}

fn hydrate_in_background(store: &ChromeStore) {
    let store = store.clone();
    spawn_local(async move {
        if let Err(e) = store.ensure_hydrated().await {
            log::error!("Failed to load settings: {}", e);
        }
    });
}

#[derive(Debug, Default, Deserialize)]
struct InstalledDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TabChangeInfo {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveInfo {
    tab_id: i32,
}

/// The background service worker's wiring. Dropping or disposing it detaches every listener.
#[wasm_bindgen]
pub struct BackgroundContext {
    background: Rc<Background<ChromeStorageArea, ChromeHost>>,
    router: Rc<MessageRouter>,
    subscriptions: Vec<Subscription>,
}

impl BackgroundContext {
    pub fn start() -> BackgroundContext {
        let store = chrome_store();
        let mut subscriptions = vec![store.sync_with(ChromeChangeSource::available())];
        hydrate_in_background(&store);

        let background = Background::new(store, ChromeHost);
        let router = MessageRouter::new();
        subscriptions.extend(background.install_relay(&router));
        subscriptions.push(chrome::listen_for_messages(Rc::clone(&router)));

        let on_installed = Rc::clone(&background);
        subscriptions.push(chrome::add_listener(
            "runtime.onInstalled",
            Closure::wrap(Box::new(move |details: JsValue| {
                let details: InstalledDetails = serde_wasm_bindgen::from_value(details).unwrap_or_default();
                let Some(reason) = details.reason.as_deref().and_then(InstallReason::parse) else {
                    log::warn!("Unknown install reason: {:?}", details.reason);
                    return;
                };
                let background = Rc::clone(&on_installed);
                spawn_local(async move {
                    if let Err(e) = background.on_installed(reason).await {
                        log::error!("Failed to initialize settings on {:?}: {}", reason, e);
                    }
                });
            }) as Box<dyn Fn(JsValue)>),
        ));

        let on_updated = Rc::clone(&background);
        subscriptions.push(chrome::add_listener(
            "tabs.onUpdated",
            Closure::wrap(Box::new(move |tab_id: i32, change: JsValue, tab: JsValue| {
                let change: TabChangeInfo = serde_wasm_bindgen::from_value(change).unwrap_or_default();
                let tab: TabInfo = serde_wasm_bindgen::from_value(tab).unwrap_or_default();
                let url = change.url.or(tab.url);
                let background = Rc::clone(&on_updated);
                spawn_local(async move {
                    background
                        .on_tab_updated(tab_id, change.status.as_deref(), url.as_deref())
                        .await;
                });
            }) as Box<dyn Fn(i32, JsValue, JsValue)>),
        ));

        let on_activated = Rc::clone(&background);
        subscriptions.push(chrome::add_listener(
            "tabs.onActivated",
            Closure::wrap(Box::new(move |info: JsValue| {
                match serde_wasm_bindgen::from_value::<ActiveInfo>(info) {
                    Ok(info) => {
                        let background = Rc::clone(&on_activated);
                        spawn_local(async move { background.on_tab_activated(info.tab_id).await });
                    }
                    Err(e) => log::warn!("Unreadable tabs.onActivated payload: {:?}", e),
                }
            }) as Box<dyn Fn(JsValue)>),
        ));

        let on_clicked = Rc::clone(&background);
        subscriptions.push(chrome::add_listener(
            "action.onClicked",
            Closure::wrap(Box::new(move |tab: JsValue| {
                let tab: TabInfo = serde_wasm_bindgen::from_value(tab).unwrap_or_default();
                let background = Rc::clone(&on_clicked);
                spawn_local(async move { background.on_action_clicked(&tab).await });
            }) as Box<dyn Fn(JsValue)>),
        ));

        log::info!("Background context started");
        BackgroundContext {
            background,
            router,
            subscriptions,
        }
    }
}

#[wasm_bindgen]
impl BackgroundContext {
    /// Current settings as a plain object
    pub fn settings(&self) -> Result<JsValue, JsValue> {
        to_js(&self.background.store().settings()).map_err(js_error)
    }

    #[wasm_bindgen(js_name = listenerCount)]
    pub fn listener_count(&self) -> usize {
        self.subscriptions.iter().filter(|s| s.is_active()).count()
    }

    #[wasm_bindgen(js_name = handlesRelay)]
    pub fn handles_relay(&self, kind: &str) -> bool {
        relay::MessageKind::parse(kind).is_some_and(|kind| self.router.handles(kind))
    }

    pub fn dispose(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        log::info!("Background context disposed");
    }
}

#[wasm_bindgen]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Popup,
    SidePanel,
    Options,
    Content,
}

/// Settings access for a popup, side panel, options page or content script
#[wasm_bindgen]
pub struct ExtensionContext {
    kind: ContextKind,
    store: ChromeStore,
    transport: ChromeTransport,
    subscriptions: Vec<Subscription>,
}

impl ExtensionContext {
    pub fn start(kind: ContextKind) -> ExtensionContext {
        let store = chrome_store();
        let subscriptions = vec![store.sync_with(ChromeChangeSource::available())];
        hydrate_in_background(&store);

        log::debug!("{:?} context started", kind);
        ExtensionContext {
            kind,
            store,
            transport: ChromeTransport::new(EXTENSION_CONFIG.relay_timeout_ms),
            subscriptions,
        }
    }

    /// Start a content-script context only on pages the manifest targets
    pub fn start_content_script(href: Option<&str>) -> Option<ExtensionContext> {
        let matcher = match ContentScriptMatcher::from_config(&EXTENSION_CONFIG.content_script) {
            Ok(matcher) => matcher,
            Err(e) => {
                log::error!("Invalid content script match pattern: {}", e);
                return None;
            }
        };

        let href = href.map(str::to_string).or_else(chrome::current_href)?;
        if !matcher.matches(&href) {
            log::debug!("Content script skipped for {}", href);
            return None;
        }
        Some(ExtensionContext::start(ContextKind::Content))
    }

    pub fn store(&self) -> &ChromeStore {
        &self.store
    }
}

#[wasm_bindgen]
impl ExtensionContext {
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn status(&self) -> String {
        self.store.status().as_str().to_string()
    }

    pub fn settings(&self) -> Result<JsValue, JsValue> {
        to_js(&self.store.settings()).map_err(js_error)
    }

    pub fn manifest(&self) -> Result<JsValue, JsValue> {
        to_js(&chrome::read_manifest()).map_err(js_error)
    }

    pub fn hydrate(&self) -> js_sys::Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            store.ensure_hydrated().await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = setTheme)]
    pub fn set_theme(&self, theme: &str) -> js_sys::Promise {
        let store = self.store.clone();
        let theme = ThemePreference::parse(theme).ok_or_else(|| format!("unknown theme: {}", theme));
        future_to_promise(async move {
            let theme = theme.map_err(js_error)?;
            store.set_theme(theme).await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Resolves `false` when `input` is not a usable host
    #[wasm_bindgen(js_name = togglePinnedHost)]
    pub fn toggle_pinned_host(&self, input: &str) -> js_sys::Promise {
        let store = self.store.clone();
        let host = host::normalize_host(input);
        future_to_promise(async move {
            let Some(host) = host else {
                return Ok(JsValue::FALSE);
            };
            store.toggle_pinned_host(&host).await.map_err(js_error)?;
            Ok(JsValue::TRUE)
        })
    }

    #[wasm_bindgen(js_name = setSidePanelAutoOpen)]
    pub fn set_side_panel_auto_open(&self, auto_open: bool) -> js_sys::Promise {
        let store = self.store.clone();
        future_to_promise(async move {
            store.set_side_panel_auto_open(auto_open).await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = isSidePanelTarget)]
    pub fn is_side_panel_target(&self, url: &str) -> bool {
        host::side_panel_plan(Some(url), &self.store.settings()).options.enabled
    }

    /// Ask the background to open the side panel for the sending tab
    #[wasm_bindgen(js_name = openSidePanel)]
    pub fn open_side_panel(&self) -> js_sys::Promise {
        let transport = self.transport;
        future_to_promise(async move {
            let response = relay::send(&transport, OpenSidePanel)
                .await
                .map_err(js_error)?
                .unwrap_or_else(|| OpenSidePanelResponse {
                    ok: false,
                    error: Some("no background handler answered".to_string()),
                });
            to_js(&response).map_err(js_error)
        })
    }

    /// Call `callback(settings, status)` on every store change
    #[wasm_bindgen(js_name = onChange)]
    pub fn on_change(&mut self, callback: js_sys::Function) {
        let subscription = self.store.watch(move |snapshot| {
            let result = to_js(&snapshot.settings)
                .map_err(js_error)
                .and_then(|settings| {
                    callback.call2(&JsValue::NULL, &settings, &JsValue::from_str(snapshot.status.as_str()))
                });
            if let Err(e) = result {
                log::error!("Settings change callback failed: {}", js_error_message(&e));
            }
        });
        self.subscriptions.push(subscription);
    }

    pub fn dispose(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        log::debug!("{:?} context disposed", self.kind);
    }
}
