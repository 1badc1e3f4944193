/// chrome.* bindings: storage partitions, change events, runtime messaging, side panel
use crate::background::{BrowserHost, HostError};
use crate::config::ManifestInfo;
use crate::host::SidePanelOptions;
use crate::notifier::{
    ChangeEvent, ChangeListener, ChangeSource, ListenerId, ListenerRegistry, StorageChange, Subscription,
};
use crate::relay::{
    Dispatch, MessageKind, MessageRouter, MessageSender, MessageTarget, MessageTransport, RelayError, Reply,
    TabInfo,
};
use crate::storage::{AreaName, StorageArea, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::closure::WasmClosure;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

// Import JS bridge functions
#[wasm_bindgen(module = "/js/chrome_bridge.js")]
extern "C" {
    fn hasStorageArea(area: &str) -> bool;

    fn hasChromeEvent(path: &str) -> bool;

    #[wasm_bindgen(catch)]
    async fn storageGet(area: &str, key: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn storageSet(area: &str, key: &str, value: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn storageRemove(area: &str, key: &str) -> Result<(), JsValue>;

    fn addChromeListener(path: &str, callback: &JsValue) -> bool;

    fn removeChromeListener(path: &str, callback: &JsValue);

    #[wasm_bindgen(catch)]
    async fn sendRuntimeMessage(tab_id: Option<i32>, envelope: JsValue, timeout_ms: u32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setSidePanelOptions(tab_id: i32, path: &str, enabled: bool) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn openSidePanel(tab_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn showNotification(title: &str, message: &str) -> Result<(), JsValue>;

    fn readManifest() -> JsValue;
}

const STORAGE_CHANGED: &str = "storage.onChanged";
const RUNTIME_MESSAGE: &str = "runtime.onMessage";

/// Plain-object encoding; the default serializer would produce JS `Map`s
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

/// `None` for `undefined`/`null` or values that are not JSON-shaped
pub fn from_js(value: JsValue) -> Option<Value> {
    if value.is_undefined() || value.is_null() {
        return None;
    }
    match serde_wasm_bindgen::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring non-JSON value from chrome API: {:?}", e);
            None
        }
    }
}

pub fn js_error_message(error: &JsValue) -> String {
    if let Some(message) = error.as_string() {
        return message;
    }
    match error.dyn_ref::<js_sys::Error>() {
        Some(error) => String::from(error.message()),
        None => format!("{:?}", error),
    }
}

/// Register `closure` on a chrome event (e.g. `tabs.onUpdated`); the subscription removes it.
pub fn add_listener<T>(path: &'static str, closure: Closure<T>) -> Subscription
where
    T: ?Sized + WasmClosure + 'static,
{
    if !addChromeListener(path, closure.as_ref()) {
        log::warn!("chrome.{} is not available in this context", path);
        return Subscription::noop();
    }

    Subscription::new(move || {
        removeChromeListener(path, closure.as_ref());
        drop(closure);
    })
}

/// A chrome.storage partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromeStorageArea {
    area: AreaName,
}

impl ChromeStorageArea {
    /// `storage.sync`, else `storage.local`, else `None` outside the extension
    pub fn preferred() -> Option<ChromeStorageArea> {
        let area = AreaName::PREFERRED
            .into_iter()
            .find(|area| hasStorageArea(area.as_str()))
            .map(|area| ChromeStorageArea { area });

        if area.is_none() {
            log::info!("chrome.storage unavailable; using default settings");
        }
        area
    }

    fn backend_error(&self, operation: &'static str, error: &JsValue) -> StorageError {
        StorageError::Backend {
            area: self.area,
            operation,
            message: js_error_message(error),
        }
    }
}

impl StorageArea for ChromeStorageArea {
    fn name(&self) -> AreaName {
        self.area
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let value = storageGet(self.area.as_str(), key)
            .await
            .map_err(|e| self.backend_error("get", &e))?;
        Ok(from_js(value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let value = to_js(&value).map_err(|e| StorageError::Encode(e.to_string()))?;
        storageSet(self.area.as_str(), key, value)
            .await
            .map_err(|e| self.backend_error("set", &e))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        storageRemove(self.area.as_str(), key)
            .await
            .map_err(|e| self.backend_error("remove", &e))
    }
}

/// Fans one `chrome.storage.onChanged` listener out to in-process listeners
pub struct ChromeChangeSource {
    listeners: Rc<ListenerRegistry<dyn Fn(&ChangeEvent)>>,
    attached: RefCell<Option<Closure<dyn Fn(JsValue, String)>>>,
}

impl ChromeChangeSource {
    pub fn available() -> Option<Rc<ChromeChangeSource>> {
        if !hasChromeEvent(STORAGE_CHANGED) {
            return None;
        }
        Some(Rc::new(ChromeChangeSource {
            listeners: Rc::new(ListenerRegistry::new()),
            attached: RefCell::new(None),
        }))
    }

    fn attach(&self) {
        let mut attached = self.attached.borrow_mut();
        if attached.is_some() {
            return;
        }

        let listeners = Rc::clone(&self.listeners);
        let callback = Closure::wrap(Box::new(move |changes: JsValue, area_name: String| {
            match serde_wasm_bindgen::from_value::<HashMap<String, StorageChange>>(changes) {
                Ok(changes) => listeners.emit(&ChangeEvent::new(&area_name, changes)),
                Err(e) => log::warn!("Unreadable storage change from {}: {:?}", area_name, e),
            }
        }) as Box<dyn Fn(JsValue, String)>);

        addChromeListener(STORAGE_CHANGED, callback.as_ref());
        *attached = Some(callback);
    }

    fn detach(&self) {
        if let Some(callback) = self.attached.borrow_mut().take() {
            removeChromeListener(STORAGE_CHANGED, callback.as_ref());
        }
    }
}

impl ChangeSource for ChromeChangeSource {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        self.attach();
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
        if self.listeners.is_empty() {
            self.detach();
        }
    }
}

impl Drop for ChromeChangeSource {
    fn drop(&mut self) {
        self.detach();
    }
}

#[derive(Debug, Deserialize)]
struct RelayOutcome {
    status: String,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// `chrome.runtime.sendMessage` / `chrome.tabs.sendMessage` with a bounded wait
#[derive(Debug, Clone, Copy)]
pub struct ChromeTransport {
    timeout_ms: u32,
}

impl ChromeTransport {
    pub fn new(timeout_ms: u32) -> Self {
        ChromeTransport { timeout_ms }
    }
}

impl MessageTransport for ChromeTransport {
    async fn send(&self, target: MessageTarget, envelope: Value) -> Result<Option<Value>, RelayError> {
        let kind = envelope
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::parse)
            .map(MessageKind::as_str)
            .unwrap_or("message");

        let message = to_js(&envelope).map_err(|e| RelayError::Encode(e.to_string()))?;
        let tab_id = match target {
            MessageTarget::Background => None,
            MessageTarget::Tab(id) => Some(id),
        };

        let outcome = sendRuntimeMessage(tab_id, message, self.timeout_ms)
            .await
            .map_err(|e| RelayError::Transport(js_error_message(&e)))?;
        let outcome: RelayOutcome =
            serde_wasm_bindgen::from_value(outcome).map_err(|e| RelayError::Transport(e.to_string()))?;

        match outcome.status.as_str() {
            "timeout" => {
                log::warn!("{} timed out after {} ms", kind, self.timeout_ms);
                Err(RelayError::Timeout {
                    kind,
                    after_ms: self.timeout_ms,
                })
            }
            "unhandled" => {
                log::debug!("{} unhandled: {}", kind, outcome.error.unwrap_or_default());
                Ok(None)
            }
            "error" => Err(RelayError::Transport(outcome.error.unwrap_or_default())),
            _ => Ok(outcome.response),
        }
    }
}

fn respond(send_response: &js_sys::Function, value: &Value) {
    let result = to_js(value)
        .map_err(|e| JsValue::from_str(&e.to_string()))
        .and_then(|value| send_response.call1(&JsValue::NULL, &value));
    if let Err(e) = result {
        log::error!("Failed to send relay response: {}", js_error_message(&e));
    }
}

/// Route `chrome.runtime.onMessage` into `router`.
///
/// Pending replies keep the channel open (the listener returns `true`)
/// until their future resolves.
pub fn listen_for_messages(router: Rc<MessageRouter>) -> Subscription {
    let closure = Closure::wrap(Box::new(
        move |message: JsValue, sender: JsValue, send_response: js_sys::Function| -> bool {
            let Some(envelope) = from_js(message) else {
                return false;
            };
            let sender: MessageSender = serde_wasm_bindgen::from_value(sender).unwrap_or_default();

            match router.dispatch(&envelope, sender) {
                Dispatch::NotHandled => false,
                Dispatch::Handled(Reply::Ready(value)) => {
                    respond(&send_response, &value);
                    false
                }
                Dispatch::Handled(Reply::Pending(future)) => {
                    spawn_local(async move {
                        let value = future.await;
                        respond(&send_response, &value);
                    });
                    true
                }
            }
        },
    ) as Box<dyn Fn(JsValue, JsValue, js_sys::Function) -> bool>);

    add_listener(RUNTIME_MESSAGE, closure)
}

/// Side panel, tabs and notifications APIs for the background worker
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeHost;

impl BrowserHost for ChromeHost {
    async fn set_side_panel_options(&self, tab_id: i32, options: &SidePanelOptions) -> Result<(), HostError> {
        setSidePanelOptions(tab_id, &options.path, options.enabled)
            .await
            .map_err(|e| HostError::Api {
                api: "sidePanel.setOptions",
                message: js_error_message(&e),
            })
    }

    async fn open_side_panel(&self, tab_id: i32) -> Result<(), HostError> {
        openSidePanel(tab_id).await.map_err(|e| HostError::Api {
            api: "sidePanel.open",
            message: js_error_message(&e),
        })
    }

    async fn get_tab(&self, tab_id: i32) -> Result<TabInfo, HostError> {
        let tab = getTab(tab_id).await.map_err(|e| HostError::Api {
            api: "tabs.get",
            message: js_error_message(&e),
        })?;
        serde_wasm_bindgen::from_value(tab).map_err(|e| HostError::Api {
            api: "tabs.get",
            message: e.to_string(),
        })
    }

    async fn show_notification(&self, title: &str, message: &str) -> Result<(), HostError> {
        if !hasChromeEvent("notifications.onClicked") {
            return Err(HostError::Unavailable("notifications"));
        }
        showNotification(title, message).await.map_err(|e| HostError::Api {
            api: "notifications.create",
            message: js_error_message(&e),
        })
    }
}

pub fn read_manifest() -> ManifestInfo {
    ManifestInfo::from_manifest(from_js(readManifest()).as_ref())
}

/// `location.href` of the page a content script runs in
pub fn current_href() -> Option<String> {
    web_sys::window()?.location().href().ok()
}
