//! In-memory stand-ins for chrome.* used by unit tests
use crate::background::{BrowserHost, HostError};
use crate::host::SidePanelOptions;
use crate::notifier::{ChangeEvent, ChangeListener, ChangeSource, ListenerId, ListenerRegistry, StorageChange};
use crate::relay::{Dispatch, MessageRouter, MessageSender, MessageTarget, MessageTransport, RelayError, TabInfo};
use crate::storage::{AreaName, StorageArea, StorageError};
use futures::channel::oneshot;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

struct AreaState {
    name: AreaName,
    values: RefCell<HashMap<String, Value>>,
    listeners: ListenerRegistry<dyn Fn(&ChangeEvent)>,
    read_failure: RefCell<Option<String>>,
    write_failure: RefCell<Option<String>>,
    held_reads: RefCell<Option<Vec<oneshot::Sender<()>>>>,
    reads: Cell<usize>,
    writes: Cell<usize>,
}

/// A storage partition that emits change events on write, like chrome.storage
#[derive(Clone)]
pub struct MemoryArea {
    state: Rc<AreaState>,
}

impl MemoryArea {
    pub fn new(name: AreaName) -> Self {
        MemoryArea {
            state: Rc::new(AreaState {
                name,
                values: RefCell::new(HashMap::new()),
                listeners: ListenerRegistry::new(),
                read_failure: RefCell::new(None),
                write_failure: RefCell::new(None),
                held_reads: RefCell::new(None),
                reads: Cell::new(0),
                writes: Cell::new(0),
            }),
        }
    }

    /// Seed a value without emitting a change event
    pub fn insert(&self, key: &str, value: Value) {
        self.state.values.borrow_mut().insert(key.to_string(), value);
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.state.values.borrow().get(key).cloned()
    }

    pub fn fail_reads(&self, message: &str) {
        *self.state.read_failure.borrow_mut() = Some(message.to_string());
    }

    pub fn restore_reads(&self) {
        self.state.read_failure.borrow_mut().take();
    }

    pub fn fail_writes(&self, message: &str) {
        *self.state.write_failure.borrow_mut() = Some(message.to_string());
    }

    pub fn restore_writes(&self) {
        self.state.write_failure.borrow_mut().take();
    }

    /// Park reads until `release_reads` is called. A parked read still
    /// returns the value stored when it was issued.
    pub fn hold_reads(&self) {
        *self.state.held_reads.borrow_mut() = Some(Vec::new());
    }

    pub fn release_reads(&self) {
        let held = self.state.held_reads.borrow_mut().take().unwrap_or_default();
        for sender in held {
            let _ = sender.send(());
        }
    }

    pub fn read_count(&self) -> usize {
        self.state.reads.get()
    }

    pub fn write_count(&self) -> usize {
        self.state.writes.get()
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.len()
    }

    pub fn emit(&self, event: &ChangeEvent) {
        self.state.listeners.emit(event);
    }

    fn emit_change(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        let mut changes = HashMap::new();
        changes.insert(key.to_string(), StorageChange { old_value, new_value });
        self.emit(&ChangeEvent::new(self.state.name.as_str(), changes));
    }

    fn backend_error(&self, operation: &'static str, message: String) -> StorageError {
        StorageError::Backend {
            area: self.state.name,
            operation,
            message,
        }
    }
}

impl StorageArea for MemoryArea {
    fn name(&self) -> AreaName {
        self.state.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.state.reads.set(self.state.reads.get() + 1);
        let snapshot = self.value(key);

        let gate = self.state.held_reads.borrow_mut().as_mut().map(|held| {
            let (sender, receiver) = oneshot::channel();
            held.push(sender);
            receiver
        });
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(message) = self.state.read_failure.borrow().clone() {
            return Err(self.backend_error("get", message));
        }
        Ok(snapshot)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        if let Some(message) = self.state.write_failure.borrow().clone() {
            return Err(self.backend_error("set", message));
        }

        self.state.writes.set(self.state.writes.get() + 1);
        let old = self.state.values.borrow_mut().insert(key.to_string(), value.clone());
        self.emit_change(key, old, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if let Some(message) = self.state.write_failure.borrow().clone() {
            return Err(self.backend_error("remove", message));
        }

        let old = self.state.values.borrow_mut().remove(key);
        if old.is_some() {
            self.emit_change(key, old, None);
        }
        Ok(())
    }
}

impl ChangeSource for MemoryArea {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        self.state.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state.listeners.remove(id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SetOptions(i32, SidePanelOptions),
    Open(i32),
    GetTab(i32),
    Notify(String, String),
}

/// Records every browser API call and answers from canned data
#[derive(Default)]
pub struct RecordingHost {
    pub calls: RefCell<Vec<HostCall>>,
    pub tabs: RefCell<HashMap<i32, TabInfo>>,
    pub fail_open: Cell<bool>,
}

impl RecordingHost {
    pub fn with_tab(self, id: i32, url: &str) -> Self {
        self.tabs.borrow_mut().insert(
            id,
            TabInfo {
                id: Some(id),
                url: Some(url.to_string()),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.borrow().clone()
    }
}

impl BrowserHost for RecordingHost {
    async fn set_side_panel_options(&self, tab_id: i32, options: &SidePanelOptions) -> Result<(), HostError> {
        self.calls.borrow_mut().push(HostCall::SetOptions(tab_id, options.clone()));
        Ok(())
    }

    async fn open_side_panel(&self, tab_id: i32) -> Result<(), HostError> {
        self.calls.borrow_mut().push(HostCall::Open(tab_id));
        if self.fail_open.get() {
            return Err(HostError::Api {
                api: "sidePanel.open",
                message: "No active side panel for tabId".to_string(),
            });
        }
        Ok(())
    }

    async fn get_tab(&self, tab_id: i32) -> Result<TabInfo, HostError> {
        self.calls.borrow_mut().push(HostCall::GetTab(tab_id));
        self.tabs.borrow().get(&tab_id).cloned().ok_or(HostError::Api {
            api: "tabs.get",
            message: format!("No tab with id: {}", tab_id),
        })
    }

    async fn show_notification(&self, title: &str, message: &str) -> Result<(), HostError> {
        self.calls
            .borrow_mut()
            .push(HostCall::Notify(title.to_string(), message.to_string()));
        Ok(())
    }
}

/// Delivers envelopes straight into a router, as if sent from one fixed sender
pub struct LoopbackTransport {
    router: Rc<MessageRouter>,
    sender: MessageSender,
}

impl LoopbackTransport {
    pub fn from_tab(router: &Rc<MessageRouter>, tab_id: i32, url: &str) -> Self {
        LoopbackTransport {
            router: Rc::clone(router),
            sender: MessageSender {
                tab: Some(TabInfo {
                    id: Some(tab_id),
                    url: Some(url.to_string()),
                }),
                frame_id: Some(0),
                url: Some(url.to_string()),
            },
        }
    }

    /// A sender with no tab, like the popup or options page
    pub fn from_extension_page(router: &Rc<MessageRouter>) -> Self {
        LoopbackTransport {
            router: Rc::clone(router),
            sender: MessageSender::default(),
        }
    }
}

impl MessageTransport for LoopbackTransport {
    async fn send(&self, _target: MessageTarget, envelope: Value) -> Result<Option<Value>, RelayError> {
        match self.router.dispatch(&envelope, self.sender.clone()) {
            Dispatch::Handled(reply) => Ok(Some(reply.resolve().await)),
            Dispatch::NotHandled => Ok(None),
        }
    }
}
