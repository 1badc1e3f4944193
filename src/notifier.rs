/// Storage change events and settings subscriptions
use crate::config::{ExtensionSettings, SETTINGS_STORAGE_KEY};
use crate::settings::merge_value;
use crate::storage::AreaName;
use serde::Deserialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
}

/// One `chrome.storage.onChanged` callback: changed keys plus the partition name
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub changes: HashMap<String, StorageChange>,
    pub area_name: String,
}

impl ChangeEvent {
    pub fn new(area_name: &str, changes: HashMap<String, StorageChange>) -> Self {
        ChangeEvent {
            changes,
            area_name: area_name.to_string(),
        }
    }

    /// The normalized settings carried by this event, if it concerns the settings record.
    ///
    /// A removed key (no `newValue`) yields defaults.
    pub fn settings(&self) -> Option<ExtensionSettings> {
        let area = AreaName::parse(&self.area_name)?;
        if !area.carries_settings() {
            return None;
        }

        let change = self.changes.get(SETTINGS_STORAGE_KEY)?;
        Some(merge_value(change.new_value.as_ref()))
    }
}

pub type ChangeListener = Rc<dyn Fn(&ChangeEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A source of storage change events
pub trait ChangeSource {
    fn add_listener(&self, listener: ChangeListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Ordered listener list; listeners fire in registration order
pub struct ListenerRegistry<L: ?Sized> {
    listeners: RefCell<Vec<(ListenerId, Rc<L>)>>,
    next_id: Cell<u64>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        ListenerRegistry {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn add(&self, listener: Rc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(current, _)| *current != id);
        listeners.len() < before
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Copy of the current listeners, so callbacks may add/remove while being invoked
    pub fn snapshot(&self) -> Vec<Rc<L>> {
        self.listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect()
    }
}

impl ListenerRegistry<dyn Fn(&ChangeEvent)> {
    pub fn emit(&self, event: &ChangeEvent) {
        for listener in self.snapshot() {
            listener(event);
        }
    }
}

/// Disposer for a listener or handler registration.
///
/// `unsubscribe` may be called any number of times; dropping the value
/// also unsubscribes.
pub struct Subscription {
    cancel: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Subscription {
            cancel: Cell::new(Some(Box::new(cancel))),
        }
    }

    pub fn noop() -> Self {
        Subscription {
            cancel: Cell::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        let cancel = self.cancel.take();
        let active = cancel.is_some();
        self.cancel.set(cancel);
        active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Invoke `callback` with normalized settings whenever the settings record changes.
///
/// With no change source (outside the extension) this is a no-op subscription.
pub fn subscribe<S>(
    source: Option<Rc<S>>,
    callback: impl Fn(ExtensionSettings) + 'static,
) -> Subscription
where
    S: ChangeSource + ?Sized + 'static,
{
    let Some(source) = source else {
        log::debug!("Storage change events unavailable; settings subscription is inert");
        return Subscription::noop();
    };

    let listener: ChangeListener = Rc::new(move |event: &ChangeEvent| {
        if let Some(settings) = event.settings() {
            callback(settings);
        }
    });

    let id = source.add_listener(listener);
    Subscription::new(move || source.remove_listener(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThemePreference;
    use crate::testing::MemoryArea;
    use serde_json::json;

    fn settings_event(area_name: &str, new_value: Option<Value>) -> ChangeEvent {
        let mut changes = HashMap::new();
        changes.insert(
            SETTINGS_STORAGE_KEY.to_string(),
            StorageChange {
                old_value: None,
                new_value,
            },
        );
        ChangeEvent::new(area_name, changes)
    }

    fn recorder() -> (Rc<RefCell<Vec<ExtensionSettings>>>, impl Fn(ExtensionSettings) + 'static) {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        (received, move |settings| sink.borrow_mut().push(settings))
    }

    #[test]
    fn test_listener_receives_merged_settings_once() {
        let area = Rc::new(MemoryArea::new(AreaName::Sync));
        let (received, callback) = recorder();
        let _subscription = subscribe(Some(Rc::clone(&area)), callback);

        let mut stored = serde_json::to_value(ExtensionSettings::default()).unwrap();
        stored["theme"] = json!("dark");
        area.emit(&settings_event("sync", Some(stored)));

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].theme, ThemePreference::Dark);
    }

    #[test]
    fn test_ignores_other_keys_and_areas() {
        let area = Rc::new(MemoryArea::new(AreaName::Sync));
        let (received, callback) = recorder();
        let _subscription = subscribe(Some(Rc::clone(&area)), callback);

        area.emit(&settings_event("managed", Some(json!({ "theme": "dark" }))));

        let mut other = HashMap::new();
        other.insert("unrelated".to_string(), StorageChange::default());
        area.emit(&ChangeEvent::new("sync", other));

        assert!(received.borrow().is_empty());
    }

    #[test]
    fn test_removed_key_yields_defaults() {
        let area = Rc::new(MemoryArea::new(AreaName::Local));
        let (received, callback) = recorder();
        let _subscription = subscribe(Some(Rc::clone(&area)), callback);

        area.emit(&settings_event("local", None));

        assert_eq!(*received.borrow(), vec![ExtensionSettings::default()]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let area = Rc::new(MemoryArea::new(AreaName::Sync));
        let (received, callback) = recorder();
        let subscription = subscribe(Some(Rc::clone(&area)), callback);

        assert_eq!(area.listener_count(), 1);
        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(area.listener_count(), 0);
        assert!(!subscription.is_active());

        area.emit(&settings_event("sync", Some(json!({ "theme": "dark" }))));
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let area = Rc::new(MemoryArea::new(AreaName::Sync));
        let (_, callback) = recorder();
        {
            let _subscription = subscribe(Some(Rc::clone(&area)), callback);
            assert_eq!(area.listener_count(), 1);
        }
        assert_eq!(area.listener_count(), 0);
    }

    #[test]
    fn test_subscribe_without_source_is_noop() {
        let (_, callback) = recorder();
        let subscription = subscribe::<MemoryArea>(None, callback);

        assert!(!subscription.is_active());
        subscription.unsubscribe();
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let area = Rc::new(MemoryArea::new(AreaName::Sync));
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&order);
        let _a = subscribe(Some(Rc::clone(&area)), move |_| first.borrow_mut().push("first"));
        let second = Rc::clone(&order);
        let _b = subscribe(Some(Rc::clone(&area)), move |_| second.borrow_mut().push("second"));

        area.emit(&settings_event("sync", Some(json!({}))));

        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_change_event_deserializes_chrome_shape() {
        let mut raw = serde_json::Map::new();
        raw.insert(
            SETTINGS_STORAGE_KEY.to_string(),
            json!({ "newValue": { "theme": "light" }, "oldValue": { "theme": "dark" } }),
        );
        let changes: HashMap<String, StorageChange> =
            serde_json::from_value(Value::Object(raw)).unwrap();

        let event = ChangeEvent::new("sync", changes);

        assert_eq!(event.settings().unwrap().theme, ThemePreference::Light);
    }
}
