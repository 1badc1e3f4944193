/// Per-context settings container: hydrate once, mutate optimistically, follow storage changes
use crate::config::{ExtensionSettings, ThemePreference};
use crate::notifier::{ChangeSource, ListenerRegistry, Subscription, subscribe};
use crate::settings::SettingsPatch;
use crate::storage::{SettingsGateway, StorageArea, StorageError};
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{LocalBoxFuture, Shared};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl StoreStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreStatus::Idle => "idle",
            StoreStatus::Loading => "loading",
            StoreStatus::Ready => "ready",
            StoreStatus::Error => "error",
        }
    }
}

/// What a UI surface renders from
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub status: StoreStatus,
    pub settings: ExtensionSettings,
    pub last_error: Option<StorageError>,
}

type PendingLoad = Shared<LocalBoxFuture<'static, Result<(), StorageError>>>;
type WriteTurn = Shared<LocalBoxFuture<'static, ()>>;
type Observer = dyn Fn(&StoreSnapshot);

struct StoreInner<A> {
    gateway: SettingsGateway<A>,
    status: Cell<StoreStatus>,
    settings: RefCell<ExtensionSettings>,
    last_error: RefCell<Option<StorageError>>,
    pending: RefCell<Option<PendingLoad>>,
    // Resolves once the most recently queued write has finished
    write_tail: RefCell<Option<WriteTurn>>,
    queued_writes: Cell<usize>,
    hydration_started: Cell<bool>,
    synced: Cell<bool>,
    observers: ListenerRegistry<Observer>,
}

impl<A> StoreInner<A> {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            status: self.status.get(),
            settings: self.settings.borrow().clone(),
            last_error: self.last_error.borrow().clone(),
        }
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        for observer in self.observers.snapshot() {
            observer(&snapshot);
        }
    }

    fn replace_settings(&self, settings: ExtensionSettings) {
        *self.settings.borrow_mut() = settings;
        self.notify();
    }
}

/// Settings state owned by one execution context.
///
/// Cloning yields another handle to the same state.
pub struct ExtensionStore<A> {
    inner: Rc<StoreInner<A>>,
}

impl<A> Clone for ExtensionStore<A> {
    fn clone(&self) -> Self {
        ExtensionStore {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A> PartialEq for ExtensionStore<A> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A: StorageArea + 'static> ExtensionStore<A> {
    pub fn new(gateway: SettingsGateway<A>) -> Self {
        ExtensionStore {
            inner: Rc::new(StoreInner {
                gateway,
                status: Cell::new(StoreStatus::Idle),
                settings: RefCell::new(ExtensionSettings::default()),
                last_error: RefCell::new(None),
                pending: RefCell::new(None),
                write_tail: RefCell::new(None),
                queued_writes: Cell::new(0),
                hydration_started: Cell::new(false),
                synced: Cell::new(false),
                observers: ListenerRegistry::new(),
            }),
        }
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.status.get()
    }

    pub fn settings(&self) -> ExtensionSettings {
        self.inner.settings.borrow().clone()
    }

    pub fn last_error(&self) -> Option<StorageError> {
        self.inner.last_error.borrow().clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot()
    }

    pub fn gateway(&self) -> &SettingsGateway<A> {
        &self.inner.gateway
    }

    /// Load settings once. Concurrent callers share the in-flight load;
    /// once ready this is a no-op. After an error a new call retries.
    pub async fn hydrate(&self) -> Result<(), StorageError> {
        if self.status() == StoreStatus::Ready {
            return Ok(());
        }
        self.pending_load().await
    }

    /// Hydrate at most once per context, even across independent callers.
    pub async fn ensure_hydrated(&self) -> Result<(), StorageError> {
        if self.inner.hydration_started.replace(true) {
            let pending = self.inner.pending.borrow().clone();
            return match pending {
                Some(pending) => pending.await,
                None => Ok(()),
            };
        }

        let result = self.hydrate().await;
        if self.status() != StoreStatus::Ready {
            self.inner.hydration_started.set(false);
        }
        result
    }

    /// Force a fresh load from storage, joining one that is already running.
    pub async fn reload(&self) -> Result<(), StorageError> {
        self.pending_load().await
    }

    fn pending_load(&self) -> PendingLoad {
        let mut slot = self.inner.pending.borrow_mut();
        if let Some(pending) = slot.as_ref() {
            return pending.clone();
        }

        self.inner.status.set(StoreStatus::Loading);
        let inner = Rc::clone(&self.inner);
        let pending = async move {
            let result = inner.gateway.load().await;
            inner.pending.borrow_mut().take();

            match result {
                Ok(settings) => {
                    inner.status.set(StoreStatus::Ready);
                    inner.last_error.borrow_mut().take();
                    inner.replace_settings(settings);
                    Ok(())
                }
                Err(e) => {
                    log::error!("Failed to hydrate extension settings: {}", e);
                    inner.status.set(StoreStatus::Error);
                    *inner.last_error.borrow_mut() = Some(e.clone());
                    inner.notify();
                    Err(e)
                }
            }
        }
        .boxed_local()
        .shared();

        *slot = Some(pending.clone());
        drop(slot);
        self.inner.notify();
        pending
    }

    pub async fn set_theme(&self, theme: ThemePreference) -> Result<(), StorageError> {
        self.apply_local(|settings| settings.theme = theme);
        self.persist(SettingsPatch::theme(theme)).await
    }

    /// Add `host` to the pinned hosts, or remove it if already pinned
    pub async fn toggle_pinned_host(&self, host: &str) -> Result<(), StorageError> {
        let host = host.trim().to_lowercase();
        if host.is_empty() {
            log::warn!("Ignoring toggle of an empty host");
            return Ok(());
        }

        let mut next_hosts = self.inner.settings.borrow().pinned_hosts.clone();
        match next_hosts.iter().position(|current| *current == host) {
            Some(index) => {
                next_hosts.remove(index);
            }
            None => next_hosts.push(host),
        }

        let hosts = next_hosts.clone();
        self.apply_local(move |settings| settings.pinned_hosts = hosts);
        self.persist(SettingsPatch::pinned_hosts(next_hosts)).await
    }

    pub async fn set_side_panel_auto_open(&self, auto_open: bool) -> Result<(), StorageError> {
        self.apply_local(|settings| settings.side_panel.auto_open = auto_open);
        self.persist(SettingsPatch::side_panel_auto_open(auto_open)).await
    }

    /// Overwrite the persisted record with defaults
    pub async fn reset_to_defaults(&self) -> Result<(), StorageError> {
        let defaults = ExtensionSettings::default();
        self.apply_local(|settings| *settings = defaults.clone());
        self.persist(SettingsPatch::from(defaults)).await
    }

    fn apply_local(&self, update: impl FnOnce(&mut ExtensionSettings)) {
        update(&mut self.inner.settings.borrow_mut());
        self.inner.notify();
    }

    /// Wait for every earlier write from this store, then run `save`.
    ///
    /// Writes reach the gateway strictly in call order, so each one merges
    /// onto what the previous one stored.
    async fn persist(&self, patch: SettingsPatch) -> Result<(), StorageError> {
        let (finished, turn) = oneshot::channel::<()>();
        let turn: WriteTurn = turn.map(|_| ()).boxed_local().shared();
        let previous = self.inner.write_tail.replace(Some(turn));
        self.inner.queued_writes.set(self.inner.queued_writes.get() + 1);

        if let Some(previous) = previous {
            previous.await;
        }
        let result = self.inner.gateway.save(&patch).await;
        let _ = finished.send(());

        let queued = self.inner.queued_writes.get() - 1;
        self.inner.queued_writes.set(queued);
        if queued == 0 {
            self.inner.write_tail.borrow_mut().take();
        }

        // The optimistic value stays on failure; the store moves to Error so the
        // next hydrate reloads what storage actually holds.
        match result {
            Ok(saved) => {
                self.inner.last_error.borrow_mut().take();
                if self.inner.status.get() == StoreStatus::Error {
                    self.inner.status.set(StoreStatus::Ready);
                    self.inner.hydration_started.set(true);
                }
                // Later queued writes already hold newer optimistic values
                if queued == 0 {
                    self.inner.replace_settings(saved);
                } else {
                    self.inner.notify();
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to persist settings change: {}", e);
                self.inner.status.set(StoreStatus::Error);
                self.inner.hydration_started.set(false);
                *self.inner.last_error.borrow_mut() = Some(e.clone());
                self.inner.notify();
                Err(e)
            }
        }
    }

    /// Follow storage change events from other contexts.
    ///
    /// One live sync per store; a second call while the first is active
    /// returns an inert subscription.
    pub fn sync_with<S>(&self, source: Option<Rc<S>>) -> Subscription
    where
        S: ChangeSource + ?Sized + 'static,
    {
        if self.inner.synced.replace(true) {
            log::warn!("Settings store is already following storage changes");
            return Subscription::noop();
        }

        let weak: Weak<StoreInner<A>> = Rc::downgrade(&self.inner);
        let listener = subscribe(source, move |settings| {
            if let Some(inner) = weak.upgrade() {
                inner.replace_settings(settings);
            }
        });

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            listener.unsubscribe();
            if let Some(inner) = weak.upgrade() {
                inner.synced.set(false);
            }
        })
    }

    /// Observe every state change (status, settings, errors)
    pub fn watch(&self, observer: impl Fn(&StoreSnapshot) + 'static) -> Subscription {
        let id = self.inner.observers.add(Rc::new(observer));
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.remove(id);
            }
        })
    }
}
