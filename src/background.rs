/// Background service worker orchestration: side-panel gating and relay handlers
use crate::host::{SidePanelOptions, SidePanelPlan, side_panel_plan};
use crate::notifier::Subscription;
use crate::relay::{
    Ack, MessageKind, MessageRouter, MessageSender, Notification, OpenSidePanelResponse, Reply, Request,
    TabInfo,
};
use crate::storage::{StorageArea, StorageError};
use crate::store::ExtensionStore;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("chrome.{api} failed: {message}")]
    Api { api: &'static str, message: String },
    #[error("chrome.{0} is not available in this context")]
    Unavailable(&'static str),
}

/// Privileged browser APIs only the background context may call
#[allow(async_fn_in_trait)]
pub trait BrowserHost {
    async fn set_side_panel_options(&self, tab_id: i32, options: &SidePanelOptions) -> Result<(), HostError>;
    async fn open_side_panel(&self, tab_id: i32) -> Result<(), HostError>;
    async fn get_tab(&self, tab_id: i32) -> Result<TabInfo, HostError>;
    async fn show_notification(&self, title: &str, message: &str) -> Result<(), HostError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
    ChromeUpdate,
    SharedModuleUpdate,
}

impl InstallReason {
    pub fn parse(reason: &str) -> Option<InstallReason> {
        match reason {
            "install" => Some(InstallReason::Install),
            "update" => Some(InstallReason::Update),
            "chrome_update" => Some(InstallReason::ChromeUpdate),
            "shared_module_update" => Some(InstallReason::SharedModuleUpdate),
            _ => None,
        }
    }
}

pub struct Background<A, H> {
    store: ExtensionStore<A>,
    host: H,
}

impl<A, H> Background<A, H>
where
    A: StorageArea + 'static,
    H: BrowserHost + 'static,
{
    pub fn new(store: ExtensionStore<A>, host: H) -> Rc<Self> {
        Rc::new(Background { store, host })
    }

    pub fn store(&self) -> &ExtensionStore<A> {
        &self.store
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Fresh installs get the defaults written out; anything else reloads.
    pub async fn on_installed(&self, reason: InstallReason) -> Result<(), StorageError> {
        match reason {
            InstallReason::Install => {
                log::info!("Extension installed; writing default settings");
                self.store.reset_to_defaults().await
            }
            _ => self.store.reload().await,
        }
    }

    pub async fn on_tab_updated(&self, tab_id: i32, status: Option<&str>, url: Option<&str>) {
        if status != Some("complete") {
            return;
        }
        self.sync_side_panel(tab_id, url).await;
    }

    pub async fn on_tab_activated(&self, tab_id: i32) {
        match self.host.get_tab(tab_id).await {
            Ok(tab) => {
                self.sync_side_panel(tab_id, tab.url.as_deref()).await;
            }
            Err(e) => log::error!("Failed to sync side panel on activation: {}", e),
        }
    }

    pub async fn on_action_clicked(&self, tab: &TabInfo) {
        let Some(tab_id) = tab.id else {
            return;
        };
        self.sync_side_panel(tab_id, tab.url.as_deref()).await;
        self.open_side_panel(tab_id).await;
    }

    /// Apply the side-panel plan for `tab_id`, opening the panel when it auto-opens
    pub async fn sync_side_panel(&self, tab_id: i32, url: Option<&str>) -> SidePanelPlan {
        if let Err(e) = self.store.ensure_hydrated().await {
            log::warn!("Using cached settings for tab {}: {}", tab_id, e);
        }

        let plan = side_panel_plan(url, &self.store.settings());
        log::debug!(
            "Side panel for tab {} ({:?}): enabled={}",
            tab_id,
            plan.hostname,
            plan.options.enabled
        );

        if let Err(e) = self.host.set_side_panel_options(tab_id, &plan.options).await {
            log::error!("Failed to update side panel options: {}", e);
            return plan;
        }

        if plan.auto_open {
            self.open_side_panel(tab_id).await;
        }
        plan
    }

    pub async fn open_side_panel(&self, tab_id: i32) -> OpenSidePanelResponse {
        match self.host.open_side_panel(tab_id).await {
            Ok(()) => OpenSidePanelResponse { ok: true, error: None },
            Err(e) => {
                log::error!("Failed to open side panel: {}", e);
                OpenSidePanelResponse {
                    ok: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Every request kind is answered here; adding a kind without a branch fails to compile.
    pub fn handle_request(self: &Rc<Self>, request: Request, sender: MessageSender) -> Reply {
        let background = Rc::clone(self);
        match request {
            Request::OpenSidePanel => Reply::pending(async move {
                match sender.tab_id() {
                    Some(tab_id) => background.open_side_panel(tab_id).await,
                    None => OpenSidePanelResponse {
                        ok: false,
                        error: Some("message did not come from a tab".to_string()),
                    },
                }
            }),
            Request::GetTabInfo => Reply::ready(&sender.tab.unwrap_or_default()),
            Request::SyncSettings => Reply::pending(async move {
                match background.store.reload().await {
                    Ok(()) => Ack::done(),
                    Err(e) => {
                        log::error!("Failed to reload settings on request: {}", e);
                        Ack::failed(e)
                    }
                }
            }),
            Request::ShowNotification(Notification { title, message }) => Reply::pending(async move {
                match background.host.show_notification(&title, &message).await {
                    Ok(()) => Ack::done(),
                    Err(e) => {
                        log::error!("Failed to show notification: {}", e);
                        Ack::failed(e)
                    }
                }
            }),
        }
    }

    /// Register a handler for every message kind on `router`
    pub fn install_relay(self: &Rc<Self>, router: &Rc<MessageRouter>) -> Vec<Subscription> {
        MessageKind::ALL
            .into_iter()
            .map(|kind| {
                let background = Rc::clone(self);
                router.register_raw(kind, move |request, sender| {
                    background.handle_request(request, sender)
                })
            })
            .collect()
    }
}
