/// Typed request/response messaging between contexts and the background worker
use crate::notifier::{ListenerRegistry, Subscription};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::rc::{Rc, Weak};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    OpenSidePanel,
    GetTabInfo,
    SyncSettings,
    ShowNotification,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::OpenSidePanel,
        MessageKind::GetTabInfo,
        MessageKind::SyncSettings,
        MessageKind::ShowNotification,
    ];

    /// Wire discriminator carried in the envelope's `type` field
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::OpenSidePanel => "tiny-helmet:open-side-panel",
            MessageKind::GetTabInfo => "tiny-helmet:get-tab-info",
            MessageKind::SyncSettings => "tiny-helmet:sync-settings",
            MessageKind::ShowNotification => "tiny-helmet:show-notification",
        }
    }

    pub fn parse(value: &str) -> Option<MessageKind> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Every message the background understands, as `{ type, payload }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Request {
    #[serde(rename = "tiny-helmet:open-side-panel")]
    OpenSidePanel,
    #[serde(rename = "tiny-helmet:get-tab-info")]
    GetTabInfo,
    #[serde(rename = "tiny-helmet:sync-settings")]
    SyncSettings,
    #[serde(rename = "tiny-helmet:show-notification")]
    ShowNotification(Notification),
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::OpenSidePanel => MessageKind::OpenSidePanel,
            Request::GetTabInfo => MessageKind::GetTabInfo,
            Request::SyncSettings => MessageKind::SyncSettings,
            Request::ShowNotification(_) => MessageKind::ShowNotification,
        }
    }

    /// Decode an incoming envelope; foreign or malformed messages yield `None`.
    pub fn from_envelope(envelope: &Value) -> Option<Request> {
        let kind = envelope
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::parse)?;

        match serde_json::from_value(envelope.clone()) {
            Ok(request) => Some(request),
            Err(e) => {
                log::warn!("Malformed {} payload: {}", kind.as_str(), e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSidePanelResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to requests that carry no result of their own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn done() -> Ack {
        Ack { ok: true, error: None }
    }

    pub fn failed(error: impl std::fmt::Display) -> Ack {
        Ack {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Subset of `chrome.tabs.Tab` the contexts care about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Subset of `chrome.runtime.MessageSender`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default)]
    pub tab: Option<TabInfo>,
    #[serde(default)]
    pub frame_id: Option<i32>,
    #[serde(default)]
    pub url: Option<String>,
}

impl MessageSender {
    pub fn tab_id(&self) -> Option<i32> {
        self.tab.as_ref().and_then(|tab| tab.id)
    }
}

/// A message type with a fixed payload and response shape
pub trait RelayMessage: Sized {
    const KIND: MessageKind;
    type Response: Serialize + DeserializeOwned;

    fn into_request(self) -> Request;
    fn from_request(request: Request) -> Option<Self>;
}

pub struct OpenSidePanel;
pub struct GetTabInfo;
pub struct SyncSettings;

impl RelayMessage for OpenSidePanel {
    const KIND: MessageKind = MessageKind::OpenSidePanel;
    type Response = OpenSidePanelResponse;

    fn into_request(self) -> Request {
        Request::OpenSidePanel
    }

    fn from_request(request: Request) -> Option<Self> {
        matches!(request, Request::OpenSidePanel).then_some(OpenSidePanel)
    }
}

impl RelayMessage for GetTabInfo {
    const KIND: MessageKind = MessageKind::GetTabInfo;
    type Response = TabInfo;

    fn into_request(self) -> Request {
        Request::GetTabInfo
    }

    fn from_request(request: Request) -> Option<Self> {
        matches!(request, Request::GetTabInfo).then_some(GetTabInfo)
    }
}

impl RelayMessage for SyncSettings {
    const KIND: MessageKind = MessageKind::SyncSettings;
    type Response = Ack;

    fn into_request(self) -> Request {
        Request::SyncSettings
    }

    fn from_request(request: Request) -> Option<Self> {
        matches!(request, Request::SyncSettings).then_some(SyncSettings)
    }
}

impl RelayMessage for Notification {
    const KIND: MessageKind = MessageKind::ShowNotification;
    type Response = Ack;

    fn into_request(self) -> Request {
        Request::ShowNotification(self)
    }

    fn from_request(request: Request) -> Option<Self> {
        match request {
            Request::ShowNotification(notification) => Some(notification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("{kind} got no response within {after_ms} ms")]
    Timeout { kind: &'static str, after_ms: u32 },
    #[error("message transport failed: {0}")]
    Transport(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode {kind} response: {message}")]
    Decode { kind: &'static str, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Background,
    Tab(i32),
}

/// The host's generic messaging primitive.
///
/// `Ok(None)` means nobody answered (no listener, or the channel closed).
/// Implementations bound the wait and report `RelayError::Timeout`.
#[allow(async_fn_in_trait)]
pub trait MessageTransport {
    async fn send(&self, target: MessageTarget, envelope: Value) -> Result<Option<Value>, RelayError>;
}

/// Send to the background context. `Ok(None)` is "unhandled", never success.
pub async fn send<M, T>(transport: &T, message: M) -> Result<Option<M::Response>, RelayError>
where
    M: RelayMessage,
    T: MessageTransport + ?Sized,
{
    send_to(transport, MessageTarget::Background, message).await
}

pub async fn send_to<M, T>(
    transport: &T,
    target: MessageTarget,
    message: M,
) -> Result<Option<M::Response>, RelayError>
where
    M: RelayMessage,
    T: MessageTransport + ?Sized,
{
    let kind = M::KIND.as_str();
    let envelope = serde_json::to_value(message.into_request())
        .map_err(|e| RelayError::Encode(e.to_string()))?;

    match transport.send(target, envelope).await? {
        None | Some(Value::Null) => {
            log::debug!("{} was not handled", kind);
            Ok(None)
        }
        Some(response) => serde_json::from_value(response)
            .map(Some)
            .map_err(|e| RelayError::Decode {
                kind,
                message: e.to_string(),
            }),
    }
}

/// A handler's answer: immediate, or produced later while the channel stays open
pub enum Reply {
    Ready(Value),
    Pending(LocalBoxFuture<'static, Value>),
}

impl Reply {
    pub fn ready<T: Serialize>(value: &T) -> Reply {
        Reply::Ready(encode_response(value))
    }

    pub fn pending<T, F>(future: F) -> Reply
    where
        T: Serialize,
        F: Future<Output = T> + 'static,
    {
        Reply::Pending(async move { encode_response(&future.await) }.boxed_local())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reply::Pending(_))
    }

    pub async fn resolve(self) -> Value {
        match self {
            Reply::Ready(value) => value,
            Reply::Pending(future) => future.await,
        }
    }
}

fn encode_response<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        log::error!("Failed to encode relay response: {}", e);
        Value::Null
    })
}

pub enum Dispatch {
    Handled(Reply),
    NotHandled,
}

struct Route {
    kind: MessageKind,
    handler: Box<dyn Fn(Request, MessageSender) -> Reply>,
}

/// Receiving side: routes decoded requests to the first handler registered for their kind
pub struct MessageRouter {
    routes: ListenerRegistry<Route>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        MessageRouter {
            routes: ListenerRegistry::new(),
        }
    }
}

impl MessageRouter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn register_raw(
        self: &Rc<Self>,
        kind: MessageKind,
        handler: impl Fn(Request, MessageSender) -> Reply + 'static,
    ) -> Subscription {
        let id = self.routes.add(Rc::new(Route {
            kind,
            handler: Box::new(handler),
        }));

        let router: Weak<Self> = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(router) = router.upgrade() {
                router.routes.remove(id);
            }
        })
    }

    /// Register an async handler for message type `M`
    pub fn register<M, F, Fut>(self: &Rc<Self>, handler: F) -> Subscription
    where
        M: RelayMessage + 'static,
        F: Fn(M, MessageSender) -> Fut + 'static,
        Fut: Future<Output = M::Response> + 'static,
    {
        self.register_raw(M::KIND, move |request, sender| match M::from_request(request) {
            Some(message) => Reply::pending(handler(message, sender)),
            None => Reply::Ready(Value::Null),
        })
    }

    /// Register a handler that answers immediately
    pub fn register_sync<M, F>(self: &Rc<Self>, handler: F) -> Subscription
    where
        M: RelayMessage + 'static,
        F: Fn(M, MessageSender) -> M::Response + 'static,
    {
        self.register_raw(M::KIND, move |request, sender| match M::from_request(request) {
            Some(message) => Reply::ready(&handler(message, sender)),
            None => Reply::Ready(Value::Null),
        })
    }

    pub fn handles(&self, kind: MessageKind) -> bool {
        self.routes.snapshot().iter().any(|route| route.kind == kind)
    }

    pub fn dispatch(&self, envelope: &Value, sender: MessageSender) -> Dispatch {
        let Some(request) = Request::from_envelope(envelope) else {
            return Dispatch::NotHandled;
        };

        let kind = request.kind();
        let route = self.routes.snapshot().into_iter().find(|route| route.kind == kind);
        match route {
            Some(route) => Dispatch::Handled((route.handler)(request, sender)),
            None => {
                log::debug!("No handler registered for {}", kind.as_str());
                Dispatch::NotHandled
            }
        }
    }
}
