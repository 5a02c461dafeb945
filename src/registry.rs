//! Subscription table multiplexing logical request/response and
//! publish/subscribe flows over the single primary connection.
//!
//! Each (uri, payload kind) pair owns one wire registration and one worker
//! task. Dispatch only queues the raw payload for that worker, so the read
//! loop never waits on callback code, while the callbacks of one
//! subscription still run in registration order, one payload at a time.

use crate::envelope::{wire_id, Envelope};
use crate::error::{Error, Result};
use crate::events::{emit, EventSender, SessionEvent};
use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// Write side the registry sends its subscribe/request envelopes through
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Reserve the next local packet id of the current connection; fails
    /// while no connection is attached
    fn next_packet_id(&self) -> Result<String>;

    /// Write an envelope whose id is already set
    async fn write(&self, envelope: Envelope) -> Result<()>;
}

/// How the wire registration is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    /// Standing subscription; the device pushes every change
    Subscribe,

    /// Single request; the device answers once
    Request,
}

impl SubscribeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Request => "request",
        }
    }
}

/// Type tag of a subscription's decoded payload
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadKind {
    id: TypeId,
    name: &'static str,
}

impl PayloadKind {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What the device answered: a payload, or the error text of an error reply
type Delivery = std::result::Result<Value, String>;

/// Decode + invoke adapter captured at registration time
type Handler = Arc<dyn Fn(&Delivery) -> std::result::Result<(), String> + Send + Sync>;

struct Subscription {
    uri: String,
    kind: PayloadKind,
    handlers: Arc<Mutex<Vec<Handler>>>,
    queue: mpsc::UnboundedSender<Delivery>,
}

impl Subscription {
    fn spawn(uri: &str, kind: PayloadKind, handler: Handler, events: EventSender) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let handlers = Arc::new(Mutex::new(vec![handler]));

        let worker_handlers = Arc::clone(&handlers);
        let worker_uri = uri.to_string();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                // Snapshot so callbacks never run under the lock
                let snapshot: Vec<Handler> = lock(&worker_handlers).clone();
                for handler in snapshot {
                    run_handler(&handler, &payload, &worker_uri, &events);
                }
            }
            trace!("Subscription worker for {} stopped", worker_uri);
        });

        Self {
            uri: uri.to_string(),
            kind,
            handlers,
            queue,
        }
    }
}

fn run_handler(handler: &Handler, payload: &Delivery, uri: &str, events: &EventSender) {
    let message = match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(Ok(())) => return,
        Ok(Err(message)) => message,
        Err(panic) => match panic.downcast_ref::<&str>() {
            Some(text) => format!("callback panicked: {}", text),
            None => match panic.downcast_ref::<String>() {
                Some(text) => format!("callback panicked: {}", text),
                None => "callback panicked".to_string(),
            },
        },
    };

    warn!("Subscription callback for {} failed: {}", uri, message);
    emit(
        events,
        SessionEvent::SubscriptionError {
            uri: uri.to_string(),
            message,
        },
    );
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn decode<T: DeserializeOwned>(payload: &Value) -> std::result::Result<T, String> {
    T::deserialize(payload).map_err(|e| format!("failed to decode {}: {}", type_name::<T>(), e))
}

/// Entries keyed by local packet id
#[derive(Default)]
struct Table {
    entries: HashMap<String, Subscription>,
}

impl Table {
    fn find(&self, uri: &str, kind: PayloadKind) -> Option<(&String, &Subscription)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.uri == uri && entry.kind == kind)
    }
}

/// The subscription table of one session
pub struct SubscriptionRegistry {
    table: Mutex<Table>,
    outbound: Arc<dyn Outbound>,
    events: EventSender,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(outbound: Arc<dyn Outbound>, events: EventSender) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            outbound,
            events,
        }
    }

    /// Register `callback` for payloads of type `T` from `uri`.
    ///
    /// The first registration of a (uri, `T`) pair sends one subscribe or
    /// request envelope; later ones only append their callback. Returns the
    /// local packet id of the entry.
    pub async fn register<T, F>(
        &self,
        uri: &str,
        payload: Value,
        mode: SubscribeMode,
        callback: F,
    ) -> Result<String>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |delivery: &Delivery| match delivery {
            Ok(raw) => {
                let decoded = decode::<T>(raw)?;
                callback(decoded).map_err(|e| format!("{:#}", e))
            }
            Err(message) => Err(format!("device reported error: {}", message)),
        });

        self.insert(uri, payload, PayloadKind::of::<T>(), mode, handler)
            .await
    }

    /// Standing subscription to `uri`
    pub async fn subscribe<T, F>(&self, uri: &str, payload: Value, callback: F) -> Result<String>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(uri, payload, SubscribeMode::Subscribe, callback)
            .await
    }

    /// One-shot request: the entry is removed on the first payload that
    /// decodes, before `callback` runs. An error reply is reported as a
    /// subscription error instead.
    pub async fn request_once<T, F>(
        self: &Arc<Self>,
        uri: &str,
        payload: Value,
        callback: F,
    ) -> Result<String>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(T) -> anyhow::Result<()> + Send + 'static,
    {
        self.request_reply(uri, payload, move |reply: Result<T>| match reply {
            Ok(response) => callback(response),
            Err(e) => Err(e.into()),
        })
        .await
    }

    /// One-shot request whose callback also sees error replies, as
    /// [`Error::Protocol`]. The entry is removed on the first error reply or
    /// decodable payload, before `callback` runs.
    pub async fn request_reply<T, F>(
        self: &Arc<Self>,
        uri: &str,
        payload: Value,
        callback: F,
    ) -> Result<String>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<T>) -> anyhow::Result<()> + Send + 'static,
    {
        let kind = PayloadKind::of::<T>();
        let registry: Weak<Self> = Arc::downgrade(self);
        let owned_uri = uri.to_string();
        let slot = Mutex::new(Some(callback));

        let handler: Handler = Arc::new(move |delivery: &Delivery| {
            let reply = match delivery {
                Ok(raw) => Ok(decode::<T>(raw)?),
                Err(message) => Err(Error::Protocol(message.clone())),
            };
            if let Some(registry) = registry.upgrade() {
                registry.unregister_kind(&owned_uri, kind);
            }
            match lock(&slot).take() {
                Some(callback) => callback(reply).map_err(|e| format!("{:#}", e)),
                None => Ok(()),
            }
        });

        self.insert(uri, payload, kind, SubscribeMode::Request, handler)
            .await
    }

    async fn insert(
        &self,
        uri: &str,
        payload: Value,
        kind: PayloadKind,
        mode: SubscribeMode,
        handler: Handler,
    ) -> Result<String> {
        let (packet_id, envelope) = {
            let mut table = lock(&self.table);
            if let Some((packet_id, existing)) = table.find(uri, kind) {
                lock(&existing.handlers).push(handler);
                trace!("Added callback to {} ({:?})", uri, kind);
                return Ok(packet_id.clone());
            }

            let packet_id = self.outbound.next_packet_id()?;
            let subscription = Subscription::spawn(uri, kind, handler, self.events.clone());
            table.entries.insert(packet_id.clone(), subscription);

            let envelope = Envelope::new(mode.as_str(), payload)
                .with_uri(uri)
                .with_id(wire_id(&packet_id));
            (packet_id, envelope)
        };

        if let Err(e) = self.outbound.write(envelope).await {
            // Without a wire registration the entry would never be answered
            lock(&self.table).entries.remove(&packet_id);
            return Err(e);
        }

        debug!("Subscribed to {} ({:?}) as {}", uri, kind, packet_id);
        Ok(packet_id)
    }

    /// Remove the (uri, `T`) entry and all of its callbacks
    pub fn unregister<T: 'static>(&self, uri: &str) -> bool {
        self.unregister_kind(uri, PayloadKind::of::<T>())
    }

    pub fn unregister_kind(&self, uri: &str, kind: PayloadKind) -> bool {
        let mut table = lock(&self.table);
        let packet_id = table.find(uri, kind).map(|(id, _)| id.clone());
        match packet_id {
            Some(packet_id) => {
                table.entries.remove(&packet_id);
                trace!("Unsubscribed from {} ({:?})", uri, kind);
                true
            }
            None => false,
        }
    }

    /// Queue `payload` for the entry registered under `packet_id`.
    ///
    /// Returns `false` when no entry matches.
    pub fn dispatch(&self, packet_id: &str, payload: Value) -> bool {
        self.deliver(packet_id, Ok(payload))
    }

    /// Queue an error reply for the entry registered under `packet_id`
    pub fn dispatch_error(&self, packet_id: &str, message: impl Into<String>) -> bool {
        self.deliver(packet_id, Err(message.into()))
    }

    fn deliver(&self, packet_id: &str, delivery: Delivery) -> bool {
        let table = lock(&self.table);
        match table.entries.get(packet_id) {
            Some(subscription) => {
                if subscription.queue.send(delivery).is_err() {
                    warn!("Subscription worker for {} is gone", subscription.uri);
                }
                true
            }
            None => false,
        }
    }

    /// Drop every entry; the device forgets subscriptions on re-registration
    pub fn clear(&self) {
        let mut table = lock(&self.table);
        if !table.entries.is_empty() {
            debug!("Clearing {} subscriptions", table.entries.len());
        }
        table.entries.clear();
    }

    /// Local packet id of the (uri, `T`) entry, if registered
    pub fn packet_id_of<T: 'static>(&self, uri: &str) -> Option<String> {
        lock(&self.table)
            .find(uri, PayloadKind::of::<T>())
            .map(|(id, _)| id.clone())
    }

    /// Number of callbacks on the (uri, `T`) entry
    pub fn callback_count<T: 'static>(&self, uri: &str) -> usize {
        lock(&self.table)
            .find(uri, PayloadKind::of::<T>())
            .map(|(_, entry)| lock(&entry.handlers).len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

