//! Per-context RPC client.
//!
//! A client lazily opens its transport on first use, gates every call
//! behind the `Hello` handshake, correlates responses to calls by id,
//! and fans received events out to subscribers. On disconnect it
//! rejects every pending call, clears its state, and lets the next
//! call re-establish the connection from scratch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, oneshot, watch};

use crate::error::RpcError;
use crate::transport::{ConnectInfo, MessageHub, PortReceiver, PortSender};
use crate::types::{CallContext, Message, RpcEvent, RpcRequest};

/// Invoked when the server reports that this execution context's host
/// has been invalidated. The only recovery is a full reload of the
/// context; no retry is attempted.
pub trait ContextReloader: Send + Sync {
    fn reload(&self);
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<JsonValue, RpcError>>>>>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    hub: MessageHub,
    channel: String,
    info: ConnectInfo,
    reloader: Mutex<Option<Arc<dyn ContextReloader>>>,
    next_id: AtomicU64,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    generation: u64,
    conn: Option<Connection>,
}

#[derive(Clone)]
struct Connection {
    sender: PortSender,
    ready: watch::Receiver<bool>,
    pending: PendingTable,
    events: broadcast::Sender<RpcEvent>,
}

impl RpcClient {
    pub fn new(hub: MessageHub, channel: impl Into<String>, info: ConnectInfo) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                hub,
                channel: channel.into(),
                info,
                reloader: Mutex::new(None),
                next_id: AtomicU64::new(1),
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    /// Install the host-invalidation recovery hook. Consumed on first
    /// trigger so the reload fires at most once.
    pub fn set_reloader(&self, reloader: Arc<dyn ContextReloader>) {
        *self.inner.reloader.lock().expect("reloader mutex poisoned") = Some(reloader);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().expect("client state mutex poisoned").conn.is_some()
    }

    /// Number of calls awaiting a response. Zero after a disconnect.
    pub fn pending_calls(&self) -> usize {
        let state = self.inner.state.lock().expect("client state mutex poisoned");
        state
            .conn
            .as_ref()
            .map(|conn| conn.pending.lock().expect("pending table mutex poisoned").len())
            .unwrap_or(0)
    }

    /// Call stub bound to one remote service name.
    pub fn service(&self, name: impl Into<String>) -> ServiceClient {
        ServiceClient { client: self.clone(), service: name.into() }
    }

    /// Issue one correlated call and await its response.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<JsonValue>,
    ) -> Result<JsonValue, RpcError> {
        let conn = self.ensure_connected()?;

        // No request may be sent before the handshake gate resolves.
        let mut ready = conn.ready.clone();
        ready.wait_for(|ok| *ok).await.map_err(|_| RpcError::disconnected())?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().expect("pending table mutex poisoned").insert(id, tx);

        let request = RpcRequest {
            id,
            service: service.to_string(),
            method: method.to_string(),
            args,
            context: self.inner.ambient_context(),
        };
        if let Err(err) = conn.sender.send(Message::Request(request)) {
            conn.pending.lock().expect("pending table mutex poisoned").remove(&id);
            return Err(err);
        }

        let outcome = rx.await.map_err(|_| RpcError::disconnected())?;
        if let Err(err) = &outcome {
            if err.is_host_invalidated() {
                self.inner.trigger_reload();
            }
        }
        outcome
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        args: Vec<JsonValue>,
    ) -> Result<T, RpcError> {
        let value = self.call(service, method, args).await?;
        serde_json::from_value(value).map_err(|err| {
            RpcError::invalid_params(format!(
                "failed to decode response for {service}.{method}: {err}"
            ))
        })
    }

    /// Subscribe to events fanned out by the server. Subscriptions do
    /// not survive a disconnect; resubscribe after reconnecting.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<RpcEvent>, RpcError> {
        Ok(self.ensure_connected()?.events.subscribe())
    }

    fn ensure_connected(&self) -> Result<Connection, RpcError> {
        let mut state = self.inner.state.lock().expect("client state mutex poisoned");
        if let Some(conn) = &state.conn {
            return Ok(conn.clone());
        }

        let port = self.inner.hub.connect(&self.inner.channel, self.inner.info.clone())?;
        let (sender, receiver) = port.split();
        let (ready_tx, ready_rx) = watch::channel(false);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        state.generation += 1;
        let conn = Connection {
            sender,
            ready: ready_rx,
            pending: Arc::clone(&pending),
            events: events.clone(),
        };
        state.conn = Some(conn.clone());

        tokio::spawn(run_reader(
            Arc::clone(&self.inner),
            state.generation,
            receiver,
            ready_tx,
            pending,
            events,
        ));
        Ok(conn)
    }
}

impl ClientInner {
    fn ambient_context(&self) -> CallContext {
        CallContext {
            origin: self.info.origin.clone(),
            from_internal: self.info.internal,
            window: None,
        }
    }

    fn trigger_reload(&self) {
        let reloader = self.reloader.lock().expect("reloader mutex poisoned").take();
        if let Some(reloader) = reloader {
            warn!("rpc client: host context invalidated, reloading execution context");
            reloader.reload();
        }
    }

    /// Tear down one connection's state: reject every pending call,
    /// drop the waiter table, and clear the handle so the next call
    /// reconnects. Guarded by generation so a late reader cannot wipe
    /// a newer connection.
    fn finish_disconnect(&self, generation: u64, pending: &PendingTable) {
        {
            let mut state = self.state.lock().expect("client state mutex poisoned");
            if state.generation == generation {
                state.conn = None;
            }
        }
        let waiters: Vec<_> = {
            let mut table = pending.lock().expect("pending table mutex poisoned");
            table.drain().collect()
        };
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(RpcError::disconnected()));
        }
    }
}

async fn run_reader(
    inner: Arc<ClientInner>,
    generation: u64,
    mut receiver: PortReceiver,
    ready: watch::Sender<bool>,
    pending: PendingTable,
    events: broadcast::Sender<RpcEvent>,
) {
    let mut greeted = false;
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Hello => {
                greeted = true;
                let _ = ready.send(true);
            }
            Message::Response(response) if greeted => {
                let waiter = pending
                    .lock()
                    .expect("pending table mutex poisoned")
                    .remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response.into_result());
                    }
                    None => warn!("rpc client: response without pending call id={}", response.id),
                }
            }
            Message::Event(event) if greeted => {
                let _ = events.send(event);
            }
            other => warn!("rpc client: unexpected message before handshake: {other:?}"),
        }
    }
    inner.finish_disconnect(generation, &pending);
}

/// Call stub bound to a single remote service (the explicit replacement
/// for a duck-typed proxy: typed wrappers marshal their methods through
/// this, and the generic `call` remains for cross-context extensibility).
#[derive(Clone)]
pub struct ServiceClient {
    client: RpcClient,
    service: String,
}

impl ServiceClient {
    pub fn name(&self) -> &str {
        &self.service
    }

    pub async fn call(&self, method: &str, args: Vec<JsonValue>) -> Result<JsonValue, RpcError> {
        self.client.call(&self.service, method, args).await
    }

    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<JsonValue>,
    ) -> Result<T, RpcError> {
        self.client.call_typed(&self.service, method, args).await
    }
}
