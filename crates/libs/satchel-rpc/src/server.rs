//! The single trusted listener for a channel.
//!
//! The server routes requests to registered services and guarantees
//! exactly one response per received request, whatever the handler
//! does. It is the trust boundary: every failure while serving a
//! request is converted to an error response before it crosses back
//! over the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::error::RpcError;
use crate::transport::{ConnectInfo, Listener, MessageHub, PortReceiver, PortSender};
use crate::types::{CallContext, Message, RpcEvent, RpcRequest, RpcResponse};

/// A registered RPC service. The server passes the augmented call
/// context as the trailing argument of every dispatch; a handler
/// signals failure only through `Err`, which becomes the error
/// response.
#[async_trait]
pub trait Service: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: Vec<JsonValue>,
        ctx: CallContext,
    ) -> Result<JsonValue, RpcError>;
}

#[derive(Clone)]
struct ServiceEntry {
    handler: Arc<dyn Service>,
    allow_external: bool,
}

#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    channel: String,
    services: Mutex<HashMap<String, ServiceEntry>>,
    connections: Mutex<HashMap<u64, PortSender>>,
    next_connection_id: AtomicU64,
}

impl RpcServer {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                channel: channel.into(),
                services: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Register a service. Registering a name twice is a fatal
    /// configuration error and fails here, at registration time.
    pub fn register_service(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Service>,
        allow_external: bool,
    ) -> Result<(), RpcError> {
        let name = name.into();
        let mut services = self.inner.services.lock().expect("service registry mutex poisoned");
        if services.contains_key(&name) {
            return Err(RpcError::internal(format!("rpc service already registered: {name}")));
        }
        services.insert(name, ServiceEntry { handler: Arc::clone(&handler), allow_external });
        Ok(())
    }

    /// Bind the channel and begin accepting connections. Returns the
    /// accept-loop task; aborting it (and dropping the server) tears
    /// every connection down.
    pub fn listen(&self, hub: &MessageHub) -> Result<JoinHandle<()>, RpcError> {
        let listener = hub.bind(&self.inner.channel)?;
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(accept_loop(inner, listener)))
    }

    /// Fan an event out to every live connection.
    pub fn broadcast_event(&self, event: RpcEvent) {
        let mut connections = self.inner.connections.lock().expect("connection set mutex poisoned");
        connections.retain(|_, sender| sender.send(Message::Event(event.clone())).is_ok());
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().expect("connection set mutex poisoned").len()
    }
}

async fn accept_loop(inner: Arc<ServerInner>, mut listener: Listener) {
    while let Some(connection) = listener.accept().await {
        // A mismatched declared name is disconnected without reply.
        if connection.declared_channel != inner.channel {
            warn!(
                "rpc server: dropping connection declaring channel {:?} (bound: {:?})",
                connection.declared_channel, inner.channel
            );
            continue;
        }

        let connection_id = inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = connection.port.split();
        if sender.send(Message::Hello).is_err() {
            continue;
        }
        inner
            .connections
            .lock()
            .expect("connection set mutex poisoned")
            .insert(connection_id, sender.clone());
        tokio::spawn(serve_connection(
            Arc::clone(&inner),
            connection_id,
            connection.info,
            sender,
            receiver,
        ));
    }
}

async fn serve_connection(
    inner: Arc<ServerInner>,
    connection_id: u64,
    info: ConnectInfo,
    sender: PortSender,
    mut receiver: PortReceiver,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Request(request) => {
                dispatch_request(&inner, connection_id, &info, &sender, request);
            }
            other => {
                warn!("rpc server: ignoring non-request message on connection {connection_id}: {other:?}");
            }
        }
    }
    inner.connections.lock().expect("connection set mutex poisoned").remove(&connection_id);
}

fn dispatch_request(
    inner: &Arc<ServerInner>,
    connection_id: u64,
    info: &ConnectInfo,
    sender: &PortSender,
    mut request: RpcRequest,
) {
    // Trust is decided by the connection, never by what the caller put
    // in the request context.
    if info.internal {
        request.context.from_internal = true;
    } else {
        request.context.from_internal = false;
        request.context.origin = info.origin.clone();
    }

    let entry = {
        let services = inner.services.lock().expect("service registry mutex poisoned");
        services.get(&request.service).cloned()
    };
    let entry = match entry {
        None => {
            let error = RpcError::service_not_found(&request.service);
            reply(sender, connection_id, &request.service, &request.method, request.id, Err(error), 0);
            return;
        }
        Some(entry) if !entry.allow_external && !request.context.from_internal => {
            let error = RpcError::access_denied(&request.service);
            reply(sender, connection_id, &request.service, &request.method, request.id, Err(error), 0);
            return;
        }
        Some(entry) => entry,
    };

    // Handlers run concurrently; correlation is by id, not arrival order.
    let sender = sender.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let RpcRequest { id, service, method, args, context } = request;
        let outcome = entry.handler.call(&method, args, context).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        reply(&sender, connection_id, &service, &method, id, outcome, elapsed_ms);
    });
}

/// The one place a response is produced: logs the outcome and sends
/// exactly one `RpcResponse` for the request id.
fn reply(
    sender: &PortSender,
    connection_id: u64,
    service: &str,
    method: &str,
    id: u64,
    outcome: Result<JsonValue, RpcError>,
    elapsed_ms: u64,
) {
    let ok = outcome.is_ok();
    let response = match outcome {
        Ok(result) => RpcResponse::ok(id, result),
        Err(error) => {
            warn!("rpc request failed service={service} method={method} id={id}: {error}");
            #[cfg(debug_assertions)]
            log::error!(
                "rpc request failure detail service={service} method={method} id={id}: {error:?}"
            );
            RpcResponse::err(id, error)
        }
    };
    if sender.send(Message::Response(response)).is_err() {
        warn!("rpc server: connection {connection_id} closed before reply id={id}");
    }
    info!(
        target: "satchel_rpc::access",
        "rpc_request conn={connection_id} service={service} method={method} id={id} elapsed_ms={elapsed_ms} ok={ok}"
    );
}
