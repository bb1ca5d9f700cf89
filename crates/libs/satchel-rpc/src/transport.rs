//! In-process model of the host messaging primitive.
//!
//! A [`MessageHub`] is a registry of named endpoints. Binding a channel
//! name makes the binder the sole listener for that name in-process;
//! connecting yields a bidirectional [`Port`] whose closure is the
//! disconnect signal. Message order is FIFO within one port; nothing is
//! guaranteed across distinct ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::RpcError;
use crate::types::Message;

/// Metadata a connecting context declares about itself. The binder
/// classifies the connection as trusted (`internal`) or third-party
/// from this, never from anything the caller puts in a request.
#[derive(Clone, Debug, Default)]
pub struct ConnectInfo {
    pub origin: Option<String>,
    pub internal: bool,
}

impl ConnectInfo {
    pub fn internal() -> Self {
        Self { origin: None, internal: true }
    }

    pub fn external(origin: impl Into<String>) -> Self {
        Self { origin: Some(origin.into()), internal: false }
    }
}

/// Sending half of a port. Cloneable so replies can be produced from
/// concurrently running handlers.
#[derive(Clone, Debug)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl PortSender {
    pub fn send(&self, message: Message) -> Result<(), RpcError> {
        self.tx.send(message).map_err(|_| RpcError::disconnected())
    }
}

/// Receiving half of a port. `recv` returning `None` means the peer
/// dropped every sender: the connection is gone.
#[derive(Debug)]
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// One end of an established connection.
#[derive(Debug)]
pub struct Port {
    sender: PortSender,
    receiver: PortReceiver,
}

impl Port {
    pub fn split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

/// A connection as seen by the binder of a channel, carrying the name
/// the caller declared and its self-reported metadata.
#[derive(Debug)]
pub struct InboundConnection {
    pub declared_channel: String,
    pub info: ConnectInfo,
    pub port: Port,
}

/// Stream of inbound connections for a bound channel name.
#[derive(Debug)]
pub struct Listener {
    channel: String,
    rx: mpsc::UnboundedReceiver<InboundConnection>,
}

impl Listener {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn accept(&mut self) -> Option<InboundConnection> {
        self.rx.recv().await
    }
}

type EndpointMap = HashMap<String, mpsc::UnboundedSender<InboundConnection>>;

/// Registry of named endpoints standing in for the browser's runtime
/// messaging surface. Cheap to clone; all clones share one registry.
#[derive(Clone, Default)]
pub struct MessageHub {
    endpoints: Arc<Mutex<EndpointMap>>,
}

impl MessageHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel name, becoming its sole listener. A second live
    /// bind for the same name is a configuration error; a dead binding
    /// (listener dropped, e.g. after a background restart) is replaced.
    pub fn bind(&self, channel: &str) -> Result<Listener, RpcError> {
        let mut endpoints = self.endpoints.lock().expect("hub registry mutex poisoned");
        if let Some(existing) = endpoints.get(channel) {
            if !existing.is_closed() {
                return Err(RpcError::internal(format!("channel already bound: {channel}")));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(channel.to_string(), tx);
        Ok(Listener { channel: channel.to_string(), rx })
    }

    /// Connect to a bound channel, declaring the same name that is used
    /// for routing.
    pub fn connect(&self, channel: &str, info: ConnectInfo) -> Result<Port, RpcError> {
        self.connect_as(channel, channel, info)
    }

    /// Route to `channel` while declaring `declared`. The binder
    /// validates the declared name and drops mismatches without reply.
    pub fn connect_as(
        &self,
        channel: &str,
        declared: &str,
        info: ConnectInfo,
    ) -> Result<Port, RpcError> {
        let endpoint = {
            let endpoints = self.endpoints.lock().expect("hub registry mutex poisoned");
            endpoints.get(channel).cloned()
        };
        let endpoint = endpoint.ok_or_else(RpcError::disconnected)?;

        let (to_binder_tx, to_binder_rx) = mpsc::unbounded_channel();
        let (to_caller_tx, to_caller_rx) = mpsc::unbounded_channel();
        let binder_port = Port {
            sender: PortSender { tx: to_caller_tx },
            receiver: PortReceiver { rx: to_binder_rx },
        };
        let caller_port = Port {
            sender: PortSender { tx: to_binder_tx },
            receiver: PortReceiver { rx: to_caller_rx },
        };

        let inbound = InboundConnection {
            declared_channel: declared.to_string(),
            info,
            port: binder_port,
        };
        endpoint.send(inbound).map_err(|_| RpcError::disconnected())?;
        Ok(caller_port)
    }
}
