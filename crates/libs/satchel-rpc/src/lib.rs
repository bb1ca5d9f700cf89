//! Cross-context RPC substrate for the satchel wallet.
//!
//! A browser-extension wallet runs its background process, content
//! scripts, and page-injected script as separate execution contexts
//! with no shared memory. This crate provides the pieces that make
//! calls across those contexts reliable:
//!
//! - **Envelope types** — [`RpcRequest`], [`RpcResponse`], [`RpcEvent`],
//!   and the [`Message`] channel envelope with its `Hello` handshake
//!   sentinel
//! - **[`MessageHub`]** — in-process model of the host's named,
//!   bidirectional message pipes (sole-listener bind, FIFO ports,
//!   closure as the disconnect signal)
//! - **[`RpcClient`]** — lazy connect, handshake gating, id-correlated
//!   calls, pending-call rejection on disconnect, event subscriptions
//! - **[`RpcServer`]** — the single trusted listener for a channel:
//!   service registry, context stamping, exactly one response per
//!   request, event fan-out
//! - **[`RpcError`]** — the one discriminated error shape carried in
//!   `RpcResponse.error`

pub mod client;
pub mod error;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{ContextReloader, RpcClient, ServiceClient};
pub use error::{RpcError, RpcErrorKind};
pub use server::{RpcServer, Service};
pub use transport::{ConnectInfo, InboundConnection, Listener, MessageHub, Port, PortReceiver, PortSender};
pub use types::{CallContext, Message, RpcEvent, RpcRequest, RpcResponse, WindowGeometry};
