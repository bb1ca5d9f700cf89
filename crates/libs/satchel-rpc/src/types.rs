//! Envelope and correlation types shared by every execution context.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RpcError;

// ── Call context ──────────────────────────────────────────────────────────────

/// Geometry of the UI surface a call originated from, when known.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub struct WindowGeometry {
    pub left: Option<i32>,
    pub top: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Per-call metadata appended by the sender and augmented by the server
/// before dispatch. `from_internal` is authoritative only after the
/// server has stamped it; callers cannot claim trust for themselves.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct CallContext {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub from_internal: bool,
    #[serde(default)]
    pub window: Option<WindowGeometry>,
}

impl CallContext {
    /// Context for a call from the extension's own surfaces.
    pub fn internal() -> Self {
        Self { origin: None, from_internal: true, window: None }
    }

    /// Context for a third-party caller with the given page origin.
    pub fn external(origin: impl Into<String>) -> Self {
        Self { origin: Some(origin.into()), from_internal: false, window: None }
    }
}

// ── Request / Response / Event ────────────────────────────────────────────────

/// One correlated call. `id` is assigned by the client and scoped to
/// that client's connection, not globally unique.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub id: u64,
    pub service: String,
    pub method: String,
    pub args: Vec<JsonValue>,
    #[serde(default)]
    pub context: CallContext,
}

/// Answers exactly one prior request with the matching `id`; exactly
/// one of `result`/`error` is present.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: JsonValue) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self { id, result: None, error: Some(error) }
    }

    pub fn into_result(self) -> Result<JsonValue, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(JsonValue::Null)),
        }
    }
}

/// Unsolicited server-to-client notification; ordered, no reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RpcEvent {
    pub event_name: String,
    pub args: Vec<JsonValue>,
}

impl RpcEvent {
    pub fn new(event_name: impl Into<String>, args: Vec<JsonValue>) -> Self {
        Self { event_name: event_name.into(), args }
    }
}

// ── Channel envelope ──────────────────────────────────────────────────────────

/// Everything that crosses a transport port. `Hello` is the handshake
/// sentinel; receivers type-check for it before interpreting anything
/// as a response or event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Hello,
    Request(RpcRequest),
    Response(RpcResponse),
    Event(RpcEvent),
}
