use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Discriminant of an [`RpcError`].
///
/// Every failure that crosses the transport is folded into one of these
/// kinds so callers can branch without string matching.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RpcErrorKind {
    /// The transport dropped before a reply arrived.
    Disconnected,
    /// No service is registered under the requested name.
    ServiceNotFound,
    /// An internal-only service was reached from an external connection.
    AccessDenied,
    /// Arguments failed boundary validation for the target method.
    InvalidParams,
    /// A service handler returned a failure.
    Handler,
    /// The user declined a consent request, or it was force-cleared.
    UserRejected,
    /// The extension's own host context has been invalidated; the only
    /// recovery is a full reload of the calling context.
    HostInvalidated,
    /// The persistent snapshot store failed.
    Storage,
    /// A configuration or invariant violation inside this process.
    Internal,
}

impl RpcErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ServiceNotFound => "service_not_found",
            Self::AccessDenied => "access_denied",
            Self::InvalidParams => "invalid_params",
            Self::Handler => "handler",
            Self::UserRejected => "user_rejected",
            Self::HostInvalidated => "host_invalidated",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error shape carried in `RpcResponse.error`.
///
/// `fields` holds structured detail for kinds that need it (offending
/// service name, storage path, downstream error payloads) without
/// widening the type per case.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("rpc error [{kind}]: {message}")]
#[non_exhaustive]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Box<JsonMap<String, JsonValue>>>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), fields: None }
    }

    /// Attach one structured detail field, preserving any already set.
    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.fields.get_or_insert_with(Default::default).insert(key.into(), value);
        self
    }

    pub fn disconnected() -> Self {
        Self::new(RpcErrorKind::Disconnected, "transport disconnected")
    }

    pub fn service_not_found(service: &str) -> Self {
        Self::new(RpcErrorKind::ServiceNotFound, format!("rpc service not found: {service}"))
            .with_field("service", JsonValue::String(service.to_string()))
    }

    pub fn access_denied(service: &str) -> Self {
        Self::new(
            RpcErrorKind::AccessDenied,
            format!("rpc service not allowed from external context: {service}"),
        )
        .with_field("service", JsonValue::String(service.to_string()))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::InvalidParams, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Handler, message)
    }

    /// The canonical rejection raised when a consent request is declined,
    /// fails its signing precondition, or is force-cleared.
    pub fn user_rejected() -> Self {
        Self::new(RpcErrorKind::UserRejected, "user rejected request")
    }

    pub fn host_invalidated() -> Self {
        Self::new(RpcErrorKind::HostInvalidated, "extension host context invalidated")
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Storage, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Internal, message)
    }

    pub fn is_user_rejected(&self) -> bool {
        self.kind == RpcErrorKind::UserRejected
    }

    pub fn is_disconnected(&self) -> bool {
        self.kind == RpcErrorKind::Disconnected
    }

    pub fn is_host_invalidated(&self) -> bool {
        self.kind == RpcErrorKind::HostInvalidated
    }
}
