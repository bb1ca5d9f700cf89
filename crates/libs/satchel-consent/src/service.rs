//! RPC surface of the consent queue.
//!
//! `request` is the only method reachable from untrusted contexts;
//! inspecting or resolving the queue is reserved for the extension's
//! own surfaces.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use async_trait::async_trait;
use satchel_rpc::{CallContext, RpcError, RpcErrorKind, Service, ServiceClient};

use crate::queue::ConsentQueue;
use crate::types::{ConsentDraft, ConsentKind, ConsentRequest};

/// Service name the consent queue registers under.
pub const CONSENT_SERVICE: &str = "consent";

#[derive(Debug, Deserialize)]
struct ProcessParams {
    id: u64,
    approve: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ClearParams {
    #[serde(default)]
    kind: Option<ConsentKind>,
}

fn arg<T: DeserializeOwned>(args: &[JsonValue], index: usize, what: &str) -> Result<T, RpcError> {
    let value = args
        .get(index)
        .ok_or_else(|| RpcError::invalid_params(format!("missing argument {index}: {what}")))?;
    serde_json::from_value(value.clone())
        .map_err(|err| RpcError::invalid_params(format!("invalid {what}: {err}")))
}

fn opt_arg<T: DeserializeOwned>(
    args: &[JsonValue],
    index: usize,
    what: &str,
) -> Result<Option<T>, RpcError> {
    match args.get(index) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| RpcError::invalid_params(format!("invalid {what}: {err}"))),
    }
}

fn require_internal(ctx: &CallContext, method: &str) -> Result<(), RpcError> {
    if ctx.from_internal {
        Ok(())
    } else {
        Err(RpcError::new(
            RpcErrorKind::AccessDenied,
            format!("consent.{method} is not available to external callers"),
        ))
    }
}

pub struct ConsentService {
    queue: ConsentQueue,
}

impl ConsentService {
    pub fn new(queue: ConsentQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Service for ConsentService {
    async fn call(
        &self,
        method: &str,
        args: Vec<JsonValue>,
        ctx: CallContext,
    ) -> Result<JsonValue, RpcError> {
        match method {
            "request" => {
                let draft: ConsentDraft = arg(&args, 0, "consent draft")?;
                let wait_completed: bool =
                    opt_arg(&args, 1, "wait_completed flag")?.unwrap_or(true);
                self.queue.request_consent(draft, &ctx, wait_completed).await
            }
            "get_requests" => {
                require_internal(&ctx, method)?;
                let requests = self.queue.get_requests().await?;
                serde_json::to_value(requests)
                    .map_err(|err| RpcError::internal(format!("failed to encode queue: {err}")))
            }
            "process" => {
                require_internal(&ctx, method)?;
                let params: ProcessParams = arg(&args, 0, "process params")?;
                self.queue.process_request(params.id, params.approve).await?;
                Ok(JsonValue::Null)
            }
            "clear" => {
                require_internal(&ctx, method)?;
                let params: ClearParams = opt_arg(&args, 0, "clear params")?.unwrap_or_default();
                self.queue.clear_requests(params.kind).await?;
                Ok(JsonValue::Null)
            }
            other => Err(RpcError::invalid_params(format!(
                "unknown consent method: {other}"
            ))),
        }
    }
}

/// Typed stub for calling the consent service from another context.
#[derive(Clone)]
pub struct ConsentClient {
    service: ServiceClient,
}

impl ConsentClient {
    pub fn new(client: &satchel_rpc::RpcClient) -> Self {
        Self { service: client.service(CONSENT_SERVICE) }
    }

    /// Submit a consent request and await the user's decision.
    pub async fn request(&self, draft: &ConsentDraft) -> Result<JsonValue, RpcError> {
        let draft = serde_json::to_value(draft)
            .map_err(|err| RpcError::invalid_params(format!("failed to encode draft: {err}")))?;
        self.service.call("request", vec![draft]).await
    }

    /// Submit a consent request without waiting for resolution.
    pub async fn request_detached(&self, draft: &ConsentDraft) -> Result<(), RpcError> {
        let draft = serde_json::to_value(draft)
            .map_err(|err| RpcError::invalid_params(format!("failed to encode draft: {err}")))?;
        self.service.call("request", vec![draft, json!(false)]).await?;
        Ok(())
    }

    pub async fn get_requests(&self) -> Result<Vec<ConsentRequest>, RpcError> {
        self.service.call_typed("get_requests", vec![]).await
    }

    pub async fn process(&self, id: u64, approve: bool) -> Result<(), RpcError> {
        self.service
            .call("process", vec![json!({ "id": id, "approve": approve })])
            .await?;
        Ok(())
    }

    pub async fn clear(&self, kind: Option<ConsentKind>) -> Result<(), RpcError> {
        self.service.call("clear", vec![json!({ "kind": kind })]).await?;
        Ok(())
    }
}
