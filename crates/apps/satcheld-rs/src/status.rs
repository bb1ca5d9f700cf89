//! Daemon introspection service, reserved for internal surfaces.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use satchel_consent::ConsentQueue;
use satchel_rpc::{CallContext, RpcError, Service};

/// Service name the status endpoint registers under.
pub const STATUS_SERVICE: &str = "status";

pub struct StatusService {
    started_at: Instant,
    queue: ConsentQueue,
}

impl StatusService {
    pub fn new(queue: ConsentQueue) -> Self {
        Self { started_at: Instant::now(), queue }
    }
}

#[async_trait]
impl Service for StatusService {
    async fn call(
        &self,
        method: &str,
        _args: Vec<JsonValue>,
        _ctx: CallContext,
    ) -> Result<JsonValue, RpcError> {
        match method {
            "info" => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": self.started_at.elapsed().as_secs(),
                "pending_requests": self.queue.pending_count().await?,
            })),
            other => Err(RpcError::invalid_params(format!("unknown status method: {other}"))),
        }
    }
}
