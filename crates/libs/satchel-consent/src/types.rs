//! Consent request model.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// What a pending consent request is asking the user to approve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConsentKind {
    Permission,
    Transaction,
    SignTransaction,
    SignMessage,
    SignTypedData,
    AddNetwork,
    SwitchNetwork,
    ToggleAsset,
    Unlock,
}

impl ConsentKind {
    /// Kinds whose approval implies producing a signature. These check
    /// the owning wallet's signing capability before enqueueing.
    pub fn requires_signing(&self) -> bool {
        matches!(
            self,
            Self::Transaction | Self::SignTransaction | Self::SignMessage | Self::SignTypedData
        )
    }
}

/// Accepts a single account id or a list of them.
mod account_ids {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Selector {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Selector::deserialize(deserializer)? {
            Selector::One(id) => vec![id],
            Selector::Many(ids) => ids,
        })
    }
}

/// A consent request as submitted by a caller, before the queue has
/// assigned it an id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct ConsentDraft {
    pub network_id: String,
    #[serde(alias = "account_id", deserialize_with = "account_ids::deserialize")]
    pub account_ids: Vec<String>,
    pub kind: ConsentKind,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl ConsentDraft {
    pub fn new(
        network_id: impl Into<String>,
        account_ids: Vec<String>,
        kind: ConsentKind,
        payload: JsonValue,
    ) -> Self {
        Self { network_id: network_id.into(), account_ids, kind, origin: None, payload }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// A queued, user-actionable ask gating a sensitive wallet operation.
///
/// `id` is process-scoped, monotonically increasing, and durable: it is
/// reloaded from the snapshot store at process start and never repeats
/// within a process lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct ConsentRequest {
    pub id: u64,
    pub network_id: String,
    #[serde(deserialize_with = "account_ids::deserialize")]
    pub account_ids: Vec<String>,
    pub kind: ConsentKind,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}
