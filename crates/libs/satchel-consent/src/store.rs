//! Persistent snapshot store for the consent queue.
//!
//! The queue treats all in-memory state as a cache over this store:
//! every mutation writes through before it is considered committed, and
//! startup rehydrates from here before serving any operation.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use satchel_rpc::RpcError;

use crate::types::ConsentRequest;

/// Key the queue snapshot is persisted under.
pub const QUEUE_SNAPSHOT_KEY: &str = "consent_queue";

/// The durable shape of the queue: just its ordered requests. The id
/// counter is recovered as `max(id) + 1`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueSnapshot {
    pub requests: Vec<ConsentRequest>,
}

/// Async key-value store used to snapshot/restore the consent queue
/// across background-process restarts.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RpcError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), RpcError>;
}

// ── Frame codec ───────────────────────────────────────────────────────────────

/// Length-prefixed msgpack frame: 4-byte big-endian payload length,
/// then the payload.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, RpcError> {
    let payload = rmp_serde::to_vec(value)
        .map_err(|err| RpcError::storage(format!("failed to msgpack encode snapshot: {err}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| RpcError::storage("snapshot frame too large"))?;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RpcError> {
    if bytes.len() < 4 {
        return Err(RpcError::storage("snapshot frame missing header"));
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&bytes[..4]);
    let payload_len = u32::from_be_bytes(len_buf) as usize;
    if bytes.len() < 4 + payload_len {
        return Err(RpcError::storage("incomplete snapshot frame payload"));
    }
    let payload = &bytes[4..4 + payload_len];
    rmp_serde::from_slice(payload)
        .map_err(|err| RpcError::storage(format!("failed to decode snapshot frame: {err}")))
}

// ── Implementations ───────────────────────────────────────────────────────────

/// One file per key under a root directory; keys are hex-encoded into
/// filenames so arbitrary key strings stay filesystem-safe.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key))
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RpcError> {
        match tokio::fs::read(self.key_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RpcError::storage(format!("failed to read key {key}: {err}"))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), RpcError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| RpcError::storage(format!("failed to create store root: {err}")))?;
        tokio::fs::write(self.key_path(key), value)
            .await
            .map_err(|err| RpcError::storage(format!("failed to write key {key}: {err}")))
    }
}

/// In-memory store for tests and ephemeral profiles.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RpcError> {
        Ok(self.entries.lock().expect("store mutex poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), RpcError> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConsentKind;
    use serde_json::json;

    fn sample_snapshot() -> QueueSnapshot {
        QueueSnapshot {
            requests: vec![ConsentRequest {
                id: 5,
                network_id: "eip155:1".to_string(),
                account_ids: vec!["acct-1".to_string()],
                kind: ConsentKind::Permission,
                origin: Some("https://dapp.example".to_string()),
                payload: json!({"scopes": ["accounts"]}),
            }],
        }
    }

    #[test]
    fn encode_frame_prefixes_payload_length_and_roundtrips() {
        let snapshot = sample_snapshot();
        let encoded = encode_frame(&snapshot).expect("encode frame");
        assert!(encoded.len() > 4);

        let mut header = [0u8; 4];
        header.copy_from_slice(&encoded[..4]);
        let len = u32::from_be_bytes(header) as usize;
        assert_eq!(len + 4, encoded.len());

        let decoded: QueueSnapshot = decode_frame(&encoded).expect("decode frame");
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn decode_frame_rejects_short_or_incomplete_frames() {
        let err = decode_frame::<QueueSnapshot>(&[1, 2, 3]).expect_err("short header");
        assert!(err.message.contains("missing header"));

        let mut incomplete = vec![0, 0, 0, 8];
        incomplete.extend_from_slice(&[1, 2, 3, 4]);
        let err = decode_frame::<QueueSnapshot>(&incomplete).expect_err("incomplete payload");
        assert!(err.message.contains("incomplete"));
    }

    #[tokio::test]
    async fn file_store_roundtrips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        assert_eq!(store.get(QUEUE_SNAPSHOT_KEY).await.expect("read missing"), None);

        let bytes = encode_frame(&sample_snapshot()).expect("encode");
        store.set(QUEUE_SNAPSHOT_KEY, &bytes).await.expect("write");
        let read = store
            .get(QUEUE_SNAPSHOT_KEY)
            .await
            .expect("read back")
            .expect("key present");
        assert_eq!(read, bytes);
    }

    #[tokio::test]
    async fn memory_store_roundtrips() {
        let store = MemoryStore::new();
        store.set("k", b"v").await.expect("write");
        assert_eq!(store.get("k").await.expect("read"), Some(b"v".to_vec()));
        assert_eq!(store.get("other").await.expect("read missing"), None);
    }
}
