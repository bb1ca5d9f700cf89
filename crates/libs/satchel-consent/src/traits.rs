//! Collaborator seams the consent queue drives, plus stub
//! implementations used by tests and as daemon defaults.
//!
//! Per-chain signing, the wallet/account schema, and UI rendering are
//! out of scope for this workspace; the queue only ever reaches them
//! through these traits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::oneshot;

use satchel_rpc::{CallContext, RpcError};

use crate::types::ConsentRequest;

// ── Wallet directory ──────────────────────────────────────────────────────────

/// Resolves accounts to their owning wallet's capabilities.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    /// Whether the wallet owning `account_id` is capable of signing.
    async fn can_sign(&self, account_id: &str) -> Result<bool, RpcError>;

    /// Whether the wallet is currently locked.
    async fn is_locked(&self) -> bool;
}

// ── Chain bridge ──────────────────────────────────────────────────────────────

/// Per-kind resolution side effects, delegated to chain collaborators.
/// Downstream errors pass through unchanged inside the `RpcError`.
#[async_trait]
pub trait ChainBridge: Send + Sync {
    async fn sign_transaction(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn submit_transaction(
        &self,
        request: &ConsentRequest,
        signed: JsonValue,
    ) -> Result<JsonValue, RpcError>;
    async fn sign_message(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn sign_typed_data(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn grant_permission(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn add_network(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn switch_network(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn toggle_asset(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
    async fn unlock(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError>;
}

// ── Approval UI ───────────────────────────────────────────────────────────────

/// A presented approval window. `closed` fires when the window goes
/// away; a dropped sender counts as closure too.
pub struct WindowHandle {
    pub id: u64,
    pub closed: oneshot::Receiver<()>,
}

#[async_trait]
pub trait ApprovalUi: Send + Sync {
    async fn create_window(
        &self,
        ctx: &CallContext,
        path: &str,
    ) -> Result<WindowHandle, RpcError>;
}

// ── Badge / notification surface ──────────────────────────────────────────────

pub trait BadgeSurface: Send + Sync {
    fn set_badge_text(&self, text: &str);
    fn set_badge_background_color(&self, color: &str);
    fn show_notification(&self, title: &str, body: &str);
}

// ── Stubs ─────────────────────────────────────────────────────────────────────

/// Permissive directory: every wallet can sign, unlocked by default.
#[derive(Default)]
pub struct StubWalletDirectory {
    deny_signing: AtomicBool,
    locked: AtomicBool,
}

impl StubWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny_signing(&self, deny: bool) {
        self.deny_signing.store(deny, Ordering::SeqCst);
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletDirectory for StubWalletDirectory {
    async fn can_sign(&self, _account_id: &str) -> Result<bool, RpcError> {
        Ok(!self.deny_signing.load(Ordering::SeqCst))
    }

    async fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// Bridge that answers every operation with a canned value naming the
/// operation, so wiring can be exercised before real chain providers
/// exist.
pub struct StubChainBridge;

impl StubChainBridge {
    fn canned(op: &str, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Ok(json!({ "op": op, "request_id": request.id }))
    }
}

#[async_trait]
impl ChainBridge for StubChainBridge {
    async fn sign_transaction(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("sign_transaction", request)
    }

    async fn submit_transaction(
        &self,
        request: &ConsentRequest,
        signed: JsonValue,
    ) -> Result<JsonValue, RpcError> {
        Ok(json!({ "op": "submit_transaction", "request_id": request.id, "signed": signed }))
    }

    async fn sign_message(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("sign_message", request)
    }

    async fn sign_typed_data(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("sign_typed_data", request)
    }

    async fn grant_permission(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("grant_permission", request)
    }

    async fn add_network(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("add_network", request)
    }

    async fn switch_network(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("switch_network", request)
    }

    async fn toggle_asset(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("toggle_asset", request)
    }

    async fn unlock(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        Self::canned("unlock", request)
    }
}

/// Keeps its windows "open" until told otherwise.
#[derive(Default)]
pub struct StubApprovalUi {
    next_id: AtomicU64,
    open: Mutex<Vec<oneshot::Sender<()>>>,
}

impl StubApprovalUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_windows(&self) -> usize {
        self.open.lock().expect("window list mutex poisoned").len()
    }

    /// Close every open window, firing each handle's `closed` signal.
    pub fn close_all(&self) {
        let senders: Vec<_> =
            self.open.lock().expect("window list mutex poisoned").drain(..).collect();
        for sender in senders {
            let _ = sender.send(());
        }
    }
}

#[async_trait]
impl ApprovalUi for StubApprovalUi {
    async fn create_window(
        &self,
        _ctx: &CallContext,
        _path: &str,
    ) -> Result<WindowHandle, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.open.lock().expect("window list mutex poisoned").push(tx);
        Ok(WindowHandle { id, closed: rx })
    }
}

/// Records every badge/notification call for assertions.
#[derive(Default)]
pub struct RecordingBadge {
    texts: Mutex<Vec<String>>,
    notifications: Mutex<Vec<(String, String)>>,
}

impl RecordingBadge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts.lock().expect("badge mutex poisoned").last().cloned()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().expect("badge mutex poisoned").clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().expect("badge mutex poisoned").clone()
    }
}

impl BadgeSurface for RecordingBadge {
    fn set_badge_text(&self, text: &str) {
        self.texts.lock().expect("badge mutex poisoned").push(text.to_string());
    }

    fn set_badge_background_color(&self, _color: &str) {}

    fn show_notification(&self, title: &str, body: &str) {
        self.notifications
            .lock()
            .expect("badge mutex poisoned")
            .push((title.to_string(), body.to_string()));
    }
}
