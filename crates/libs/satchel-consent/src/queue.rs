//! The consent queue state machine.
//!
//! A durable, ordered set of pending user-actionable requests. All
//! in-memory state is a cache over the snapshot store: the queue
//! rehydrates before serving any operation, and every mutation
//! persists its candidate state before applying it in memory,
//! serialized under one async mutex. A failed write aborts the
//! mutation with nothing changed.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, oneshot, Mutex};

use satchel_rpc::{CallContext, RpcError, RpcEvent};

use crate::store::{decode_frame, encode_frame, QueueSnapshot, SnapshotStore, QUEUE_SNAPSHOT_KEY};
use crate::traits::{ApprovalUi, BadgeSurface, ChainBridge, WalletDirectory};
use crate::types::{ConsentDraft, ConsentKind, ConsentRequest};

/// Extension-relative path of the approval prompt surface.
pub const APPROVAL_WINDOW_PATH: &str = "approval.html";

/// Event emitted after every queue mutation, carrying the new depth.
pub const QUEUE_CHANGED_EVENT: &str = "consent_queue_changed";

const EVENT_CHANNEL_CAPACITY: usize = 32;

type Waiter = oneshot::Sender<Result<JsonValue, RpcError>>;

#[derive(Clone)]
pub struct ConsentQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: Arc<dyn SnapshotStore>,
    directory: Arc<dyn WalletDirectory>,
    bridge: Arc<dyn ChainBridge>,
    ui: Arc<dyn ApprovalUi>,
    badge: Arc<dyn BadgeSurface>,
    events: broadcast::Sender<RpcEvent>,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    initialized: bool,
    requests: Vec<ConsentRequest>,
    waiters: HashMap<u64, Waiter>,
    next_id: u64,
}

impl ConsentQueue {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        directory: Arc<dyn WalletDirectory>,
        bridge: Arc<dyn ChainBridge>,
        ui: Arc<dyn ApprovalUi>,
        badge: Arc<dyn BadgeSurface>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                store,
                directory,
                bridge,
                ui,
                badge,
                events,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Subscribe to queue-changed events (new depth as the only arg).
    pub fn subscribe(&self) -> broadcast::Receiver<RpcEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current queue, in order.
    pub async fn get_requests(&self) -> Result<Vec<ConsentRequest>, RpcError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_init(&mut state).await?;
        Ok(state.requests.clone())
    }

    pub async fn pending_count(&self) -> Result<usize, RpcError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_init(&mut state).await?;
        Ok(state.requests.len())
    }

    /// Enqueue a consent request and, unless fire-and-forget, await the
    /// user's decision.
    ///
    /// Signing kinds first verify the owning wallet can actually sign;
    /// on failure the call is rejected immediately with the canonical
    /// user-rejected error and nothing is enqueued. Calls from
    /// untrusted contexts open the approval surface; an unlock prompt
    /// that closes while the wallet is still locked auto-rejects so an
    /// abandoned prompt cannot hang the caller forever.
    pub async fn request_consent(
        &self,
        draft: ConsentDraft,
        ctx: &CallContext,
        wait_completed: bool,
    ) -> Result<JsonValue, RpcError> {
        if draft.kind.requires_signing() {
            for account_id in &draft.account_ids {
                if !self.inner.directory.can_sign(account_id).await? {
                    warn!(
                        "consent: account {account_id} cannot sign, rejecting {:?} request",
                        draft.kind
                    );
                    return Err(RpcError::user_rejected());
                }
            }
        }

        let kind = draft.kind;
        let (id, waiter_rx) = {
            let mut state = self.inner.state.lock().await;
            self.ensure_init(&mut state).await?;

            let id = state.next_id;
            state.next_id += 1;
            let request = ConsentRequest {
                id,
                network_id: draft.network_id,
                account_ids: draft.account_ids,
                kind,
                origin: draft.origin.or_else(|| ctx.origin.clone()),
                payload: draft.payload,
            };
            let mut candidate = state.requests.clone();
            insert_grouped(&mut candidate, request);
            self.persist(&candidate).await?;
            state.requests = candidate;

            let waiter_rx = if wait_completed {
                let (tx, rx) = oneshot::channel();
                state.waiters.insert(id, tx);
                Some(rx)
            } else {
                None
            };
            self.after_mutation(&state);
            (id, waiter_rx)
        };

        if !ctx.from_internal {
            self.open_approval_window(id, kind, ctx).await;
        }

        match waiter_rx {
            Some(rx) => rx.await.map_err(|_| RpcError::user_rejected())?,
            None => Ok(JsonValue::Null),
        }
    }

    /// Record the user's decision for a queued request.
    ///
    /// Resolution side effects run outside the queue lock; finalization
    /// re-locates the request by id and ignores duplicate or late
    /// resolutions.
    pub async fn process_request(&self, id: u64, approve: bool) -> Result<(), RpcError> {
        let request = {
            let mut state = self.inner.state.lock().await;
            self.ensure_init(&mut state).await?;
            match state.requests.iter().find(|request| request.id == id) {
                Some(request) => request.clone(),
                None => {
                    warn!("consent: no pending request with id {id}, ignoring resolution");
                    return Ok(());
                }
            }
        };

        let outcome = if approve {
            self.approve(&request).await
        } else {
            Err(RpcError::user_rejected())
        };

        let mut state = self.inner.state.lock().await;
        let Some(position) = state.requests.iter().position(|request| request.id == id) else {
            warn!("consent: request {id} already resolved, ignoring duplicate resolution");
            return Ok(());
        };
        // The waiter resolves only once the removal is committed; on a
        // failed write the request stays pending and resolvable.
        let mut candidate = state.requests.clone();
        candidate.remove(position);
        self.persist(&candidate).await?;
        state.requests = candidate;
        if let Some(waiter) = state.waiters.remove(&id) {
            let _ = waiter.send(outcome);
        }
        self.after_mutation(&state);
        Ok(())
    }

    /// Remove all requests, or all of one kind, rejecting each removed
    /// request's waiter. Used when surrounding state changes invalidate
    /// outstanding asks (active account or network switch).
    pub async fn clear_requests(&self, kind: Option<ConsentKind>) -> Result<(), RpcError> {
        let mut state = self.inner.state.lock().await;
        self.ensure_init(&mut state).await?;

        let (removed, kept): (Vec<_>, Vec<_>) = state
            .requests
            .iter()
            .cloned()
            .partition(|request| kind.map_or(true, |kind| request.kind == kind));
        if removed.is_empty() {
            return Ok(());
        }

        self.persist(&kept).await?;
        state.requests = kept;
        for request in &removed {
            if let Some(waiter) = state.waiters.remove(&request.id) {
                let _ = waiter.send(Err(RpcError::user_rejected()));
            }
        }
        self.after_mutation(&state);
        Ok(())
    }

    async fn approve(&self, request: &ConsentRequest) -> Result<JsonValue, RpcError> {
        let bridge = &self.inner.bridge;
        match request.kind {
            ConsentKind::Transaction => {
                // Sign first; only a signed transaction is submitted. A
                // failure other than user-rejection is surfaced to the
                // end user, not just the calling dApp.
                let signed = match bridge.sign_transaction(request).await {
                    Ok(signed) => signed,
                    Err(err) => return Err(self.notify_transaction_failure(err)),
                };
                bridge
                    .submit_transaction(request, signed)
                    .await
                    .map_err(|err| self.notify_transaction_failure(err))
            }
            ConsentKind::SignTransaction => bridge.sign_transaction(request).await,
            ConsentKind::SignMessage => bridge.sign_message(request).await,
            ConsentKind::SignTypedData => bridge.sign_typed_data(request).await,
            ConsentKind::Permission => bridge.grant_permission(request).await,
            ConsentKind::AddNetwork => bridge.add_network(request).await,
            ConsentKind::SwitchNetwork => bridge.switch_network(request).await,
            ConsentKind::ToggleAsset => bridge.toggle_asset(request).await,
            ConsentKind::Unlock => bridge.unlock(request).await,
        }
    }

    fn notify_transaction_failure(&self, err: RpcError) -> RpcError {
        if !err.is_user_rejected() {
            self.inner.badge.show_notification("Transaction failed", &err.message);
        }
        err
    }

    async fn open_approval_window(&self, id: u64, kind: ConsentKind, ctx: &CallContext) {
        match self.inner.ui.create_window(ctx, APPROVAL_WINDOW_PATH).await {
            Ok(window) => {
                debug!("consent: opened approval window {} for request {id}", window.id);
                if kind == ConsentKind::Unlock {
                    let queue = self.clone();
                    tokio::spawn(async move {
                        // Sent signal and dropped sender both mean closed.
                        let _ = window.closed.await;
                        if queue.inner.directory.is_locked().await {
                            if let Err(err) = queue.process_request(id, false).await {
                                warn!("consent: failed to auto-reject unlock request {id}: {err}");
                            }
                        }
                    });
                }
            }
            Err(err) => {
                warn!("consent: failed to open approval window for request {id}: {err}");
            }
        }
    }

    /// Rehydrate queue and id counter from the snapshot store, or
    /// initialize empty storage, before the first operation proceeds.
    async fn ensure_init(&self, state: &mut QueueState) -> Result<(), RpcError> {
        if state.initialized {
            return Ok(());
        }
        match self.inner.store.get(QUEUE_SNAPSHOT_KEY).await? {
            Some(bytes) => {
                let snapshot: QueueSnapshot = decode_frame(&bytes)?;
                state.next_id =
                    snapshot.requests.iter().map(|request| request.id).max().map_or(1, |max| max + 1);
                state.requests = snapshot.requests;
                debug!(
                    "consent: rehydrated {} pending request(s), next id {}",
                    state.requests.len(),
                    state.next_id
                );
            }
            None => {
                let empty = encode_frame(&QueueSnapshot::default())?;
                self.inner.store.set(QUEUE_SNAPSHOT_KEY, &empty).await?;
                state.next_id = 1;
            }
        }
        state.initialized = true;
        self.update_badge(state);
        Ok(())
    }

    /// Write a candidate queue to the store. Callers persist the
    /// candidate first and only then apply it in memory, so a failed
    /// write leaves the queue, waiters, and badge untouched.
    async fn persist(&self, requests: &[ConsentRequest]) -> Result<(), RpcError> {
        let snapshot = QueueSnapshot { requests: requests.to_vec() };
        let bytes = encode_frame(&snapshot)?;
        self.inner.store.set(QUEUE_SNAPSHOT_KEY, &bytes).await
    }

    fn after_mutation(&self, state: &QueueState) {
        self.update_badge(state);
        let _ = self
            .inner
            .events
            .send(RpcEvent::new(QUEUE_CHANGED_EVENT, vec![json!(state.requests.len())]));
    }

    fn update_badge(&self, state: &QueueState) {
        let text =
            if state.requests.is_empty() { String::new() } else { state.requests.len().to_string() };
        self.inner.badge.set_badge_text(&text);
    }
}

/// Insert immediately after the last existing request of the same kind,
/// grouping same-kind requests contiguously; absent any same-kind
/// predecessor, append.
fn insert_grouped(requests: &mut Vec<ConsentRequest>, request: ConsentRequest) {
    let position = requests
        .iter()
        .rposition(|existing| existing.kind == request.kind)
        .map(|index| index + 1)
        .unwrap_or(requests.len());
    requests.insert(position, request);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{RecordingBadge, StubApprovalUi, StubChainBridge, StubWalletDirectory};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    struct Fixture {
        queue: ConsentQueue,
        store: Arc<MemoryStore>,
        directory: Arc<StubWalletDirectory>,
        ui: Arc<StubApprovalUi>,
        badge: Arc<RecordingBadge>,
    }

    fn fixture() -> Fixture {
        fixture_with_bridge(Arc::new(StubChainBridge))
    }

    fn fixture_with_bridge(bridge: Arc<dyn ChainBridge>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(StubWalletDirectory::new());
        let ui = Arc::new(StubApprovalUi::new());
        let badge = Arc::new(RecordingBadge::new());
        let queue = ConsentQueue::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::clone(&directory) as Arc<dyn WalletDirectory>,
            bridge,
            Arc::clone(&ui) as Arc<dyn ApprovalUi>,
            Arc::clone(&badge) as Arc<dyn BadgeSurface>,
        );
        Fixture { queue, store, directory, ui, badge }
    }

    fn draft(kind: ConsentKind) -> ConsentDraft {
        ConsentDraft::new("eip155:1", vec!["acct-1".to_string()], kind, json!({}))
    }

    async fn enqueue_detached(queue: &ConsentQueue, kind: ConsentKind) -> u64 {
        queue
            .request_consent(draft(kind), &CallContext::internal(), false)
            .await
            .expect("fire-and-forget enqueue");
        let requests = queue.get_requests().await.expect("get requests");
        requests.last().map(|r| r.id).expect("request queued")
    }

    #[tokio::test]
    async fn same_kind_requests_group_contiguously() {
        let fx = fixture();
        let ctx = CallContext::internal();
        for kind in [ConsentKind::Permission, ConsentKind::AddNetwork, ConsentKind::Permission] {
            fx.queue.request_consent(draft(kind), &ctx, false).await.expect("enqueue");
        }

        let requests = fx.queue.get_requests().await.expect("get requests");
        let kinds: Vec<_> = requests.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ConsentKind::Permission, ConsentKind::Permission, ConsentKind::AddNetwork]
        );
        // The later permission request was pulled forward, keeping ids intact.
        let ids: Vec<_> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn waiting_request_resolves_with_the_per_kind_outcome() {
        let fx = fixture();
        let queue = fx.queue.clone();
        let call = tokio::spawn(async move {
            queue
                .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), true)
                .await
        });

        // Wait until the request is queued before resolving it.
        let id = loop {
            let requests = fx.queue.get_requests().await.expect("get requests");
            if let Some(request) = requests.first() {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };

        fx.queue.process_request(id, true).await.expect("approve");
        let value = call.await.expect("join").expect("approved call resolves");
        assert_eq!(value["op"], json!("grant_permission"));
        assert!(fx.queue.get_requests().await.expect("get requests").is_empty());
    }

    #[tokio::test]
    async fn rejection_yields_the_canonical_user_rejected_error() {
        let fx = fixture();
        let queue = fx.queue.clone();
        let call = tokio::spawn(async move {
            queue
                .request_consent(draft(ConsentKind::AddNetwork), &CallContext::internal(), true)
                .await
        });
        let id = loop {
            if let Some(request) =
                fx.queue.get_requests().await.expect("get requests").first().cloned()
            {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };

        fx.queue.process_request(id, false).await.expect("reject");
        let err = call.await.expect("join").expect_err("rejected");
        assert!(err.is_user_rejected());
    }

    #[tokio::test]
    async fn processing_an_absent_id_is_ignored_without_touching_waiters() {
        let fx = fixture();
        let queue = fx.queue.clone();
        let call = tokio::spawn(async move {
            queue
                .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), true)
                .await
        });
        let id = loop {
            if let Some(request) =
                fx.queue.get_requests().await.expect("get requests").first().cloned()
            {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };

        fx.queue.process_request(9999, true).await.expect("absent id is not an error");
        assert_eq!(fx.queue.pending_count().await.expect("count"), 1);
        // The real waiter is still live and resolvable.
        fx.queue.process_request(id, true).await.expect("approve");
        call.await.expect("join").expect("original call resolves");
    }

    #[tokio::test]
    async fn clear_by_kind_rejects_only_matching_waiters() {
        let fx = fixture();
        let permission_call = tokio::spawn({
            let queue = fx.queue.clone();
            async move {
                queue
                    .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), true)
                    .await
            }
        });
        let network_call = tokio::spawn({
            let queue = fx.queue.clone();
            async move {
                queue
                    .request_consent(draft(ConsentKind::AddNetwork), &CallContext::internal(), true)
                    .await
            }
        });
        while fx.queue.pending_count().await.expect("count") < 2 {
            sleep(Duration::from_millis(5)).await;
        }

        fx.queue.clear_requests(Some(ConsentKind::Permission)).await.expect("clear");

        let err = permission_call.await.expect("join").expect_err("cleared");
        assert!(err.is_user_rejected());

        let remaining = fx.queue.get_requests().await.expect("get requests");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, ConsentKind::AddNetwork);

        // The surviving waiter is untouched.
        fx.queue.process_request(remaining[0].id, true).await.expect("approve survivor");
        network_call.await.expect("join").expect("survivor resolves");
    }

    #[tokio::test]
    async fn badge_text_is_empty_iff_the_queue_is_empty() {
        let fx = fixture();
        let first = enqueue_detached(&fx.queue, ConsentKind::Permission).await;
        let second = enqueue_detached(&fx.queue, ConsentKind::AddNetwork).await;
        assert_eq!(fx.badge.last_text().as_deref(), Some("2"));

        fx.queue.process_request(first, false).await.expect("resolve first");
        assert_eq!(fx.badge.last_text().as_deref(), Some("1"));

        fx.queue.process_request(second, false).await.expect("resolve second");
        assert_eq!(fx.badge.last_text().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn signing_incapable_account_is_rejected_before_enqueueing() {
        let fx = fixture();
        fx.directory.set_deny_signing(true);

        let err = fx
            .queue
            .request_consent(draft(ConsentKind::SignMessage), &CallContext::internal(), true)
            .await
            .expect_err("precondition failure");
        assert!(err.is_user_rejected());
        assert!(fx.queue.get_requests().await.expect("get requests").is_empty());

        // Non-signing kinds are unaffected by the capability check.
        fx.queue
            .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), false)
            .await
            .expect("permission enqueue");
    }

    #[tokio::test]
    async fn restart_rehydrates_queue_and_id_counter() {
        let store = Arc::new(MemoryStore::new());
        let persisted = QueueSnapshot {
            requests: vec![
                ConsentRequest {
                    id: 5,
                    network_id: "eip155:1".to_string(),
                    account_ids: vec!["acct-1".to_string()],
                    kind: ConsentKind::Permission,
                    origin: None,
                    payload: json!({}),
                },
                ConsentRequest {
                    id: 6,
                    network_id: "eip155:1".to_string(),
                    account_ids: vec!["acct-1".to_string()],
                    kind: ConsentKind::AddNetwork,
                    origin: None,
                    payload: json!({}),
                },
            ],
        };
        let bytes = encode_frame(&persisted).expect("encode snapshot");
        store.set(QUEUE_SNAPSHOT_KEY, &bytes).await.expect("seed store");

        let queue = ConsentQueue::new(
            store,
            Arc::new(StubWalletDirectory::new()),
            Arc::new(StubChainBridge),
            Arc::new(StubApprovalUi::new()),
            Arc::new(RecordingBadge::new()),
        );

        let requests = queue.get_requests().await.expect("rehydrated requests");
        let ids: Vec<_> = requests.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 6]);

        queue
            .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), false)
            .await
            .expect("enqueue after restart");
        let requests = queue.get_requests().await.expect("get requests");
        assert!(requests.iter().any(|r| r.id == 7), "next assigned id continues after the max");
    }

    #[tokio::test]
    async fn external_calls_open_the_approval_surface_internal_calls_do_not() {
        let fx = fixture();
        fx.queue
            .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), false)
            .await
            .expect("internal enqueue");
        assert_eq!(fx.ui.open_windows(), 0);

        fx.queue
            .request_consent(
                draft(ConsentKind::Permission),
                &CallContext::external("https://dapp.example"),
                false,
            )
            .await
            .expect("external enqueue");
        assert_eq!(fx.ui.open_windows(), 1);
    }

    #[tokio::test]
    async fn abandoned_unlock_prompt_auto_rejects_while_locked() {
        let fx = fixture();
        fx.directory.set_locked(true);

        let call = tokio::spawn({
            let queue = fx.queue.clone();
            async move {
                queue
                    .request_consent(
                        draft(ConsentKind::Unlock),
                        &CallContext::external("https://dapp.example"),
                        true,
                    )
                    .await
            }
        });

        while fx.ui.open_windows() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
        fx.ui.close_all();

        let err = timeout(Duration::from_secs(1), call)
            .await
            .expect("auto-reject fires")
            .expect("join")
            .expect_err("unlock abandoned");
        assert!(err.is_user_rejected());
        assert!(fx.queue.get_requests().await.expect("get requests").is_empty());
    }

    #[tokio::test]
    async fn unlock_prompt_close_after_unlocking_leaves_resolution_alone() {
        let fx = fixture();
        fx.directory.set_locked(true);

        let call = tokio::spawn({
            let queue = fx.queue.clone();
            async move {
                queue
                    .request_consent(
                        draft(ConsentKind::Unlock),
                        &CallContext::external("https://dapp.example"),
                        true,
                    )
                    .await
            }
        });
        let id = loop {
            if let Some(request) =
                fx.queue.get_requests().await.expect("get requests").first().cloned()
            {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };

        // The user unlocks through the prompt, which then closes.
        fx.directory.set_locked(false);
        fx.queue.process_request(id, true).await.expect("approve unlock");
        fx.ui.close_all();

        let value = call.await.expect("join").expect("unlock resolves approved");
        assert_eq!(value["op"], json!("unlock"));
    }

    struct FailingBridge;

    #[async_trait]
    impl ChainBridge for FailingBridge {
        async fn sign_transaction(
            &self,
            _request: &ConsentRequest,
        ) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("chain provider unavailable"))
        }

        async fn submit_transaction(
            &self,
            _request: &ConsentRequest,
            _signed: JsonValue,
        ) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn sign_message(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn sign_typed_data(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn grant_permission(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn add_network(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn switch_network(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn toggle_asset(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }

        async fn unlock(&self, _request: &ConsentRequest) -> Result<JsonValue, RpcError> {
            Err(RpcError::handler("unreachable"))
        }
    }

    #[tokio::test]
    async fn failed_transaction_submission_raises_a_notification() {
        let fx = fixture_with_bridge(Arc::new(FailingBridge));
        let call = tokio::spawn({
            let queue = fx.queue.clone();
            async move {
                queue
                    .request_consent(draft(ConsentKind::Transaction), &CallContext::internal(), true)
                    .await
            }
        });
        let id = loop {
            if let Some(request) =
                fx.queue.get_requests().await.expect("get requests").first().cloned()
            {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };

        fx.queue.process_request(id, true).await.expect("process");
        let err = call.await.expect("join").expect_err("signing failed");
        assert_eq!(err.message, "chain provider unavailable");

        let notifications = fx.badge.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "Transaction failed");
        // The request is still removed and the badge cleared.
        assert!(fx.queue.get_requests().await.expect("get requests").is_empty());
        assert_eq!(fx.badge.last_text().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn every_mutation_writes_through_to_the_store() {
        let fx = fixture();
        let id = enqueue_detached(&fx.queue, ConsentKind::Permission).await;

        let bytes = fx
            .store
            .get(QUEUE_SNAPSHOT_KEY)
            .await
            .expect("read store")
            .expect("snapshot written");
        let snapshot: QueueSnapshot = decode_frame(&bytes).expect("decode snapshot");
        assert_eq!(snapshot.requests.len(), 1);
        assert_eq!(snapshot.requests[0].id, id);

        fx.queue.process_request(id, false).await.expect("resolve");
        let bytes = fx
            .store
            .get(QUEUE_SNAPSHOT_KEY)
            .await
            .expect("read store")
            .expect("snapshot written");
        let snapshot: QueueSnapshot = decode_frame(&bytes).expect("decode snapshot");
        assert!(snapshot.requests.is_empty());
    }

    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self { inner: MemoryStore::new(), fail_writes: Default::default() }
        }

        fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RpcError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<(), RpcError> {
            if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RpcError::storage("snapshot write failed"));
            }
            self.inner.set(key, value).await
        }
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_queue_and_waiters_untouched() {
        let store = Arc::new(FlakyStore::new());
        let badge = Arc::new(RecordingBadge::new());
        let queue = ConsentQueue::new(
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::new(StubWalletDirectory::new()),
            Arc::new(StubChainBridge),
            Arc::new(StubApprovalUi::new()),
            Arc::clone(&badge) as Arc<dyn BadgeSurface>,
        );

        let call = tokio::spawn({
            let queue = queue.clone();
            async move {
                queue
                    .request_consent(draft(ConsentKind::Permission), &CallContext::internal(), true)
                    .await
            }
        });
        let id = loop {
            if let Some(request) =
                queue.get_requests().await.expect("get requests").first().cloned()
            {
                break request.id;
            }
            sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(badge.last_text().as_deref(), Some("1"));

        store.set_fail_writes(true);

        // Enqueueing is aborted before the queue changes.
        let err = queue
            .request_consent(draft(ConsentKind::AddNetwork), &CallContext::internal(), false)
            .await
            .expect_err("write failed");
        assert_eq!(err.kind, satchel_rpc::RpcErrorKind::Storage);
        assert_eq!(queue.pending_count().await.expect("count"), 1);

        // So are resolution and clearing; the waiter stays live.
        let err = queue.process_request(id, true).await.expect_err("write failed");
        assert_eq!(err.kind, satchel_rpc::RpcErrorKind::Storage);
        let err = queue.clear_requests(None).await.expect_err("write failed");
        assert_eq!(err.kind, satchel_rpc::RpcErrorKind::Storage);
        assert_eq!(queue.pending_count().await.expect("count"), 1);
        assert_eq!(badge.last_text().as_deref(), Some("1"));

        // Once writes recover, the same request resolves normally.
        store.set_fail_writes(false);
        queue.process_request(id, true).await.expect("approve after recovery");
        let value = call.await.expect("join").expect("waiter resolves after recovery");
        assert_eq!(value["op"], json!("grant_permission"));
        assert_eq!(badge.last_text().as_deref(), Some(""));
    }
}
