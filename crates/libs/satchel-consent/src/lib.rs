//! Durable user-consent queue for the satchel wallet.
//!
//! Sensitive wallet operations (transactions, signatures, permission
//! grants, network changes) are gated behind explicit user approval.
//! This crate provides:
//!
//! - **[`ConsentQueue`]** — the ordered, persisted queue of pending
//!   asks: same-kind grouping on insert, badge recomputation, waiter
//!   resolution, restart rehydration
//! - **[`ConsentService`]** — the RPC adapter registering the queue as
//!   the `consent` service; only `request` is open to external callers
//! - **[`SnapshotStore`]** — the persistence seam, with file-backed and
//!   in-memory implementations
//! - Collaborator traits ([`WalletDirectory`], [`ChainBridge`],
//!   [`ApprovalUi`], [`BadgeSurface`]) the queue drives at resolution
//!   time, plus stub implementations

pub mod queue;
pub mod service;
pub mod store;
pub mod traits;
pub mod types;

pub use queue::{ConsentQueue, APPROVAL_WINDOW_PATH, QUEUE_CHANGED_EVENT};
pub use service::{ConsentClient, ConsentService, CONSENT_SERVICE};
pub use store::{FileStore, MemoryStore, QueueSnapshot, SnapshotStore, QUEUE_SNAPSHOT_KEY};
pub use traits::{
    ApprovalUi, BadgeSurface, ChainBridge, RecordingBadge, StubApprovalUi, StubChainBridge,
    StubWalletDirectory, WalletDirectory, WindowHandle,
};
pub use types::{ConsentDraft, ConsentKind, ConsentRequest};
