//! Wiring of the background process: queue, services, server, and the
//! event pump that fans queue changes out to every connected context.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use satchel_consent::{
    ApprovalUi, BadgeSurface, ChainBridge, ConsentQueue, ConsentService, RecordingBadge,
    SnapshotStore, StubApprovalUi, StubChainBridge, StubWalletDirectory, WalletDirectory,
    CONSENT_SERVICE,
};
use satchel_rpc::{ConnectInfo, MessageHub, RpcClient, RpcError, RpcServer};

use crate::config::DaemonConfig;
use crate::status::{StatusService, STATUS_SERVICE};

/// The host-side collaborators the consent queue drives. Production
/// builds supply real chain providers and UI bindings; tests and the
/// standalone daemon run on stubs.
pub struct Collaborators {
    pub directory: Arc<dyn WalletDirectory>,
    pub bridge: Arc<dyn ChainBridge>,
    pub ui: Arc<dyn ApprovalUi>,
    pub badge: Arc<dyn BadgeSurface>,
}

impl Collaborators {
    pub fn stubs() -> Self {
        Self {
            directory: Arc::new(StubWalletDirectory::new()),
            bridge: Arc::new(StubChainBridge),
            ui: Arc::new(StubApprovalUi::new()),
            badge: Arc::new(RecordingBadge::new()),
        }
    }
}

/// A running background process: the bound server plus its queue.
pub struct Background {
    hub: MessageHub,
    channel: String,
    queue: ConsentQueue,
    accept_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

impl Background {
    /// Register services, bind the configured channel, and start the
    /// accept loop and event pump.
    pub fn start(
        config: &DaemonConfig,
        hub: MessageHub,
        store: Arc<dyn SnapshotStore>,
        collaborators: Collaborators,
    ) -> Result<Self, RpcError> {
        collaborators.badge.set_badge_background_color(&config.badge_color);

        let queue = ConsentQueue::new(
            store,
            collaborators.directory,
            collaborators.bridge,
            collaborators.ui,
            collaborators.badge,
        );

        let server = RpcServer::new(&config.channel);
        server.register_service(
            CONSENT_SERVICE,
            Arc::new(ConsentService::new(queue.clone())),
            true,
        )?;
        server.register_service(
            STATUS_SERVICE,
            Arc::new(StatusService::new(queue.clone())),
            false,
        )?;

        let accept_task = server.listen(&hub)?;
        let event_task = tokio::spawn(pump_events(queue.clone(), server));
        info!("background: serving on channel {:?}", config.channel);

        Ok(Self { hub, channel: config.channel.clone(), queue, accept_task, event_task })
    }

    pub fn queue(&self) -> &ConsentQueue {
        &self.queue
    }

    pub fn hub(&self) -> &MessageHub {
        &self.hub
    }

    /// Open a client connection to this background from another
    /// execution context.
    pub fn connect(&self, info: ConnectInfo) -> RpcClient {
        RpcClient::new(self.hub.clone(), &self.channel, info)
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        self.event_task.abort();
        debug!("background: shut down channel {:?}", self.channel);
    }
}

async fn pump_events(queue: ConsentQueue, server: RpcServer) {
    let mut events = queue.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => server.broadcast_event(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("background: event pump lagged, skipped {skipped} event(s)");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
