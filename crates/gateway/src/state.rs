use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use {
    chrono::Utc,
    medlink_config::MedlinkConfig,
    medlink_protocol::{ClientEvent, HospitalProfile},
    tokio::sync::{Mutex, mpsc},
};

use crate::{
    error::HubError,
    hub::{Hub, HubOptions, HubStats},
};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Directory, ledger and presence behind one lock: events are applied
    /// one at a time.
    hub: Mutex<Hub>,
    pub config: MedlinkConfig,
    /// Server version string.
    pub version: String,
    pub hostname: String,
}

impl GatewayState {
    pub fn new(config: MedlinkConfig) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());
        let hub = Hub::new(HubOptions {
            notify_expired: config.ledger.notify_expired,
        });

        Arc::new(Self {
            hub: Mutex::new(hub),
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
        })
    }

    pub fn next_conn_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a new transport connection's outbound queue.
    pub async fn attach(&self, conn_id: &str, sender: mpsc::UnboundedSender<String>) {
        self.hub.lock().await.attach(conn_id, sender);
    }

    /// Apply one inbound event. A panic inside the handler is contained and
    /// reported as [`HubError::Internal`].
    pub async fn dispatch(&self, conn_id: &str, event: ClientEvent) -> Result<(), HubError> {
        let mut hub = self.hub.lock().await;
        catch_unwind(AssertUnwindSafe(|| hub.handle(conn_id, event)))
            .unwrap_or_else(|_| Err(HubError::Internal("event handler panicked".into())))
    }

    /// Returns whether a hospital was bound to the connection.
    pub async fn disconnect(&self, conn_id: &str) -> bool {
        self.hub.lock().await.disconnect(conn_id)
    }

    pub async fn register(&self, profile: HospitalProfile) -> Result<HospitalProfile, HubError> {
        self.hub.lock().await.register(profile)
    }

    pub async fn registered(&self) -> Vec<HospitalProfile> {
        self.hub.lock().await.registered()
    }

    /// Run one retention sweep against the current time.
    pub async fn sweep(&self) -> usize {
        let retention = self.config.ledger.retention();
        self.hub.lock().await.sweep(Utc::now(), retention)
    }

    pub async fn stats(&self) -> HubStats {
        self.hub.lock().await.stats()
    }
}
