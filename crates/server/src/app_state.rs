use std::{sync::Arc, time::Duration};

use gateway::Gateway;
use shared::protocol::GatewayEvent;
use sync_engine::SyncContext;
use tokio::sync::mpsc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) sync: SyncContext,
    pub(crate) gateway: Arc<dyn Gateway>,
    /// Feeds the single ingestion loop.
    pub(crate) ingest: mpsc::Sender<GatewayEvent>,
    pub(crate) send_timeout: Duration,
}
