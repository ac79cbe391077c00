use std::sync::Arc;

use storage::Database;
use tokio::task::JoinHandle;

use crate::api::RestClient;
use crate::catalog::Catalog;
use crate::channels::{SocketChannel, StoreChannel};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, HttpProbe};
use crate::coordinator::SaveCoordinator;
use crate::error::Result;
use crate::sync::DualChannelSync;
use crate::traits::ConnectivityProbe;

/// Everything a judging client needs, wired from one [`SyncConfig`].
pub struct JudgingClient {
    database: Arc<Database>,
    probe: Arc<HttpProbe>,
    monitor: ConnectivityMonitor,
    sync: Arc<DualChannelSync>,
    coordinator: Arc<SaveCoordinator>,
    catalog: Catalog,
    tasks: Vec<JoinHandle<()>>,
}

impl JudgingClient {
    pub async fn connect(config: &SyncConfig) -> Result<Self> {
        let database = Arc::new(Database::new(&config.offline_db_url).await?);

        let api = Arc::new(RestClient::new(
            config.api_base_url.clone(),
            config.auth_token_path.clone(),
            config.request_timeout,
        )?);
        let store = Arc::new(
            StoreChannel::new(
                config.store_url.clone(),
                config.store_auth_token.clone(),
                config.request_timeout,
                config.retry,
            )?
            .with_heartbeat(config.heartbeat_interval),
        );
        let socket = Arc::new(
            SocketChannel::new(config.socket_base_url.clone(), config.retry)?
                .with_heartbeat(config.heartbeat_interval),
        );

        let probe = Arc::new(HttpProbe::new(config.probe_target(), config.request_timeout)?);
        let monitor = ConnectivityMonitor::new(probe.current_state());
        let probe_task = monitor.spawn_probe(probe.clone(), config.probe_interval);

        let sync = Arc::new(DualChannelSync::new(
            api.clone(),
            store,
            socket,
            monitor.clone(),
        ));
        let coordinator = Arc::new(SaveCoordinator::new(sync.clone(), database.clone()));
        let catalog = Catalog::new(api, database.clone(), monitor.clone());

        tracing::info!(
            api = %config.api_base_url,
            store = %config.store_url,
            socket = %config.socket_base_url,
            "Judging client ready"
        );

        Ok(Self {
            database,
            probe,
            monitor,
            sync,
            coordinator,
            catalog,
            tasks: vec![probe_task],
        })
    }

    /// Replays the offline queue whenever connectivity comes back.
    pub fn start_auto_sync(&mut self) {
        self.tasks.push(self.coordinator.spawn_auto_sync());
    }

    /// Runs one liveness probe now instead of waiting for the next tick.
    pub async fn refresh_connectivity(&self) -> bool {
        let reachable = self.probe.check_liveness().await;
        self.monitor.record_probe(reachable);
        reachable
    }

    /// Entry point for platform online/offline notifications.
    pub fn report_network_event(&self, online: bool) {
        self.probe.report_network_event(online);
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn sync(&self) -> &Arc<DualChannelSync> {
        &self.sync
    }

    pub fn coordinator(&self) -> &Arc<SaveCoordinator> {
        &self.coordinator
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl Drop for JudgingClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
