use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::traits::ConnectivityProbe;

/// Which live channels are currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMethod {
    Firebase,
    Websocket,
    Both,
    Unavailable,
}

impl SyncMethod {
    pub fn from_flags(primary_connected: bool, socket_connected: bool) -> Self {
        match (primary_connected, socket_connected) {
            (true, true) => SyncMethod::Both,
            (true, false) => SyncMethod::Firebase,
            (false, true) => SyncMethod::Websocket,
            (false, false) => SyncMethod::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub primary_connected: bool,
    pub socket_connected: bool,
    pub sync_method: SyncMethod,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    fn new(is_online: bool) -> Self {
        Self {
            is_online,
            primary_connected: false,
            socket_connected: false,
            sync_method: SyncMethod::Unavailable,
            last_connected_at: is_online.then(Utc::now),
        }
    }
}

/// Combines platform reachability and per-channel health into one observable
/// state. Observers are only woken when something actually changes.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<ConnectivityState>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(ConnectivityState::new(initially_online));
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    pub fn sync_method(&self) -> SyncMethod {
        self.state.borrow().sync_method
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Platform `online` / `offline` event.
    pub fn handle_network_event(&self, online: bool) {
        self.state.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            tracing::info!(online, "Network status changed");
            state.is_online = online;
            if online {
                state.last_connected_at = Some(Utc::now());
            }
            true
        });
    }

    /// Result of a liveness probe. Only flips the state when it disagrees
    /// with what we currently believe.
    pub fn record_probe(&self, reachable: bool) {
        self.state.send_if_modified(|state| match (state.is_online, reachable) {
            (false, true) => {
                tracing::info!("Liveness probe succeeded, back online");
                state.is_online = true;
                state.last_connected_at = Some(Utc::now());
                true
            }
            (true, false) => {
                tracing::warn!("Liveness probe failed, marking offline");
                state.is_online = false;
                true
            }
            _ => false,
        });
    }

    pub fn set_primary_connected(&self, connected: bool) {
        self.state.send_if_modified(|state| {
            if state.primary_connected == connected {
                return false;
            }
            state.primary_connected = connected;
            state.sync_method = SyncMethod::from_flags(connected, state.socket_connected);
            tracing::debug!(sync_method = ?state.sync_method, "Store channel connection changed");
            true
        });
    }

    pub fn set_socket_connected(&self, connected: bool) {
        self.state.send_if_modified(|state| {
            if state.socket_connected == connected {
                return false;
            }
            state.socket_connected = connected;
            state.sync_method = SyncMethod::from_flags(state.primary_connected, connected);
            tracing::debug!(sync_method = ?state.sync_method, "Socket channel connection changed");
            true
        });
    }

    /// Feeds platform events and a periodic liveness probe into the monitor.
    ///
    /// The probe runs on every tick whatever the platform says, since
    /// platform events only see the link layer.
    pub fn spawn_probe(&self, probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();

        tokio::spawn(async move {
            let mut events = probe.on_change();
            let mut events_open = true;
            monitor.handle_network_event(probe.current_state());

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = events.changed(), if events_open => {
                        match changed {
                            Ok(()) => {
                                let online = *events.borrow_and_update();
                                monitor.handle_network_event(online);
                            }
                            Err(_) => events_open = false,
                        }
                    }
                    _ = ticker.tick() => {
                        let reachable = probe.check_liveness().await;
                        monitor.record_probe(reachable);
                    }
                }
            }
        })
    }
}

/// Probe backed by an HTTP request to a known endpoint.
///
/// Platform integrations push online/offline events through
/// [`HttpProbe::report_network_event`].
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    events: watch::Sender<bool>,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (events, _) = watch::channel(true);

        Ok(Self {
            client,
            url: url.into(),
            events,
        })
    }

    pub fn report_network_event(&self, online: bool) {
        self.events.send_replace(online);
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpProbe {
    fn current_state(&self) -> bool {
        *self.events.borrow()
    }

    fn on_change(&self) -> watch::Receiver<bool> {
        self.events.subscribe()
    }

    async fn check_liveness(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Liveness probe failed");
                false
            }
        }
    }
}
