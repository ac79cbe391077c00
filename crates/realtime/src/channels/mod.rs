pub mod socket;
pub mod store;

pub use socket::{SocketChannel, SocketMessage};
pub use store::StoreChannel;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Liveness interval of both transports. The store server sends a
/// `keep-alive` event this often; the socket channel pings this often.
/// A connection silent for two intervals is treated as dropped.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Counts open connections of one channel and publishes `open > 0`.
#[derive(Clone)]
pub(crate) struct ConnectionGauge {
    open: Arc<AtomicUsize>,
    status: Arc<watch::Sender<bool>>,
}

impl ConnectionGauge {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(false);
        Self {
            open: Arc::new(AtomicUsize::new(0)),
            status: Arc::new(status),
        }
    }

    /// Marks one connection as open until the returned guard drops.
    pub(crate) fn open(&self) -> OpenConnection {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.publish();
        OpenConnection {
            gauge: self.clone(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    fn publish(&self) {
        self.status.send_if_modified(|connected| {
            let now = self.open.load(Ordering::SeqCst) > 0;
            let changed = *connected != now;
            *connected = now;
            changed
        });
    }
}

pub(crate) struct OpenConnection {
    gauge: ConnectionGauge,
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.gauge.open.fetch_sub(1, Ordering::SeqCst);
        self.gauge.publish();
    }
}
