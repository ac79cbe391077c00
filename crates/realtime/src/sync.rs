use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::connectivity::{ConnectivityMonitor, SyncMethod};
use crate::error::{Result, SyncError};
use crate::topic::{RealtimeUpdate, ScoreUpdate, Topic, UpdateHandler};
use crate::traits::{ChannelSubscription, RealtimeChannel, ScoreApi};

/// Merges the store and socket channels into one live view per topic, and
/// owns the write path: REST first, then both replicas.
pub struct DualChannelSync {
    api: Arc<dyn ScoreApi>,
    store: Arc<dyn RealtimeChannel>,
    socket: Arc<dyn RealtimeChannel>,
    monitor: ConnectivityMonitor,
    forwarders: Vec<JoinHandle<()>>,
}

impl DualChannelSync {
    pub fn new(
        api: Arc<dyn ScoreApi>,
        store: Arc<dyn RealtimeChannel>,
        socket: Arc<dyn RealtimeChannel>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        let forwarders = vec![
            forward_status(store.as_ref(), {
                let monitor = monitor.clone();
                move |connected| monitor.set_primary_connected(connected)
            }),
            forward_status(socket.as_ref(), {
                let monitor = monitor.clone();
                move |connected| monitor.set_socket_connected(connected)
            }),
        ];

        Self {
            api,
            store,
            socket,
            monitor,
            forwarders,
        }
    }

    pub fn api(&self) -> &Arc<dyn ScoreApi> {
        &self.api
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn sync_method(&self) -> SyncMethod {
        self.monitor.sync_method()
    }

    /// Listens on both channels. Either one failing to open is logged and
    /// leaves the other running.
    pub async fn subscribe<F>(&self, topic: Topic, on_update: F) -> Subscription
    where
        F: Fn(RealtimeUpdate) + Send + Sync + 'static,
    {
        let handler: UpdateHandler = Arc::new(on_update);

        let (store, socket) = tokio::join!(
            self.store.subscribe(topic, handler.clone()),
            self.socket.subscribe(topic, handler),
        );

        Subscription {
            topic,
            store: opened(self.store.as_ref(), topic, store),
            socket: opened(self.socket.as_ref(), topic, socket),
        }
    }

    /// Submits through REST, then mirrors to the store channel and, if it is
    /// up, the socket channel.
    ///
    /// Only the REST outcome is returned; replica failures are logged.
    pub async fn send_update(&self, update: &ScoreUpdate) -> Result<()> {
        self.api
            .submit_score(update.competition_id, update.participant_id, &update.to_request())
            .await?;

        if let Err(e) = self.store.publish_score(update).await {
            tracing::warn!(
                topic = %update.topic(),
                error = %e,
                "Score saved but store replica write failed"
            );
        }

        if self.socket.is_connected() {
            if let Err(e) = self.socket.publish_score(update).await {
                tracing::warn!(
                    topic = %update.topic(),
                    error = %e,
                    "Score saved but socket replica write failed"
                );
            }
        }

        Ok(())
    }
}

impl Drop for DualChannelSync {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

fn forward_status<F>(channel: &dyn RealtimeChannel, apply: F) -> JoinHandle<()>
where
    F: Fn(bool) + Send + 'static,
{
    let mut status = channel.connection_status();

    tokio::spawn(async move {
        loop {
            let connected = *status.borrow_and_update();
            apply(connected);
            if status.changed().await.is_err() {
                break;
            }
        }
    })
}

fn opened(
    channel: &dyn RealtimeChannel,
    topic: Topic,
    result: Result<Box<dyn ChannelSubscription>>,
) -> Option<Box<dyn ChannelSubscription>> {
    match result {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            let error = SyncError::Channel(format!("{} subscribe failed: {}", channel.kind(), e));
            tracing::error!(topic = %topic, error = %error, "Channel unavailable for topic");
            None
        }
    }
}

/// Both listeners of one topic. Dropping it aborts them; prefer
/// [`Subscription::unsubscribe`] for a graceful close.
pub struct Subscription {
    topic: Topic,
    store: Option<Box<dyn ChannelSubscription>>,
    socket: Option<Box<dyn ChannelSubscription>>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn is_active(&self) -> bool {
        self.store.is_some() || self.socket.is_some()
    }

    /// Closes both listeners, each in its own task so one failing (or
    /// panicking) never skips the other. Returns the first failure.
    pub async fn unsubscribe(mut self) -> Result<()> {
        let topic = self.topic;
        let closes: Vec<JoinHandle<Result<()>>> = [self.store.take(), self.socket.take()]
            .into_iter()
            .flatten()
            .map(|subscription| tokio::spawn(subscription.close()))
            .collect();

        let mut first_error = None;
        for close in closes {
            let outcome = match close.await {
                Ok(outcome) => outcome,
                Err(e) => Err(SyncError::Channel(format!("teardown task failed: {}", e))),
            };

            if let Err(e) = outcome {
                tracing::warn!(topic = %topic, error = %e, "Failed to close channel subscription");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, FakeChannel, call_log};
    use crate::topic::ChannelKind;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use storage::models::{ScoreData, ScoreValue};

    struct Fixture {
        api: Arc<FakeApi>,
        store: Arc<FakeChannel>,
        socket: Arc<FakeChannel>,
        sync: DualChannelSync,
    }

    fn fixture() -> Fixture {
        let log = call_log();
        fixture_with(
            FakeApi::with_log(log.clone()),
            FakeChannel::with_log(ChannelKind::Store, log.clone()),
            FakeChannel::with_log(ChannelKind::Socket, log),
        )
    }

    fn fixture_with(api: FakeApi, store: FakeChannel, socket: FakeChannel) -> Fixture {
        let api = Arc::new(api);
        let store = Arc::new(store);
        let socket = Arc::new(socket);
        let sync = DualChannelSync::new(
            api.clone(),
            store.clone(),
            socket.clone(),
            ConnectivityMonitor::new(true),
        );

        Fixture {
            api,
            store,
            socket,
            sync,
        }
    }

    fn update() -> ScoreUpdate {
        let mut sheet = ScoreData::new();
        sheet.insert(1, ScoreValue::new(dec!(7.5), ""));
        ScoreUpdate::new(3, 14, 2, sheet)
    }

    #[tokio::test]
    async fn test_both_channels_feed_one_handler() {
        let f = fixture();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let topic = Topic::scores(3, 14);
        let subscription = f
            .sync
            .subscribe(topic, move |update| sink.lock().unwrap().push(update.source))
            .await;

        assert!(subscription.is_active());
        f.store.push(topic, json!({ "a": 1 }));
        f.socket.push(topic, json!({ "a": 2 }));
        f.store.push(Topic::rankings(3), json!([]));

        assert_eq!(
            *received.lock().unwrap(),
            vec![ChannelKind::Store, ChannelKind::Socket]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_both() {
        let f = fixture();
        let subscription = f.sync.subscribe(Topic::rankings(3), |_| {}).await;
        assert_eq!(f.store.listener_count(), 1);
        assert_eq!(f.socket.listener_count(), 1);

        subscription.unsubscribe().await.unwrap();
        assert_eq!(f.store.closed(), 1);
        assert_eq!(f.socket.closed(), 1);
        assert_eq!(f.store.listener_count(), 0);
        assert_eq!(f.socket.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_teardown_does_not_skip_the_other() {
        let f = fixture();
        f.store.fail_close();

        let subscription = f.sync.subscribe(Topic::rankings(3), |_| {}).await;
        let result = subscription.unsubscribe().await;

        assert!(matches!(result, Err(SyncError::Channel(_))));
        assert_eq!(f.socket.closed(), 1);
        assert_eq!(f.socket.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_survives_one_channel_failing() {
        let f = fixture();
        f.socket.fail_subscribe();

        let subscription = f.sync.subscribe(Topic::rankings(3), |_| {}).await;
        assert!(subscription.is_active());
        assert_eq!(f.store.listener_count(), 1);

        subscription.unsubscribe().await.unwrap();
        assert_eq!(f.store.closed(), 1);
    }

    #[tokio::test]
    async fn test_send_update_fans_out_in_order() {
        let log = call_log();
        let f = fixture_with(
            FakeApi::with_log(log.clone()),
            FakeChannel::with_log(ChannelKind::Store, log.clone()),
            FakeChannel::with_log(ChannelKind::Socket, log.clone()),
        );

        f.sync.send_update(&update()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["rest", "store", "socket"]);
        let (competition, participant, request) = f.api.submissions().remove(0);
        assert_eq!((competition, participant, request.judge_id), (3, 14, 2));
        assert_eq!(f.store.published(), vec![update()]);
    }

    #[tokio::test]
    async fn test_send_update_skips_disconnected_socket() {
        let f = fixture();
        f.socket.set_connected(false);

        f.sync.send_update(&update()).await.unwrap();

        assert_eq!(f.store.published().len(), 1);
        assert!(f.socket.published().is_empty());
    }

    #[tokio::test]
    async fn test_rest_failure_writes_no_replicas() {
        let f = fixture();
        f.api.fail_all(true);

        let result = f.sync.send_update(&update()).await;

        assert!(matches!(result, Err(SyncError::Http { status: 503, .. })));
        assert!(f.store.published().is_empty());
        assert!(f.socket.published().is_empty());
    }

    #[tokio::test]
    async fn test_replica_failure_is_not_returned() {
        let f = fixture();
        f.store.fail_publish();

        f.sync.send_update(&update()).await.unwrap();
        assert_eq!(f.socket.published().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_status_reaches_monitor() {
        let f = fixture();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.sync.sync_method(), SyncMethod::Both);

        f.socket.set_connected(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.sync.sync_method(), SyncMethod::Firebase);

        f.store.set_connected(false);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.sync.sync_method(), SyncMethod::Unavailable);
    }
}
