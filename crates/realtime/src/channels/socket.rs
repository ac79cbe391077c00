use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

use super::{ConnectionGauge, DEFAULT_HEARTBEAT};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::topic::{ChannelKind, RealtimeUpdate, ScoreUpdate, Topic, UpdateHandler, UpdateKind};
use crate::traits::{ChannelSubscription, RealtimeChannel};

/// Envelope of every frame on the socket channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    ScoreUpdate {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    CurrentScores {
        #[serde(default)]
        scores: Value,
    },
    RankingsUpdate {
        #[serde(default)]
        rankings: Value,
    },
    CurrentRankings {
        #[serde(default)]
        rankings: Value,
    },
    RequestScores,
    RequestRankings,
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl SocketMessage {
    /// The request that makes the server push the current state of `topic`.
    pub fn snapshot_request(topic: Topic) -> Self {
        match topic {
            Topic::Scores { .. } => SocketMessage::RequestScores,
            Topic::Rankings { .. } => SocketMessage::RequestRankings,
        }
    }

    /// One `score_update` frame per parameter; the server upserts them one
    /// at a time.
    pub fn score_updates(update: &ScoreUpdate) -> Vec<Self> {
        update
            .score_data
            .iter()
            .map(|(parameter_id, score)| {
                let mut fields = Map::new();
                fields.insert("judge_id".to_string(), update.judge_id.into());
                fields.insert("parameter_id".to_string(), (*parameter_id).into());
                fields.insert("value".to_string(), serde_json::json!(score.value));
                fields.insert("comments".to_string(), score.comments.clone().into());
                SocketMessage::ScoreUpdate { fields }
            })
            .collect()
    }

    fn to_frame(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// WebSocket transport, one connection per subscribed topic.
pub struct SocketChannel {
    inner: Arc<SocketInner>,
    heartbeat: Duration,
}

struct SocketInner {
    base_url: String,
    retry: RetryPolicy,
    gauge: ConnectionGauge,
    outboxes: Mutex<HashMap<Topic, mpsc::UnboundedSender<SocketMessage>>>,
}

enum SessionEnd {
    Shutdown,
    Closed,
}

impl SocketChannel {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let base_url = base_url.into();

        if !base_url.starts_with("ws://") && !base_url.starts_with("wss://") {
            return Err(SyncError::Config(format!(
                "invalid socket URL format: {}",
                base_url
            )));
        }

        Ok(Self {
            inner: Arc::new(SocketInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                retry,
                gauge: ConnectionGauge::new(),
                outboxes: Mutex::new(HashMap::new()),
            }),
            heartbeat: DEFAULT_HEARTBEAT,
        })
    }

    /// Ping interval; a connection that sends nothing, pongs included, for
    /// two intervals is dropped and reconnected.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

impl SocketInner {
    async fn listen(
        self: Arc<Self>,
        topic: Topic,
        handler: UpdateHandler,
        heartbeat: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut attempt = 0;

        loop {
            match self
                .session(topic, &handler, heartbeat, &mut attempt, &mut shutdown)
                .await
            {
                Ok(SessionEnd::Shutdown) => return,
                Ok(SessionEnd::Closed) => {
                    tracing::debug!(topic = %topic, "Socket closed by server");
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, attempt, error = %e, "Socket connection failed");
                }
            }

            let Some(delay) = self.retry.delay_for(attempt) else {
                let error = SyncError::Channel(format!(
                    "socket channel gave up on {} after {} attempts",
                    topic, self.retry.max_attempts
                ));
                tracing::error!(topic = %topic, error = %error, "Socket channel disconnected");
                return;
            };
            attempt += 1;

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(
        &self,
        topic: Topic,
        handler: &UpdateHandler,
        heartbeat: Duration,
        attempt: &mut u32,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Result<SessionEnd> {
        let url = format!("{}{}", self.base_url, topic.socket_path());
        tracing::debug!(url = %url, "Connecting socket");

        let (stream, _response) = tokio::select! {
            _ = &mut *shutdown => return Ok(SessionEnd::Shutdown),
            connected = tokio_tungstenite::connect_async(url.as_str()) => connected?,
        };

        let (mut write, mut read) = stream.split();
        let _open = self.gauge.open();
        *attempt = 0;
        tracing::info!(topic = %topic, "Socket connected");

        let (outbox, mut outgoing) = mpsc::unbounded_channel();
        let _registration = self.register(topic, outbox);

        write
            .send(SocketMessage::snapshot_request(topic).to_frame()?)
            .await?;

        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        tracing::debug!(topic = %topic, error = %e, "Close frame not delivered");
                    }
                    return Ok(SessionEnd::Shutdown);
                }
                Some(message) = outgoing.recv() => {
                    write.send(message.to_frame()?).await?;
                }
                _ = ticker.tick() => {
                    if last_seen.elapsed() >= heartbeat * 2 {
                        tracing::warn!(
                            topic = %topic,
                            silent_ms = last_seen.elapsed().as_millis() as u64,
                            "Socket went silent"
                        );
                        return Ok(SessionEnd::Closed);
                    }
                    write.send(Message::Ping(Default::default())).await?;
                }
                incoming = read.next() => {
                    last_seen = Instant::now();
                    match incoming {
                        Some(Ok(Message::Text(text))) => dispatch(topic, handler, &text),
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn register(
        &self,
        topic: Topic,
        outbox: mpsc::UnboundedSender<SocketMessage>,
    ) -> OutboxRegistration<'_> {
        self.outboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic, outbox.clone());

        OutboxRegistration {
            outboxes: &self.outboxes,
            topic,
            outbox,
        }
    }

    fn outbox(&self, topic: Topic) -> Option<mpsc::UnboundedSender<SocketMessage>> {
        self.outboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
    }
}

/// Removes a session's outbox when the session ends, unless a newer session
/// for the same topic replaced it.
struct OutboxRegistration<'a> {
    outboxes: &'a Mutex<HashMap<Topic, mpsc::UnboundedSender<SocketMessage>>>,
    topic: Topic,
    outbox: mpsc::UnboundedSender<SocketMessage>,
}

impl Drop for OutboxRegistration<'_> {
    fn drop(&mut self) {
        let mut outboxes = self.outboxes.lock().unwrap_or_else(PoisonError::into_inner);
        if outboxes
            .get(&self.topic)
            .is_some_and(|current| current.same_channel(&self.outbox))
        {
            outboxes.remove(&self.topic);
        }
    }
}

fn dispatch(topic: Topic, handler: &UpdateHandler, text: &str) {
    let message: SocketMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Failed to parse socket message");
            return;
        }
    };

    let (kind, payload) = match (topic, message) {
        (Topic::Scores { .. }, SocketMessage::CurrentScores { scores }) => {
            (UpdateKind::Snapshot, scores)
        }
        (Topic::Scores { .. }, SocketMessage::ScoreUpdate { fields }) => {
            (UpdateKind::Delta, Value::Object(fields))
        }
        (Topic::Rankings { .. }, SocketMessage::CurrentRankings { rankings })
        | (Topic::Rankings { .. }, SocketMessage::RankingsUpdate { rankings }) => {
            (UpdateKind::Snapshot, rankings)
        }
        (_, SocketMessage::Error { message }) => {
            tracing::warn!(topic = %topic, reason = %message, "Socket server reported an error");
            return;
        }
        (_, other) => {
            tracing::debug!(topic = %topic, frame = ?other, "Ignoring socket message");
            return;
        }
    };

    handler(RealtimeUpdate::new(topic, ChannelKind::Socket, kind, payload));
}

#[async_trait::async_trait]
impl RealtimeChannel for SocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: UpdateHandler,
    ) -> Result<Box<dyn ChannelSubscription>> {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(
            self.inner
                .clone()
                .listen(topic, handler, self.heartbeat, shutdown_rx),
        );

        Ok(Box::new(SocketSubscription {
            shutdown: Some(shutdown),
            task,
        }))
    }

    async fn publish_score(&self, update: &ScoreUpdate) -> Result<()> {
        let topic = update.topic();
        let outbox = self
            .inner
            .outbox(topic)
            .ok_or_else(|| SyncError::Channel(format!("no open socket for {}", topic)))?;

        for message in SocketMessage::score_updates(update) {
            outbox
                .send(message)
                .map_err(|_| SyncError::Channel(format!("socket for {} closed", topic)))?;
        }
        Ok(())
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.inner.gauge.subscribe()
    }
}

struct SocketSubscription {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[async_trait::async_trait]
impl ChannelSubscription for SocketSubscription {
    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The listener may already have given up.
            let _ = shutdown.send(());
        }

        (&mut self.task)
            .await
            .map_err(|e| SyncError::Channel(format!("socket listener failed: {}", e)))
    }
}

impl Drop for SocketSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use storage::models::{ScoreData, ScoreValue};
    use tokio::net::TcpListener;

    #[test]
    fn test_envelope_shapes() {
        assert_eq!(
            serde_json::to_value(SocketMessage::RequestRankings).unwrap(),
            json!({ "type": "request_rankings" })
        );

        let incoming: SocketMessage = serde_json::from_value(json!({
            "type": "score_update",
            "score": { "judge_id": 4, "parameter_id": 2, "value": 7.5 }
        }))
        .unwrap();
        let SocketMessage::ScoreUpdate { fields } = incoming else {
            panic!("expected score_update");
        };
        assert_eq!(fields["score"]["value"], json!(7.5));
        assert!(!fields.contains_key("type"));

        let unknown: SocketMessage = serde_json::from_value(json!({ "type": "pong" })).unwrap();
        assert_eq!(unknown, SocketMessage::Unknown);
    }

    #[test]
    fn test_score_updates_one_frame_per_parameter() {
        let mut sheet = ScoreData::new();
        sheet.insert(1, ScoreValue::new(dec!(7.5), ""));
        sheet.insert(2, ScoreValue::new(dec!(8), "square halt"));

        let frames = SocketMessage::score_updates(&ScoreUpdate::new(3, 9, 4, sheet));
        let frames: Vec<Value> = frames
            .iter()
            .map(|frame| serde_json::to_value(frame).unwrap())
            .collect();

        assert_eq!(
            frames,
            vec![
                json!({ "type": "score_update", "judge_id": 4, "parameter_id": 1, "value": 7.5, "comments": "" }),
                json!({ "type": "score_update", "judge_id": 4, "parameter_id": 2, "value": 8.0, "comments": "square halt" }),
            ]
        );
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let result = SocketChannel::new("http://localhost:8000", RetryPolicy::default());
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let channel = SocketChannel::new("ws://127.0.0.1:9", RetryPolicy::default()).unwrap();
        let update = ScoreUpdate::new(1, 2, 3, ScoreData::new());

        let result = channel.publish_score(&update).await;
        assert!(matches!(result, Err(SyncError::Channel(_))));
    }

    #[tokio::test]
    async fn test_requests_snapshot_and_delivers_rankings() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

            let request = socket.next().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(request.to_text().unwrap()).unwrap();
            assert_eq!(request, json!({ "type": "request_rankings" }));

            let reply = json!({ "type": "current_rankings", "rankings": [{ "participant_id": 7, "position": 1 }] });
            socket.send(Message::Text(reply.to_string().into())).await.unwrap();

            // Wait for the client to hang up.
            while let Some(Ok(frame)) = socket.next().await {
                if frame.is_close() {
                    break;
                }
            }
        });

        let channel = SocketChannel::new(format!("ws://{}", address), RetryPolicy::default()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: UpdateHandler = Arc::new(move |update| {
            let _ = tx.send(update);
        });

        let subscription = channel.subscribe(Topic::rankings(5), handler).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.source, ChannelKind::Socket);
        assert_eq!(update.kind, UpdateKind::Snapshot);
        assert_eq!(update.payload[0]["participant_id"], json!(7));
        assert!(channel.is_connected());

        subscription.close().await.unwrap();
        server.await.unwrap();
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn test_silent_server_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Refuse reconnects.
            drop(listener);
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            socket.next().await.unwrap().unwrap();

            // Hold the connection open without reading or answering pings.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let channel = SocketChannel::new(
            format!("ws://{}", address),
            RetryPolicy::new(Duration::from_millis(10), 1),
        )
        .unwrap()
        .with_heartbeat(Duration::from_millis(100));

        let mut status = channel.connection_status();
        let handler: UpdateHandler = Arc::new(|_| {});
        let subscription = channel.subscribe(Topic::rankings(2), handler).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|connected| *connected))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|connected| !*connected))
            .await
            .unwrap()
            .unwrap();

        subscription.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_gives_up_when_server_unreachable() {
        let channel = SocketChannel::new(
            "ws://127.0.0.1:9",
            RetryPolicy::new(Duration::from_millis(5), 2),
        )
        .unwrap();

        let handler: UpdateHandler = Arc::new(|_| {});
        let subscription = channel.subscribe(Topic::rankings(1), handler).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!channel.is_connected());
        subscription.close().await.unwrap();
    }
}
