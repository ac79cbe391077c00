//! Push-based document store channel speaking the Firebase Realtime Database
//! REST protocol: an SSE stream per topic for reads, `PATCH` for writes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ConnectionGauge, DEFAULT_HEARTBEAT};
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;
use crate::topic::{ChannelKind, RealtimeUpdate, ScoreUpdate, Topic, UpdateHandler, UpdateKind};
use crate::traits::{ChannelSubscription, RealtimeChannel};

pub struct StoreChannel {
    inner: Arc<StoreInner>,
    heartbeat: Duration,
}

struct StoreInner {
    /// No overall timeout: event streams stay open indefinitely.
    stream_client: reqwest::Client,
    write_client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    retry: RetryPolicy,
    gauge: ConnectionGauge,
}

enum StreamEnd {
    /// The server closed the stream or revoked our credentials; reconnect.
    Closed,
    /// The server refused the listener for good.
    Cancelled,
}

impl StoreChannel {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url)
            .map_err(|e| SyncError::Config(format!("invalid store URL {}: {}", base_url, e)))?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        let write_client = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                stream_client,
                write_client,
                base_url: base_url.trim_end_matches('/').to_string(),
                auth_token,
                retry,
                gauge: ConnectionGauge::new(),
            }),
            heartbeat: DEFAULT_HEARTBEAT,
        })
    }

    /// Expected keep-alive interval; a stream silent for twice as long is
    /// dropped and reconnected.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

impl StoreInner {
    fn document_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn listen(
        self: Arc<Self>,
        topic: Topic,
        handler: UpdateHandler,
        idle_timeout: Duration,
    ) {
        let mut attempt = 0;

        loop {
            match self
                .stream_once(topic, &handler, &mut attempt, idle_timeout)
                .await
            {
                Ok(StreamEnd::Cancelled) => {
                    tracing::warn!(topic = %topic, "Store listener cancelled by server");
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    tracing::debug!(topic = %topic, "Store stream closed");
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, attempt, error = %e, "Store stream failed");
                }
            }

            match self.retry.delay_for(attempt) {
                Some(delay) => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let error = SyncError::Channel(format!(
                        "store channel gave up on {} after {} attempts",
                        topic, self.retry.max_attempts
                    ));
                    tracing::error!(topic = %topic, error = %error, "Store channel disconnected");
                    return;
                }
            }
        }
    }

    async fn stream_once(
        &self,
        topic: Topic,
        handler: &UpdateHandler,
        attempt: &mut u32,
        idle_timeout: Duration,
    ) -> Result<StreamEnd> {
        let request = self
            .stream_client
            .get(self.document_url(&topic.store_path()))
            .header(ACCEPT, "text/event-stream");

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(SyncError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let _open = self.gauge.open();
        *attempt = 0;
        tracing::info!(topic = %topic, "Store stream connected");

        let mut decoder = SseDecoder::default();
        let mut tree = DocumentTree::default();
        let mut body = response.bytes_stream();

        loop {
            let chunk = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk.map_err(SyncError::from_request)?,
                Ok(None) => return Ok(StreamEnd::Closed),
                Err(_) => {
                    tracing::warn!(
                        topic = %topic,
                        idle_ms = idle_timeout.as_millis() as u64,
                        "Store stream went silent"
                    );
                    return Ok(StreamEnd::Closed);
                }
            };

            for event in decoder.push(&chunk) {
                match event.name.as_str() {
                    "put" | "patch" => {
                        let change: StoreChange = match serde_json::from_str(&event.data) {
                            Ok(change) => change,
                            Err(e) => {
                                tracing::warn!(topic = %topic, error = %e, "Malformed store event");
                                continue;
                            }
                        };

                        if event.name == "put" {
                            tree.apply_put(&change.path, change.data);
                        } else {
                            tree.apply_patch(&change.path, change.data);
                        }

                        handler(RealtimeUpdate::new(
                            topic,
                            ChannelKind::Store,
                            UpdateKind::Snapshot,
                            tree.root().clone(),
                        ));
                    }
                    "keep-alive" => {}
                    "cancel" => return Ok(StreamEnd::Cancelled),
                    "auth_revoked" => {
                        tracing::warn!(topic = %topic, "Store credentials revoked");
                        return Ok(StreamEnd::Closed);
                    }
                    other => tracing::debug!(topic = %topic, event = other, "Ignoring store event"),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl RealtimeChannel for StoreChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Store
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: UpdateHandler,
    ) -> Result<Box<dyn ChannelSubscription>> {
        let task = tokio::spawn(
            self.inner
                .clone()
                .listen(topic, handler, self.heartbeat * 2),
        );
        Ok(Box::new(StoreSubscription { task }))
    }

    async fn publish_score(&self, update: &ScoreUpdate) -> Result<()> {
        let path = format!(
            "scores/{}/{}/{}",
            update.competition_id, update.participant_id, update.judge_id
        );

        let request = self
            .inner
            .write_client
            .patch(self.inner.document_url(&path))
            .json(&update.parameters());

        let response = self
            .inner
            .authorize(request)
            .send()
            .await
            .map_err(SyncError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(path = %path, "Score mirrored to store");
        Ok(())
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.inner.gauge.subscribe()
    }
}

struct StoreSubscription {
    task: JoinHandle<()>,
}

#[async_trait::async_trait]
impl ChannelSubscription for StoreSubscription {
    async fn close(mut self: Box<Self>) -> Result<()> {
        self.task.abort();
        match (&mut self.task).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SyncError::Channel(format!("store listener failed: {}", e))),
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Deserialize)]
struct StoreChange {
    path: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    name: String,
    data: String,
}

impl SseEvent {
    fn parse(block: &str) -> Option<Self> {
        let mut name = None;
        let mut data: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => name = Some(value.to_string()),
                "data" => data.push(value),
                _ => {}
            }
        }

        if name.is_none() && data.is_empty() {
            return None;
        }

        Some(Self {
            name: name.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

/// Splits a byte stream into server-sent events. Chunks may end anywhere,
/// including inside a multi-byte character.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = SseEvent::parse(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// Local mirror of the document under a listened path.
#[derive(Debug, Default)]
struct DocumentTree {
    root: Value,
}

impl DocumentTree {
    fn root(&self) -> &Value {
        &self.root
    }

    /// Replaces the node at `path`; `null` deletes it.
    fn apply_put(&mut self, path: &str, data: Value) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        set_node(&mut self.root, &segments, data);
    }

    /// Replaces each child named in `data` under `path`, leaving the others.
    fn apply_patch(&mut self, path: &str, data: Value) {
        let Value::Object(children) = data else {
            self.apply_put(path, data);
            return;
        };

        let base = path.trim_end_matches('/');
        for (key, value) in children {
            self.apply_put(&format!("{}/{}", base, key), value);
        }
    }
}

fn set_node(node: &mut Value, segments: &[&str], data: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = data;
        return;
    };

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let mut now_empty = false;
    if let Value::Object(children) = node {
        let child = children.entry(head.to_string()).or_insert(Value::Null);
        set_node(child, rest, data);
        if child.is_null() {
            children.remove(*head);
        }
        now_empty = children.is_empty();
    }

    if now_empty {
        *node = Value::Null;
    }
}
