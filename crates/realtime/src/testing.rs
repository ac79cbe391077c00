//! In-process fakes for the network seams.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use storage::dto::SubmitScoreRequest;
use storage::models::RankingEntry;
use tokio::sync::watch;

use crate::error::{Result, SyncError};
use crate::topic::{ChannelKind, RealtimeUpdate, ScoreUpdate, Topic, UpdateHandler, UpdateKind};
use crate::traits::{ChannelSubscription, ConnectivityProbe, RealtimeChannel, ScoreApi};

/// Shared, ordered record of calls across fakes.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct FakeProbe {
    events: watch::Sender<bool>,
    reachable: AtomicBool,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new(online: bool) -> Self {
        let (events, _) = watch::channel(online);
        Self {
            events,
            reachable: AtomicBool::new(online),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn emit(&self, online: bool) {
        self.events.send_replace(online);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for FakeProbe {
    fn current_state(&self) -> bool {
        *self.events.borrow()
    }

    fn on_change(&self) -> watch::Receiver<bool> {
        self.events.subscribe()
    }

    async fn check_liveness(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeApi {
    log: Option<CallLog>,
    submissions: Mutex<Vec<(i64, i64, SubmitScoreRequest)>>,
    /// Zero-based submission indexes that fail.
    failing_calls: Mutex<HashSet<usize>>,
    fail_all: AtomicBool,
    rankings: Mutex<Vec<RankingEntry>>,
    competition: Mutex<Option<Value>>,
    participants: Mutex<Vec<Value>>,
}

impl FakeApi {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Default::default()
        }
    }

    pub fn fail_call(&self, index: usize) {
        self.failing_calls.lock().unwrap().insert(index);
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_rankings(&self, rankings: Vec<RankingEntry>) {
        *self.rankings.lock().unwrap() = rankings;
    }

    pub fn set_competition(&self, competition: Value) {
        *self.competition.lock().unwrap() = Some(competition);
    }

    pub fn set_participants(&self, participants: Vec<Value>) {
        *self.participants.lock().unwrap() = participants;
    }

    pub fn submissions(&self) -> Vec<(i64, i64, SubmitScoreRequest)> {
        self.submissions.lock().unwrap().clone()
    }

    fn unreachable(&self) -> SyncError {
        SyncError::Http {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn fetch_guard(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(self.unreachable());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScoreApi for FakeApi {
    async fn submit_score(
        &self,
        competition_id: i64,
        participant_id: i64,
        request: &SubmitScoreRequest,
    ) -> Result<()> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push("rest".to_string());
        }

        let index = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push((competition_id, participant_id, request.clone()));
            submissions.len() - 1
        };

        if self.fail_all.load(Ordering::SeqCst) || self.failing_calls.lock().unwrap().contains(&index) {
            return Err(self.unreachable());
        }
        Ok(())
    }

    async fn fetch_rankings(&self, _competition_id: i64) -> Result<Vec<RankingEntry>> {
        self.fetch_guard()?;
        Ok(self.rankings.lock().unwrap().clone())
    }

    async fn fetch_competition(&self, competition_id: i64) -> Result<Value> {
        self.fetch_guard()?;
        self.competition.lock().unwrap().clone().ok_or(SyncError::Http {
            status: 404,
            body: format!("competition {} not found", competition_id),
        })
    }

    async fn fetch_participants(&self, _competition_id: i64) -> Result<Vec<Value>> {
        self.fetch_guard()?;
        Ok(self.participants.lock().unwrap().clone())
    }
}

pub struct FakeChannel {
    kind: ChannelKind,
    log: Option<CallLog>,
    connected: watch::Sender<bool>,
    published: Mutex<Vec<ScoreUpdate>>,
    listeners: Arc<Mutex<Vec<(Topic, UpdateHandler)>>>,
    fail_subscribe: AtomicBool,
    fail_publish: AtomicBool,
    fail_close: AtomicBool,
    closed: Arc<AtomicUsize>,
}

impl FakeChannel {
    pub fn new(kind: ChannelKind) -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            kind,
            log: None,
            connected,
            published: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            fail_subscribe: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_log(kind: ChannelKind, log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new(kind)
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn fail_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<ScoreUpdate> {
        self.published.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivers `payload` to every listener of `topic`.
    pub fn push(&self, topic: Topic, payload: Value) {
        let listeners = self.listeners.lock().unwrap().clone();
        for (listening, handler) in listeners {
            if listening == topic {
                handler(RealtimeUpdate::new(topic, self.kind, UpdateKind::Snapshot, payload.clone()));
            }
        }
    }
}

#[async_trait::async_trait]
impl RealtimeChannel for FakeChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn subscribe(
        &self,
        topic: Topic,
        handler: UpdateHandler,
    ) -> Result<Box<dyn ChannelSubscription>> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SyncError::Channel(format!("{} refused {}", self.kind, topic)));
        }

        self.listeners.lock().unwrap().push((topic, handler));
        Ok(Box::new(FakeSubscription {
            topic,
            listeners: self.listeners.clone(),
            closed: self.closed.clone(),
            fail: self.fail_close.load(Ordering::SeqCst),
        }))
    }

    async fn publish_score(&self, update: &ScoreUpdate) -> Result<()> {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.kind.to_string());
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SyncError::Channel(format!("{} write failed", self.kind)));
        }
        self.published.lock().unwrap().push(update.clone());
        Ok(())
    }

    fn connection_status(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

struct FakeSubscription {
    topic: Topic,
    listeners: Arc<Mutex<Vec<(Topic, UpdateHandler)>>>,
    closed: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait::async_trait]
impl ChannelSubscription for FakeSubscription {
    async fn close(self: Box<Self>) -> Result<()> {
        if self.fail {
            return Err(SyncError::Channel(format!("teardown of {} failed", self.topic)));
        }
        self.listeners
            .lock()
            .unwrap()
            .retain(|(topic, _)| *topic != self.topic);
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
