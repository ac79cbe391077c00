use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use storage::dto::SubmitScoreRequest;
use storage::models::ScoreData;

/// A logical live-update feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Scores {
        competition_id: i64,
        participant_id: i64,
    },
    Rankings {
        competition_id: i64,
    },
}

impl Topic {
    pub fn scores(competition_id: i64, participant_id: i64) -> Self {
        Topic::Scores {
            competition_id,
            participant_id,
        }
    }

    pub fn rankings(competition_id: i64) -> Self {
        Topic::Rankings { competition_id }
    }

    /// Document path in the store channel.
    pub fn store_path(&self) -> String {
        match self {
            Topic::Scores {
                competition_id,
                participant_id,
            } => format!("scores/{}/{}", competition_id, participant_id),
            Topic::Rankings { competition_id } => format!("rankings/{}", competition_id),
        }
    }

    /// Endpoint path of the socket channel.
    pub fn socket_path(&self) -> String {
        match self {
            Topic::Scores {
                competition_id,
                participant_id,
            } => format!("/ws/scores/{}/{}/", competition_id, participant_id),
            Topic::Rankings { competition_id } => format!("/ws/rankings/{}/", competition_id),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Scores {
                competition_id,
                participant_id,
            } => write!(f, "scores:{}:{}", competition_id, participant_id),
            Topic::Rankings { competition_id } => write!(f, "rankings:{}", competition_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Push-based document store.
    Store,
    Socket,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Store => f.write_str("store"),
            ChannelKind::Socket => f.write_str("socket"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The full current state of the topic.
    Snapshot,
    /// A single change.
    Delta,
}

/// An update as delivered to subscribers, tagged with the channel it came
/// through. The latest arrival wins; there is no cross-channel ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeUpdate {
    pub topic: Topic,
    pub source: ChannelKind,
    pub kind: UpdateKind,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl RealtimeUpdate {
    pub fn new(topic: Topic, source: ChannelKind, kind: UpdateKind, payload: Value) -> Self {
        Self {
            topic,
            source,
            kind,
            payload,
            received_at: Utc::now(),
        }
    }
}

pub type UpdateHandler = Arc<dyn Fn(RealtimeUpdate) + Send + Sync>;

/// One judge's score sheet for one participant, on its way to the server
/// and the live channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreUpdate {
    pub competition_id: i64,
    pub participant_id: i64,
    pub judge_id: i64,
    pub score_data: ScoreData,
}

impl ScoreUpdate {
    pub fn new(competition_id: i64, participant_id: i64, judge_id: i64, score_data: ScoreData) -> Self {
        Self {
            competition_id,
            participant_id,
            judge_id,
            score_data,
        }
    }

    pub fn topic(&self) -> Topic {
        Topic::scores(self.competition_id, self.participant_id)
    }

    pub fn to_request(&self) -> SubmitScoreRequest {
        SubmitScoreRequest::new(self.judge_id, &self.score_data)
    }

    /// The sheet as `{parameter_id: {value, comments}}`, the shape both live
    /// channels carry.
    pub fn parameters(&self) -> Value {
        let parameters: Map<String, Value> = self
            .score_data
            .iter()
            .map(|(parameter_id, score)| {
                (
                    parameter_id.to_string(),
                    serde_json::json!({
                        "value": score.value,
                        "comments": score.comments,
                    }),
                )
            })
            .collect();

        Value::Object(parameters)
    }
}
