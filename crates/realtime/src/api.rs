use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use storage::dto::{SubmitScoreRequest, parse_rankings};
use storage::models::RankingEntry;
use validator::Validate;

use crate::error::{Result, SyncError};
use crate::traits::ScoreApi;

/// Client for the judging REST backend.
pub struct RestClient {
    base_url: String,
    client: reqwest::Client,
    token_path: Option<PathBuf>,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        token_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token_path,
        })
    }

    /// Read on every request so a token refreshed by another process is
    /// picked up without restarting.
    async fn bearer_token(&self) -> Option<String> {
        let path = self.token_path.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(token) => {
                let token = token.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No auth token available");
                None
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = match self.bearer_token().await {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        };

        let response = request.send().await.map_err(SyncError::from_request)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.send(self.client.get(&url)).await?;
        response.json::<Value>().await.map_err(SyncError::from_request)
    }
}

#[async_trait::async_trait]
impl ScoreApi for RestClient {
    async fn submit_score(
        &self,
        competition_id: i64,
        participant_id: i64,
        request: &SubmitScoreRequest,
    ) -> Result<()> {
        request.validate()?;

        let url = format!(
            "{}/judging/score/{}/{}/",
            self.base_url, competition_id, participant_id
        );
        self.send(self.client.post(&url).json(request)).await?;

        tracing::debug!(competition_id, participant_id, judge_id = request.judge_id, "Score submitted");
        Ok(())
    }

    async fn fetch_rankings(&self, competition_id: i64) -> Result<Vec<RankingEntry>> {
        let payload = self
            .get_json(&format!("/judging/rankings/{}/", competition_id))
            .await?;
        Ok(parse_rankings(&payload)?)
    }

    async fn fetch_competition(&self, competition_id: i64) -> Result<Value> {
        self.get_json(&format!("/competitions/{}/", competition_id))
            .await
    }

    async fn fetch_participants(&self, competition_id: i64) -> Result<Vec<Value>> {
        let payload = self
            .get_json(&format!("/competitions/{}/participants/", competition_id))
            .await?;

        // Plain list, or a paginated `{"results": [...]}` page.
        match payload {
            Value::Array(participants) => Ok(participants),
            Value::Object(mut page) => match page.remove("results") {
                Some(Value::Array(participants)) => Ok(participants),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use storage::models::{ScoreData, ScoreValue};

    type Seen = Arc<Mutex<Vec<(i64, i64, Option<String>, Value)>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", address)
    }

    async fn record_score(
        State(seen): State<Seen>,
        Path((competition_id, participant_id)): Path<(i64, i64)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push((competition_id, participant_id, auth, body));
        StatusCode::CREATED
    }

    fn request() -> SubmitScoreRequest {
        let mut sheet = ScoreData::new();
        sheet.insert(4, ScoreValue::new(dec!(7.5), "steady"));
        SubmitScoreRequest::new(2, &sheet)
    }

    #[tokio::test]
    async fn test_submit_score_posts_sheet_with_token() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route("/judging/score/:competition/:participant/", post(record_score))
            .with_state(seen.clone());
        let base = serve(router).await;

        let token_file = std::env::temp_dir().join(format!("judge-token-{}", std::process::id()));
        std::fs::write(&token_file, "secret-token\n").unwrap();

        let client = RestClient::new(base, Some(token_file.clone()), Duration::from_secs(5)).unwrap();
        client.submit_score(3, 14, &request()).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (competition_id, participant_id, auth, body) = &seen[0];
        assert_eq!((*competition_id, *participant_id), (3, 14));
        assert_eq!(auth.as_deref(), Some("Bearer secret-token"));
        assert_eq!(
            body,
            &json!({
                "judge_id": 2,
                "scores": [{ "parameter_id": 4, "value": 7.5, "comments": "steady" }]
            })
        );

        std::fs::remove_file(token_file).unwrap();
    }

    #[tokio::test]
    async fn test_server_error_maps_to_http() {
        let router = Router::new().route(
            "/judging/score/:competition/:participant/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;

        let client = RestClient::new(base, None, Duration::from_secs(5)).unwrap();
        let result = client.submit_score(3, 14, &request()).await;

        match result {
            Err(SyncError::Http { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let router = Router::new().route(
            "/judging/rankings/:competition/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!([]))
            }),
        );
        let base = serve(router).await;

        let client = RestClient::new(base, None, Duration::from_millis(100)).unwrap();
        let result = client.fetch_rankings(3).await;

        assert!(matches!(result, Err(SyncError::Timeout)));
        assert!(result.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_invalid_request_never_sent() {
        let client = RestClient::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        let empty = SubmitScoreRequest {
            judge_id: 2,
            scores: Vec::new(),
        };

        let result = client.submit_score(3, 14, &empty).await;
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_fetches_paginated_rankings_and_participants() {
        let router = Router::new()
            .route(
                "/judging/rankings/:competition/",
                get(|| async {
                    Json(json!({
                        "count": 2,
                        "next": null,
                        "previous": null,
                        "results": [
                            { "participant": 8, "position": 2, "average_score": 6.15, "percentage": 61.5 },
                            { "participant": 7, "position": 1, "average_score": 7.0, "percentage": 70.0 }
                        ]
                    }))
                }),
            )
            .route(
                "/competitions/:competition/participants/",
                get(|| async { Json(json!({ "count": 1, "results": [{ "id": 7 }] })) }),
            );
        let base = serve(router).await;
        let client = RestClient::new(base, None, Duration::from_secs(5)).unwrap();

        let rankings = client.fetch_rankings(3).await.unwrap();
        let order: Vec<i64> = rankings.iter().map(|entry| entry.participant_id).collect();
        assert_eq!(order, vec![7, 8]);

        let participants = client.fetch_participants(3).await.unwrap();
        assert_eq!(participants, vec![json!({ "id": 7 })]);
    }
}
