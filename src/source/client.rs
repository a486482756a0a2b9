use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Response, Url};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::source::models::{
    EntityState, HistoryEntry, HistoryRequest, HistoryResponse, StatisticValue, StatisticsRequest,
};
use crate::source::HistorySource;

pub struct HttpHistorySource {
    http_client: Client,
    base_url: Url,
    bearer_token: String,
}

impl HttpHistorySource {
    /// Build a client for the host's REST API.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client cannot be constructed
    /// or the base URL does not parse.
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(config.history_skip_tls_verify)
            .timeout(Duration::from_secs(config.history_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;
        let base_url = Url::parse(&config.history_base_url).map_err(|e| {
            AppError::Internal(format!("Invalid history base URL '{}': {e}", config.history_base_url))
        })?;

        Ok(Self {
            http_client,
            base_url,
            bearer_token: config.history_token.clone(),
        })
    }
}

/// `base` extended by `segments`, each percent-encoded as one path segment.
fn endpoint(base: &Url, segments: &[&str]) -> AppResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AppError::Internal(format!("History base URL '{base}' cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn history_url(base: &Url, request: &HistoryRequest) -> AppResult<Url> {
    let start = request.start.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut url = endpoint(base, &["history", "period", &start])?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("filter_entity_id", &request.entity_id)
            .append_pair(
                "end_time",
                &request.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .append_key_only("minimal_response");
        if request.no_attributes {
            query.append_key_only("no_attributes");
        }
        if request.skip_initial_state {
            query.append_key_only("skip_initial_state");
        }
    }
    Ok(url)
}

/// Map rate limiting and error statuses to `AppError::HistorySource`.
async fn check_status(response: Response) -> AppResult<Response> {
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::HistorySource("Rate limited (429)".to_string()));
    }

    if !response.status().is_success() {
        return Err(AppError::HistorySource(format!(
            "HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        )));
    }

    Ok(response)
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch_raw_history(&self, request: &HistoryRequest) -> AppResult<Vec<HistoryEntry>> {
        let url = history_url(&self.base_url, request)?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| AppError::HistorySource(format!("Request failed: {e}")))?;
        let response = check_status(response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| AppError::HistorySource(format!("Failed to get response text: {e}")))?;

        let parsed: HistoryResponse = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(
                error = %e,
                entity = %request.entity_id,
                body_preview = %text.chars().take(500).collect::<String>(),
                "Failed to parse history response"
            );
            AppError::HistorySource(format!("Failed to parse response: {e}"))
        })?;

        Ok(parsed.into_iter().next().unwrap_or_default())
    }

    async fn fetch_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> AppResult<Vec<StatisticValue>> {
        let url = endpoint(&self.base_url, &["recorder", "statistics_during_period"])?;

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::HistorySource(format!("Request failed: {e}")))?;
        let response = check_status(response).await?;

        let mut by_id: HashMap<String, Vec<StatisticValue>> = response
            .json()
            .await
            .map_err(|e| AppError::HistorySource(format!("Failed to parse response: {e}")))?;

        Ok(by_id.remove(&request.statistic_id).unwrap_or_default())
    }

    async fn fetch_state(&self, entity_id: &str) -> AppResult<Option<EntityState>> {
        let url = endpoint(&self.base_url, &["states", entity_id])?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| AppError::HistorySource(format!("Request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| AppError::HistorySource(format!("Failed to parse response: {e}")))
    }
}
