//! Sync relay: the privileged network path out of the host page.
//!
//! The foreground agent runs inside the host page's origin and cannot reach
//! the ingestion endpoint directly, so batches are handed to a relay that
//! performs the request under its own privileges and answers with a
//! success/failure envelope. Transport failures are folded into the envelope
//! rather than raised, because a failed batch never aborts the run.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::error::RelayError;
use crate::domain::record::HarvestRecord;

const RELAY_USER_AGENT: &str = "conn-harvester/0.2";
const RELAY_TIMEOUT_SECS: u64 = 30;

/// A record annotated with the resolved identity claim before transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRecord {
    #[serde(flatten)]
    pub record: HarvestRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

/// One batch handed to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub records: Vec<OutgoingRecord>,
    pub credential: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_claim: Option<String>,
    pub endpoint_url: String,
}

/// Success/failure envelope returned by the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelayResponse {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// The privileged relay seam. Implementations must be infallible at the type
/// level: every outcome is an envelope.
#[async_trait]
pub trait SyncRelay: Send + Sync {
    async fn forward(&self, request: RelayRequest) -> RelayResponse;
}

/// Relay backed by a real HTTP client.
pub struct HttpRelay {
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new() -> Result<Self, RelayError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl SyncRelay for HttpRelay {
    async fn forward(&self, request: RelayRequest) -> RelayResponse {
        debug!(
            records = request.records.len(),
            endpoint = %request.endpoint_url,
            "forwarding batch"
        );

        let result = self
            .client
            .post(&request.endpoint_url)
            .bearer_auth(&request.credential)
            .json(&request.records)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "relay transport failure");
                return RelayResponse::failure(err.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            return RelayResponse::failure(format!("endpoint returned {status}"));
        }

        let data = response.json::<serde_json::Value>().await.ok();
        RelayResponse::ok(data)
    }
}

/// Shared client for the relay and the control surface's read probe.
pub fn build_client() -> Result<reqwest::Client, RelayError> {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(RELAY_USER_AGENT) {
        headers.insert(USER_AGENT, value);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(RELAY_TIMEOUT_SECS))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Pre-fetches the count of records the backend already holds, so progress
/// reporting accounts for prior runs. A 401 is credential invalidation.
pub async fn fetch_existing_count(
    client: &reqwest::Client,
    endpoint: &str,
    credential: &str,
) -> Result<u64, RelayError> {
    let url = format!("{endpoint}?all=true");
    let response = client.get(&url).bearer_auth(credential).send().await?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(RelayError::Unauthorized);
    }
    if !status.is_success() {
        return Err(RelayError::Rejected(status.to_string()));
    }

    let body = response.json::<serde_json::Value>().await?;
    Ok(count_in_body(&body))
}

fn count_in_body(body: &serde_json::Value) -> u64 {
    if let Some(items) = body.as_array() {
        return items.len() as u64;
    }
    if let Some(items) = body.get("data").and_then(|v| v.as_array()) {
        return items.len() as u64;
    }
    body.get("count").and_then(serde_json::Value::as_u64).unwrap_or(0)
}
