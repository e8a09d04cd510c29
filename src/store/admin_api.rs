//! Client for the admin-api gateway (a single authenticated POST endpoint in
//! front of the project database).
//!
//! Every call posts `{action, table, data?, filters?, options?}` and receives
//! `{success, data?, error?: {code, message}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{into_rows, Filters, SelectOptions, StateStore, StoreError, StoreResult};

/// Gateway client for database operations.
pub struct AdminApiClient {
    client: Client,
    url: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    action: &'a str,
    table: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a SelectOptions>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<GatewayError>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    code: Option<String>,
    message: Option<String>,
}

impl AdminApiClient {
    /// Create a new gateway client. `timeout` bounds every request.
    pub fn new(url: &str, secret: &str, timeout: Duration) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    async fn execute(&self, request: &GatewayRequest<'_>) -> StoreResult<Value> {
        tracing::debug!(action = request.action, table = request.table, "store request");

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.secret))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Transport(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    StoreError::Transport(format!("Connection failed: {}", e))
                } else {
                    StoreError::Transport(format!("Request failed: {}", e))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| StoreError::Transport(format!("Failed to read response: {}", e)))?;

        let parsed: GatewayResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(StoreError::api(format!("HTTP_{}", status.as_u16()), text));
            }
            Err(e) => {
                return Err(StoreError::Decode(format!("{}, body: {}", e, text)));
            }
        };

        decode_response(parsed)
    }
}

fn decode_response(parsed: GatewayResponse) -> StoreResult<Value> {
    if parsed.success {
        return Ok(parsed.data);
    }

    let (code, message) = match parsed.error {
        Some(err) => (err.code, err.message),
        None => (None, None),
    };
    Err(StoreError::api(
        code.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
        message.unwrap_or_else(|| "Unknown error occurred".to_string()),
    ))
}

#[async_trait]
impl StateStore for AdminApiClient {
    async fn select(
        &self,
        table: &str,
        filters: &Filters,
        options: &SelectOptions,
    ) -> StoreResult<Vec<Value>> {
        let data = self
            .execute(&GatewayRequest {
                action: "select",
                table,
                data: None,
                filters: Some(filters),
                options: Some(options),
            })
            .await?;
        Ok(into_rows(data))
    }

    async fn select_single(&self, table: &str, filters: &Filters) -> StoreResult<Option<Value>> {
        let options = SelectOptions {
            single: true,
            ..Default::default()
        };
        let data = self
            .execute(&GatewayRequest {
                action: "select",
                table,
                data: None,
                filters: Some(filters),
                options: Some(&options),
            })
            .await?;
        // The gateway answers with either one object or a one-element array.
        Ok(into_rows(data).into_iter().next())
    }

    async fn insert(&self, table: &str, data: Value) -> StoreResult<Vec<Value>> {
        let data = self
            .execute(&GatewayRequest {
                action: "insert",
                table,
                data: Some(&data),
                filters: None,
                options: None,
            })
            .await?;
        Ok(into_rows(data))
    }

    async fn update(
        &self,
        table: &str,
        data: Value,
        filters: &Filters,
    ) -> StoreResult<Vec<Value>> {
        let data = self
            .execute(&GatewayRequest {
                action: "update",
                table,
                data: Some(&data),
                filters: Some(filters),
                options: None,
            })
            .await?;
        Ok(into_rows(data))
    }

    async fn delete(&self, table: &str, filters: &Filters) -> StoreResult<Vec<Value>> {
        let data = self
            .execute(&GatewayRequest {
                action: "delete",
                table,
                data: None,
                filters: Some(filters),
                options: None,
            })
            .await?;
        Ok(into_rows(data))
    }
}
