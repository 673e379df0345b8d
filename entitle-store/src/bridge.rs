//! Database-bridge wire client.

use std::time::Duration;

use serde_json::{Value, json};
use url::Url;

use entitle::store::StoreError;

/// HTTP statuses worth retrying: timeouts, throttling, and transient
/// upstream failures. Everything else fails immediately.
const RETRYABLE_STATUS: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

/// Base delay between retry attempts; scales linearly with the attempt
/// number.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Configuration for a [`BridgeClient`].
pub struct BridgeConfig {
    /// Bridge base URL.
    pub url: Url,
    /// API key sent as the `x-db-api-key` header.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per action, including the first.
    pub max_attempts: u32,
    /// Optional pre-configured reqwest client. If `None`, a new client is
    /// created with the configured timeout.
    pub http_client: Option<reqwest::Client>,
}

impl BridgeConfig {
    /// Creates a config with the default timeout and retry policy.
    #[must_use]
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            http_client: None,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the total attempts per action.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets a pre-configured reqwest client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("has_http_client", &self.http_client.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of an `updateOne` action.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOutcome {
    /// Documents the filter matched.
    pub matched: u64,
    /// Documents the update modified.
    pub modified: u64,
    /// Whether the update inserted a new document.
    pub upserted: bool,
}

/// Client for the document-database bridge.
///
/// One action per POST to `{base}/{action}`; bodies carry the collection
/// name plus action-specific fields. Retries are bounded and only fire on
/// transport failures and [`RETRYABLE_STATUS`] responses, so a definitive
/// rejection (4xx validation, auth) surfaces on the first attempt.
pub struct BridgeClient {
    base: Url,
    api_key: String,
    client: reqwest::Client,
    max_attempts: u32,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base", &self.base)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Creates a new bridge client from the given configuration.
    pub fn new(mut config: BridgeConfig) -> Self {
        // Url::join replaces the last path segment unless the base ends
        // with a slash.
        if !config.url.path().ends_with('/') {
            config.url.set_path(&format!("{}/", config.url.path()));
        }
        let client = config.http_client.unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .expect("failed to build reqwest::Client")
        });
        Self {
            base: config.url,
            api_key: config.api_key,
            client,
            max_attempts: config.max_attempts,
        }
    }

    /// POSTs one bridge action, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Status`] on a definitive rejection,
    /// [`StoreError::RetriesExhausted`] when every attempt hit a transient
    /// failure, and [`StoreError::Decode`] on an unparseable body.
    pub async fn action(&self, action: &str, body: &Value) -> Result<Value, StoreError> {
        let url = self
            .base
            .join(action)
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let mut last_failure = String::new();
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BASE_DELAY * (attempt - 1)).await;
            }

            let sent = self
                .client
                .post(url.clone())
                .header("x-db-api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(action, attempt, error = %err, "bridge request failed");
                    last_failure = err.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| StoreError::Decode(e.to_string()));
            }

            let status_code = status.as_u16();
            let response_body = response.text().await.unwrap_or_default();
            if RETRYABLE_STATUS.contains(&status_code) {
                tracing::warn!(action, attempt, status = status_code, "bridge returned transient status");
                last_failure = format!("status {status_code}: {response_body}");
                continue;
            }
            return Err(StoreError::Status {
                status: status_code,
                body: response_body,
            });
        }

        Err(StoreError::RetriesExhausted {
            action: action.to_string(),
            attempts: self.max_attempts,
            message: last_failure,
        })
    }

    /// Finds a single document via `find` with `limit: 1`; the bridge
    /// exposes no dedicated single-document action.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on bridge failure.
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Value,
    ) -> Result<Option<Value>, StoreError> {
        let result = self
            .action(
                "find",
                &json!({ "collection": collection, "filter": filter, "limit": 1 }),
            )
            .await?;
        match result.get("documents") {
            Some(Value::Array(documents)) => Ok(documents.first().cloned()),
            _ => Ok(None),
        }
    }

    /// Finds all documents matching a filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on bridge failure.
    pub async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>, StoreError> {
        let result = self
            .action("find", &json!({ "collection": collection, "filter": filter }))
            .await?;
        match result.get("documents") {
            Some(Value::Array(documents)) => Ok(documents.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Inserts one document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on bridge failure.
    pub async fn insert_one(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        self.action(
            "insertOne",
            &json!({ "collection": collection, "document": document }),
        )
        .await?;
        Ok(())
    }

    /// Applies one update, optionally upserting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on bridge failure.
    pub async fn update_one(
        &self,
        collection: &str,
        filter: Value,
        update: Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        let result = self
            .action(
                "updateOne",
                &json!({
                    "collection": collection,
                    "filter": filter,
                    "update": update,
                    "upsert": upsert,
                }),
            )
            .await?;
        Ok(UpdateOutcome {
            matched: result
                .get("matchedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            modified: result
                .get("modifiedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            upserted: result
                .get("upsertedId")
                .is_some_and(|id| !id.is_null()),
        })
    }
}
