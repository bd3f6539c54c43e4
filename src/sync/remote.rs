//! Remote Store Boundary
//!
//! Strategies apply mutations through the `RemoteStore` trait; the HTTP
//! implementation talks to the Courtside API. Errors carry a
//! retryable/permanent distinction so the queue manager can tell a network
//! blip from a structurally invalid request.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unauthorized - login required")]
    Unauthorized,

    #[error("Remote record not found: {0}")]
    NotFound(String),

    #[error("Validation rejected: {0}")]
    Validation(String),

    #[error("Conflict with existing record: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response from server")]
    InvalidResponse,
}

impl RemoteError {
    /// Whether retrying the same request later can plausibly succeed.
    ///
    /// Network failures, 5xx, and rate limiting are transient; 4xx
    /// validation and missing-record responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::RateLimitExceeded | Self::Server(_) => true,
            Self::Unauthorized
            | Self::NotFound(_)
            | Self::Validation(_)
            | Self::Conflict(_)
            | Self::InvalidResponse => false,
        }
    }
}

// ============================================================================
// Remote Store Trait
// ============================================================================

/// Narrow per-entity contract the engine consumes from the remote store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record; returns the record as stored, including the
    /// remote-assigned id
    async fn insert(&self, entity: &str, record: &Value) -> Result<Value, RemoteError>;

    /// Update fields of an existing record; returns the full updated record
    async fn update(&self, entity: &str, id: &str, fields: &Value) -> Result<Value, RemoteError>;

    /// Delete a record by id
    async fn delete(&self, entity: &str, id: &str) -> Result<(), RemoteError>;

    /// Fetch a record by id; `None` when it does not exist
    async fn fetch(&self, entity: &str, id: &str) -> Result<Option<Value>, RemoteError>;
}

// ============================================================================
// HTTP Implementation
// ============================================================================

/// REST route segment for an entity
fn entity_route(entity: &str) -> &str {
    match entity {
        "match" => "matches",
        "club" => "clubs",
        "club_member" => "club_members",
        "user" => "users",
        "challenge" => "challenges",
        "invitation" => "invitations",
        "invitation_participant" => "invitation_participants",
        other => other,
    }
}

/// HTTP client for the Courtside API
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    /// Bearer token (cached in memory)
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Set access token (after login)
    pub async fn set_token(&self, token: String) {
        let mut guard = self.access_token.write().await;
        *guard = Some(token);
    }

    /// Clear token (logout)
    pub async fn clear_token(&self) {
        let mut guard = self.access_token.write().await;
        *guard = None;
    }

    async fn token(&self) -> Result<String, RemoteError> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or(RemoteError::Unauthorized)
    }

    fn url(&self, entity: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, entity_route(entity), id),
            None => format!("{}/{}", self.base_url, entity_route(entity)),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn insert(&self, entity: &str, record: &Value) -> Result<Value, RemoteError> {
        let token = self.token().await?;

        let response = self
            .client
            .post(self.url(entity, None))
            .bearer_auth(token)
            .json(record)
            .send()
            .await?;

        handle_response(response).await
    }

    async fn update(&self, entity: &str, id: &str, fields: &Value) -> Result<Value, RemoteError> {
        let token = self.token().await?;

        let response = self
            .client
            .patch(self.url(entity, Some(id)))
            .bearer_auth(token)
            .json(fields)
            .send()
            .await?;

        handle_response(response).await
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<(), RemoteError> {
        let token = self.token().await?;

        let response = self
            .client
            .delete(self.url(entity, Some(id)))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(handle_error(response).await)
        }
    }

    async fn fetch(&self, entity: &str, id: &str) -> Result<Option<Value>, RemoteError> {
        let token = self.token().await?;

        let response = self
            .client
            .get(self.url(entity, Some(id)))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        handle_response(response).await.map(Some)
    }
}

/// Handle successful JSON response
async fn handle_response(response: reqwest::Response) -> Result<Value, RemoteError> {
    let status = response.status();

    if status.is_success() {
        response
            .json::<Value>()
            .await
            .map_err(|_| RemoteError::InvalidResponse)
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to RemoteError
async fn handle_error(response: reqwest::Response) -> RemoteError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT => RemoteError::Conflict(body),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimitExceeded,
        s if s.is_client_error() => RemoteError::Validation(format!("{status}: {body}")),
        _ => RemoteError::Server(format!("{status}: {body}")),
    }
}

// ============================================================================
// Tests
// ============================================================================
