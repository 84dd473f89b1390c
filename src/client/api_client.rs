//! HTTP API client
//!
//! Sends sync operations to the server. One request per operation:
//!
//! | verb | request |
//! |---|---|
//! | create | `POST {collection}` |
//! | update | `PUT {collection}/{resource_id}` |
//! | delete | `DELETE {collection}/{resource_id}` |
//!
//! Every request carries `Idempotency-Key: <operation id>` so a retried
//! operation the server already applied is not applied twice, plus a bearer
//! token when one is configured.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use crate::client::offline::dispatch::{HandlerError, OperationHandler};
use crate::shared::config::QueueConfig;
use crate::shared::operation::{OperationKind, OperationVerb, SyncOperation};

/// Used when no handler timeout is configured
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Collection path for an operation kind
pub fn collection_path(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Analysis => "/api/analyses",
        OperationKind::UserData => "/api/user-data",
        OperationKind::Notification => "/api/notifications",
        OperationKind::Preference => "/api/preferences",
    }
}

/// Map a response status onto the handler contract
///
/// 408, 425, 429 and 5xx are worth retrying; any other non-2xx status means
/// the request will never succeed as sent.
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), HandlerError> {
    if status.is_success() {
        return Ok(());
    }

    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, body)
    };

    match status.as_u16() {
        408 | 425 | 429 => Err(HandlerError::transient(message)),
        _ if status.is_server_error() => Err(HandlerError::transient(message)),
        _ => Err(HandlerError::permanent(message)),
    }
}

fn classify_transport(error: reqwest::Error) -> HandlerError {
    if error.is_builder() {
        HandlerError::permanent(format!("invalid request: {}", error))
    } else if error.is_timeout() {
        HandlerError::transient(format!("request timed out: {}", error))
    } else {
        HandlerError::transient(format!("network error: {}", error))
    }
}

/// Thin wrapper over `reqwest::Client` bound to one API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &QueueConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.handler_timeout().unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build the request for an operation without sending it
    pub fn request_for(&self, operation: &SyncOperation) -> Result<RequestBuilder, HandlerError> {
        let collection = self.endpoint(collection_path(operation.kind()));

        let resource_url = || {
            operation
                .payload
                .resource_id()
                .map(|id| format!("{}/{}", collection, id))
                .ok_or_else(|| {
                    HandlerError::permanent(format!(
                        "{} {} needs a resource id",
                        operation.operation,
                        operation.kind()
                    ))
                })
        };

        let request = match operation.operation {
            OperationVerb::Create => self.client.post(&collection),
            OperationVerb::Update => self.client.put(resource_url()?),
            OperationVerb::Delete => self.client.delete(resource_url()?),
        };

        let mut request = request.header(IDEMPOTENCY_HEADER, operation.id.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        if operation.operation != OperationVerb::Delete {
            let body = operation
                .payload
                .body()
                .map_err(|e| HandlerError::permanent(format!("cannot encode payload: {}", e)))?;
            request = request.json(&body);
        }
        Ok(request)
    }

    /// Send an operation and classify the outcome
    pub async fn send(&self, operation: &SyncOperation) -> Result<(), HandlerError> {
        let response = self
            .request_for(operation)?
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("[Api] {} {} -> {}", operation.operation, operation.id, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

/// Sends every operation kind through [`ApiClient`]
#[derive(Debug, Clone)]
pub struct HttpOperationHandler {
    client: ApiClient,
}

impl HttpOperationHandler {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(ApiClient::new(config)?))
    }
}

#[async_trait]
impl OperationHandler for HttpOperationHandler {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), HandlerError> {
        self.client.send(operation).await
    }
}
