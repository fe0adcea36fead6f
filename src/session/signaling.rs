//! Session signaling client
//!
//! The session backend is the out-of-band channel used to exchange the
//! offer/answer pair: the client attaches its offer to the session record
//! with `start`, and the host's answer shows up on the same record, which
//! is observed by polling `get`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::model::{CreateSessionRequest, EndSessionRequest, Session, StartSessionRequest};
use crate::config::ApiConfig;
use crate::error::{AppError, Result};

/// Request/response boundary to the session backend
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Create a new `PENDING` session
    async fn create(&self, request: CreateSessionRequest) -> Result<Session>;

    /// Attach the local offer to the session record
    ///
    /// Not guaranteed to be idempotent; a second call may be rejected.
    async fn start(&self, session_id: &str, offer_sdp: &str) -> Result<Session>;

    /// Move the session to a terminal state
    async fn end(&self, session_id: &str, reason: Option<&str>) -> Result<Session>;

    /// Fetch the current record
    async fn get(&self, session_id: &str) -> Result<Session>;
}

/// Signaling client backed by the REST session API
pub struct HttpSignalingClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpSignalingClient {
    /// Create a client from API configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Replace the bearer token (refreshed by the external auth collaborator)
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token.filter(|t| !t.is_empty());
    }

    fn sessions_url(&self, path: &str) -> String {
        format!("{}/sessions{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body
            };
            return Err(AppError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Session> {
        let url = self.sessions_url(path);
        debug!("POST {}", url);
        self.send(self.request(Method::POST, &url).json(body)).await
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn create(&self, request: CreateSessionRequest) -> Result<Session> {
        let session = self.post("/create", &request).await?;
        info!(
            session_id = %session.id,
            host_id = %request.host_id,
            "Session created"
        );
        Ok(session)
    }

    async fn start(&self, session_id: &str, offer_sdp: &str) -> Result<Session> {
        let request = StartSessionRequest {
            webrtc_offer: offer_sdp.to_string(),
        };
        let session = self
            .post(&format!("/{}/start", session_id), &request)
            .await?;
        info!(session_id, "Offer submitted");
        Ok(session)
    }

    async fn end(&self, session_id: &str, reason: Option<&str>) -> Result<Session> {
        let request = EndSessionRequest::with_reason(reason);
        let session = self.post(&format!("/{}/end", session_id), &request).await?;
        info!(session_id, reason = reason.unwrap_or(""), "Session ended");
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Session> {
        let url = self.sessions_url(&format!("/{}", session_id));
        debug!("GET {}", url);
        self.send(self.request(Method::GET, &url)).await
    }
}
