//! Primary REST Client
//!
//! Token authentication and instrument listing over the Primary REST API.
//!
//! # Authentication Flow
//!
//! 1. `POST {api_url}auth/getToken` with `X-Username` / `X-Password` headers
//! 2. Token returned in the `X-Auth-Token` response header
//! 3. Every later request, REST or WebSocket upgrade, carries `X-Auth-Token`
//!
//! A 401 or 403 on the token request means the credentials were rejected.
//! That is terminal: retrying cannot fix it.

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, StatusCode};

use super::messages::InstrumentsResponse;
use crate::infrastructure::config::{BrokerSettings, Credentials};

/// Header carrying the session token.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Timeout for every REST request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while obtaining a token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// Credentials were rejected.
    #[error("authentication failed ({status}): check PYROFEX_USER and PYROFEX_PASSWORD")]
    InvalidCredentials {
        /// HTTP status returned by the broker.
        status: u16,
    },

    /// The broker answered without a token.
    #[error("authentication response carried no {AUTH_TOKEN_HEADER} header")]
    MissingToken,

    /// Unexpected HTTP status.
    #[error("authentication endpoint returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Network or TLS failure.
    #[error("authentication request failed: {0}")]
    Transport(String),
}

impl AuthError {
    /// Whether retrying can never succeed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. })
    }
}

/// Errors from REST calls other than authentication.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Could not obtain a token.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Network or TLS failure.
    #[error("request failed: {0}")]
    Transport(String),

    /// Unexpected HTTP status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        /// Endpoint path.
        endpoint: &'static str,
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response did not match the expected schema.
    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse {
        /// Endpoint path.
        endpoint: &'static str,
        /// Parse error.
        message: String,
    },

    /// Broker reported an application-level error.
    #[error("broker error: {0}")]
    Api(String),
}

// =============================================================================
// Client
// =============================================================================

/// REST client for the Primary API with a cached session token.
pub struct PrimaryRestClient {
    client: Client,
    api_url: String,
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for PrimaryRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryRestClient")
            .field("api_url", &self.api_url)
            .field("credentials", &self.credentials)
            .field("has_token", &self.token.read().is_some())
            .finish_non_exhaustive()
    }
}

impl PrimaryRestClient {
    /// Create a client for the configured broker.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::Client`] if the HTTP client cannot be built.
    pub fn new(settings: &BrokerSettings) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            credentials: settings.credentials.clone(),
            token: RwLock::new(None),
        })
    }

    /// Base URL, always ending in `/`.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Request a fresh token and cache it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] on 401/403, other variants
    /// for transient failures.
    pub async fn authenticate(&self) -> Result<String, AuthError> {
        let url = format!("{}auth/getToken", self.api_url);
        tracing::debug!(url = %url, user = %self.credentials.user(), "Requesting session token");

        let response = self
            .client
            .post(&url)
            .header("X-Username", self.credentials.user())
            .header("X-Password", self.credentials.password())
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AuthError::InvalidCredentials {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let token = response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(AuthError::MissingToken)?;

        *self.token.write() = Some(token.clone());
        tracing::info!("Authenticated with broker");
        Ok(token)
    }

    /// Cached token, authenticating first if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if a new token is needed and cannot be obtained.
    pub async fn token(&self) -> Result<String, AuthError> {
        let cached = self.token.read().clone();
        match cached {
            Some(token) => Ok(token),
            None => self.authenticate().await,
        }
    }

    /// Drop the cached token so the next call re-authenticates.
    pub fn invalidate_token(&self) {
        *self.token.write() = None;
    }

    /// Fetch every listed instrument.
    ///
    /// An expired token is renewed once.
    ///
    /// # Errors
    ///
    /// Returns [`RestError`] on authentication, transport, status or schema
    /// failures, or when the broker answers `"status": "ERROR"`.
    pub async fn fetch_instruments(&self) -> Result<InstrumentsResponse, RestError> {
        const ENDPOINT: &str = "rest/instruments/all";
        let url = format!("{}{ENDPOINT}", self.api_url);

        let mut renewed = false;
        loop {
            let token = self.token().await?;
            let response = self
                .client
                .get(&url)
                .header(AUTH_TOKEN_HEADER, token)
                .send()
                .await
                .map_err(|e| RestError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !renewed {
                tracing::debug!("Session token expired, renewing");
                self.invalidate_token();
                renewed = true;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RestError::Status {
                    endpoint: ENDPOINT,
                    status: status.as_u16(),
                    body,
                });
            }

            let listing: InstrumentsResponse =
                response
                    .json()
                    .await
                    .map_err(|e| RestError::InvalidResponse {
                        endpoint: ENDPOINT,
                        message: e.to_string(),
                    })?;

            if !listing.status.eq_ignore_ascii_case("ok") {
                return Err(RestError::Api(
                    listing
                        .description
                        .unwrap_or_else(|| format!("status {}", listing.status)),
                ));
            }

            return Ok(listing);
        }
    }
}
