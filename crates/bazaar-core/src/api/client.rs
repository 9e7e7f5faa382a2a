//! HTTP client for the marketplace REST service.
//!
//! Only the account endpoints the session core depends on live here: the
//! current-profile fetch and login. Business endpoints (listings, feeds,
//! comments) belong to their screens.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::models::{LoginRequest, LoginResponse, Profile};

use super::{ApiError, FetchError};

// ============================================================================
// Constants
// ============================================================================

/// Path of the current-profile endpoint, relative to the base URL
const PROFILE_PATH: &str = "/users/me";

/// Path of the login endpoint, relative to the base URL
const LOGIN_PATH: &str = "/auth/login";

/// Default HTTP request timeout in seconds.
/// Bootstrap waits on this call behind the splash screen, so keep it short.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 500;

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    user: Profile,
}

/// Account calls the session core makes against the backend.
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Fetch the profile the credential belongs to.
    async fn fetch_current_profile(&self, credential: &Credential) -> Result<Profile, FetchError>;

    /// Exchange email and password for a credential and profile.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;
}

/// API client for the marketplace backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Decode a JSON body, reporting schema mismatches as `InvalidResponse`
    /// rather than as network errors.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    fn authorized(&self, builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
        builder
            .header(header::ACCEPT, "application/json")
            .bearer_auth(credential.expose())
    }

    /// GET an authenticated resource, retrying on 429 with exponential backoff.
    pub async fn get_authenticated<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &Credential,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self
                .authorized(self.client.get(&url), credential)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::decode(response).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        warn!(url = %url, "Rate limit retries exhausted");
                        return Err(ApiError::RateLimited);
                    }
                    debug!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl AccountApi for ApiClient {
    async fn fetch_current_profile(&self, credential: &Credential) -> Result<Profile, FetchError> {
        let profile: Profile = self.get_authenticated(PROFILE_PATH, credential).await?;
        debug!(user_id = %profile.id, "Fetched current profile");
        Ok(profile)
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let auth: AuthResponse = Self::decode(response).await?;

        if auth.token.is_empty() {
            return Err(ApiError::InvalidResponse("Login response carried an empty token".to_string()));
        }

        Ok(LoginResponse {
            credential: Credential::new(auth.token),
            profile: auth.user,
        })
    }
}
