//! Authenticated client for the personnel records API.
//!
//! Every request carries the current credential. A 401 from the server
//! triggers one coordinated refresh and one retry; concurrent callers that
//! hit a 401 for the same credential share a single refresh.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{Credential, CredentialStore};

use super::types::{ApiRequest, ApiResponse, Envelope, LoginRequest, TokenGrant};
use super::{ApiError, Result};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/api/login";
const REFRESH_PATH: &str = "/api/refresh";
const LOGOUT_PATH: &str = "/api/logout";

/// HTTP request timeout in seconds when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Issues HTTP calls under the authority of the current credential.
/// Clone is cheap - the connection pool, store and refresh gate are shared.
#[derive(Clone)]
pub struct AuthenticatedClient {
    client: Client,
    base_url: String,
    credentials: CredentialStore,
    // Held for the duration of a refresh; see `refresh_once`
    refresh_gate: Arc<Mutex<()>>,
}

impl AuthenticatedClient {
    pub fn new(base_url: &str, credentials: CredentialStore) -> Result<Self> {
        Self::with_timeout(
            base_url,
            credentials,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        credentials: CredentialStore,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            refresh_gate: Arc::new(Mutex::new(())),
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // ===== Session lifecycle =====

    /// Exchange username and password for a credential and persist it.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let response = ApiResponse::read(response).await?;

        let envelope: Envelope<TokenGrant> = match response.json() {
            Ok(envelope) => envelope,
            Err(_) if !response.is_success() => {
                return Err(ApiError::LoginFailed(format!("HTTP {}", response.status)));
            }
            Err(e) => return Err(e),
        };
        if !response.is_success() || !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            return Err(ApiError::LoginFailed(message));
        }
        let grant = envelope
            .data
            .ok_or_else(|| ApiError::InvalidResponse("Login response has no data".to_string()))?;

        let credential = Credential::from_grant(
            grant.access_token,
            grant.token_type,
            grant.expires_in,
            grant.user.unwrap_or_default(),
        )
        .ok_or_else(|| invalid_lifetime(grant.expires_in))?;
        self.credentials.save(&credential);
        info!(username, expires_at = %credential.expires_at, "Login successful");
        Ok(credential)
    }

    /// Best-effort server-side logout. Local state is cleared regardless of
    /// what the server says.
    pub async fn logout(&self) {
        if let Some(credential) = self.credentials.valid_credential() {
            let result = self
                .client
                .post(self.url(LOGOUT_PATH))
                .header(header::AUTHORIZATION, credential.authorization())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Server session invalidated");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "Logout rejected by server, ignoring");
                }
                Err(e) => {
                    warn!(error = %e, "Logout request failed, ignoring");
                }
            }
        }
        self.credentials.clear();
        info!("Logged out");
    }

    /// Renew the credential through the refresh endpoint.
    ///
    /// Returns `false` and clears the store on any failure.
    pub async fn refresh(&self) -> bool {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Refresh unless the credential already moved past `observed_generation`
    /// while this caller waited for the gate. Waiters then reuse whatever the
    /// winning refresh left in the store.
    async fn refresh_once(&self, observed_generation: u64) -> bool {
        let _gate = self.refresh_gate.lock().await;
        if self.credentials.generation() != observed_generation {
            debug!(observed_generation, "Credential renewed concurrently, skipping refresh");
            return self.credentials.is_valid();
        }
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> bool {
        match self.request_refresh().await {
            Ok(credential) => {
                self.credentials.save(&credential);
                info!(expires_at = %credential.expires_at, "Credential refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, clearing session");
                self.credentials.clear();
                false
            }
        }
    }

    async fn request_refresh(&self) -> Result<Credential> {
        // The current credential may be close to expiry; send it anyway
        let current = self.credentials.load().ok_or(ApiError::Unauthenticated)?;

        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, current.authorization())
            .send()
            .await?;
        let grant: TokenGrant = ApiResponse::read(response)
            .await?
            .error_for_status()?
            .data()?;

        Credential::from_grant(
            grant.access_token,
            grant.token_type,
            grant.expires_in,
            grant.user.unwrap_or(current.user),
        )
        .ok_or_else(|| invalid_lifetime(grant.expires_in))
    }

    // ===== Requests =====

    /// Perform one logical exchange with at most one refresh and one retry.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let (generation, credential) = self.credentials.snapshot();
        let credential = credential.ok_or(ApiError::Unauthenticated)?;

        let response = self.dispatch(request, &credential).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(method = %request.method, path = %request.path, "Request rejected with 401, refreshing credential");
        if !self.refresh_once(generation).await {
            return Err(ApiError::AuthExpired);
        }
        let renewed = self
            .credentials
            .valid_credential()
            .ok_or(ApiError::AuthExpired)?;

        debug!(method = %request.method, path = %request.path, "Retrying with renewed credential");
        self.dispatch(request, &renewed).await
    }

    async fn dispatch(&self, request: &ApiRequest, credential: &Credential) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, credential.authorization());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        ApiResponse::read(response).await
    }
}

fn invalid_lifetime(expires_in: i64) -> ApiError {
    ApiError::InvalidResponse(format!("Token lifetime out of range: {expires_in}s"))
}
