//! Request and response shapes shared by the authenticated and cached clients.

use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{ApiError, Result};

/// One logical HTTP exchange issued by the page layer.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/api/pegawai`
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// GET and HEAD never change server state
    pub fn is_read(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// A fully read HTTP response.
///
/// Cache hits are synthesized into the same shape, so callers cannot tell a
/// hit from a miss except through `from_cache`.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
    pub from_cache: bool,
}

impl ApiResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let body = response.text().await?;
        Ok(Self {
            status,
            body,
            from_cache: false,
        })
    }

    /// A 200 response wrapping a cached payload
    pub fn cached(value: &Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: value.to_string(),
            from_cache: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body as arbitrary JSON.
    pub fn json_value(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Decode the `{success, data}` envelope and return `data`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        let envelope: Envelope<T> = self.json()?;
        envelope.into_data()
    }

    /// Turn a non-2xx status into the matching `ApiError`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }
}

/// Standard response envelope of the personnel API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn into_data(self) -> Result<T> {
        if !self.success {
            return Err(ApiError::InvalidResponse(
                self.message
                    .unwrap_or_else(|| "Request reported failure".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("Response has no data".to_string()))
    }
}

/// Token grant returned by the login and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}
