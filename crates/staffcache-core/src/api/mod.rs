//! REST API client module for the personnel records service.
//!
//! This module provides the `AuthenticatedClient`, which attaches the
//! stored credential to every call and recovers once from a rejected
//! token by refreshing it.
//!
//! The API answers with a `{success, data}` envelope and issues bearer
//! tokens through `/api/login` and `/api/refresh`.

pub mod client;
pub mod error;
pub mod types;

pub use client::AuthenticatedClient;
pub use error::{ApiError, Result};
pub use reqwest::Method;
pub use types::{ApiRequest, ApiResponse, Envelope, TokenGrant};
