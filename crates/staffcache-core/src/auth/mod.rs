//! Authentication state for the data-access layer.
//!
//! This module provides:
//! - `CredentialStore`: the persisted credential and its validity checks
//! - `KeyValueStorage`: backends for the four persisted credential fields
//!   (memory, JSON file, OS keychain)
//!
//! A credential is valid while its token is non-empty and its absolute
//! expiry lies in the future; stale credentials are cleared when queried.

pub mod credentials;
pub mod storage;

pub use credentials::{Credential, CredentialStore};
pub use storage::{FileStorage, KeyValueStorage, KeyringStorage, MemoryStorage};
