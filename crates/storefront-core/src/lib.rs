//! Core library for the storefront client.
//!
//! Provides the authenticated HTTP pipeline shared by every screen of the
//! storefront and admin console:
//! - `auth`: the bearer credential and where it is kept
//! - `api`: the client facade, request authenticator and refresh coordinator
//! - `config`: base URL, refresh endpoint, timeouts and storage selection

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, ApiRequest, RequestOptions};
pub use auth::{Credential, CredentialStore};
pub use config::ClientConfig;
