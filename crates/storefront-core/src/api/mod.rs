//! REST API client module for the storefront backend.
//!
//! This module provides the `ApiClient` facade used by the rest of the
//! application. Requests carry the stored bearer credential; when the
//! backend rejects it, a single refresh call obtains a new one and every
//! request that failed in the meantime is replayed with it.
//!
//! The refresh endpoint itself authenticates with an HTTP-only cookie and
//! answers `{ "access_token": "..." }`.

pub mod authenticator;
pub mod client;
pub mod error;
pub mod refresh;
pub mod request;

pub use client::{ApiClient, ApiClientBuilder, ReauthCallback};
pub use error::ApiError;
pub use refresh::{Admission, PendingRequest, RefreshCoordinator};
pub use request::{ApiRequest, RequestOptions};
