//! Authentication module for holding the bearer credential.
//!
//! This module provides:
//! - `Credential`: the opaque bearer token presented on each request
//! - `CredentialStore`: the single process-wide credential slot
//! - `TokenPersistence`: durable backends (OS keychain, token file, memory)
//!
//! The credential carries no expiry metadata; it is only known to be stale
//! once the server rejects a request with it.

pub mod credential;
pub mod persistence;
pub mod store;

pub use credential::Credential;
pub use persistence::{
    FilePersistence, KeyringPersistence, MemoryPersistence, StoreError, TokenPersistence,
};
pub use store::CredentialStore;
