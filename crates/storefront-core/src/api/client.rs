//! API client for communicating with the storefront REST API.
//!
//! Every verb funnels through [`ApiClient::execute`], which attaches the
//! stored bearer credential, and on a 401 hands the request to the refresh
//! coordinator. The first 401 of an episode spawns the single refresh call;
//! every 401 that arrives while it is outstanding is parked and replayed, in
//! arrival order, once it settles.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{Credential, CredentialStore};
use crate::config::ClientConfig;

use super::authenticator;
use super::refresh::{Admission, PendingRequest, RefreshCoordinator};
use super::{ApiError, ApiRequest, RequestOptions};

/// Invoked once per failed refresh episode so the host can send the user
/// back through login.
pub type ReauthCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
}

struct ClientInner {
    http: Client,
    base_url: Url,
    refresh_url: Url,
    refresh_method: Method,
    refresh_timeout: Duration,
    store: CredentialStore,
    coordinator: RefreshCoordinator,
    on_reauth: ReauthCallback,
}

/// API client for the storefront backend.
/// Clone is cheap - all clones share the credential slot and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Option<CredentialStore>,
    on_reauth: Option<ReauthCallback>,
    http: Option<Client>,
}

impl ApiClientBuilder {
    /// Use `store` instead of an empty in-memory store
    pub fn store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn on_reauth(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reauth = Some(Arc::new(callback));
        self
    }

    /// Share an existing connection pool. The caller is responsible for
    /// enabling the cookie store if the refresh endpoint relies on cookies.
    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let base_url = Url::parse(&self.config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.config.base_url, e)))?;
        let refresh_url = resolve(&base_url, &self.config.refresh_path)?;

        let http = match self.http {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.config.request_timeout())
                .cookie_store(true)
                .build()?,
        };

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                refresh_url,
                refresh_method: self.config.refresh_method.as_method(),
                refresh_timeout: self.config.refresh_timeout(),
                store: self.store.unwrap_or_default(),
                coordinator: RefreshCoordinator::new(),
                on_reauth: self.on_reauth.unwrap_or_else(|| Arc::new(|| {})),
            }),
        })
    }
}

/// Join a request path onto the base URL; absolute URLs pass through.
fn resolve(base: &Url, path: &str) -> Result<Url, ApiError> {
    let raw = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
}

/// Same origin and path, ignoring query and a trailing slash
fn same_endpoint(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin() && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store: None,
            on_reauth: None,
            http: None,
        }
    }

    /// Create a client with default collaborators
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        Self::builder(config).build()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Store a credential obtained by the login flow
    pub fn login(&self, credential: Credential) {
        self.inner.store.set(credential);
    }

    pub fn logout(&self) {
        self.inner.store.clear();
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing()
    }

    /// Requests parked behind the in-flight refresh, including the one that triggered it
    pub fn queued_requests(&self) -> usize {
        self.inner.coordinator.queued()
    }

    // ===== Verbs =====

    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        self.request::<()>(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ApiError> {
        self.request::<()>(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.get(path).await?;
        Self::parse_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.post(path, body).await?;
        Self::parse_json(response, path).await
    }

    /// Issue any verb with an optional JSON body and per-request options
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let mut request = ApiRequest::new(method, path).with_options(options);
        if let Some(body) = body {
            request = request.with_body(serde_json::to_value(body)?);
        }
        self.execute(request).await
    }

    /// The single pipeline every call goes through.
    pub async fn execute(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let url = resolve(&self.inner.base_url, &request.path)?;
        let is_refresh_call = same_endpoint(&url, &self.inner.refresh_url);

        let response = self.send(&request, url).await?;

        // The refresh endpoint's own 401 goes straight back to its caller
        if response.status() != StatusCode::UNAUTHORIZED || is_refresh_call {
            return Self::check_response(response).await;
        }

        debug!(
            method = %request.method,
            path = %request.path,
            "Authorization failure, deferring to refresh coordinator"
        );
        self.await_refresh(request).await
    }

    // ===== Pipeline =====

    async fn send(&self, request: &ApiRequest, url: Url) -> Result<Response, ApiError> {
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .inner
            .http
            .request(request.method.clone(), url)
            .headers(request.options.headers.clone());
        if !request.options.query.is_empty() {
            builder = builder.query(&request.options.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.options.timeout {
            builder = builder.timeout(timeout);
        }

        let mut http_request = builder.build()?;
        authenticator::attach(http_request.headers_mut(), self.inner.store.get().as_ref());

        Ok(self.inner.http.execute(http_request).await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    // ===== Refresh episode =====

    /// Park the request behind the refresh, starting one if none is running.
    async fn await_refresh(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let (pending, outcome) = PendingRequest::new(request);

        match self.inner.coordinator.admit(pending) {
            Admission::Leader => {
                // Detached so dropping this caller's future cannot strand the queue
                let client = self.clone();
                tokio::spawn(async move { client.run_episode().await });
            }
            Admission::Queued => {
                debug!(queued = self.queued_requests(), "Parked behind in-flight refresh");
            }
        }

        outcome
            .await
            .unwrap_or_else(|_| Err(ApiError::RefreshAborted))
    }

    async fn run_episode(&self) {
        info!("Access token rejected, refreshing");

        match self.refresh_credential().await {
            Ok(credential) => {
                // Store first: every replay reads the new token at attach time
                self.inner.store.set(credential);
                let pending = self.inner.coordinator.settle();
                info!(replays = pending.len(), "Access token refreshed, replaying requests");

                // join_all polls in order, so replays are issued in arrival order
                let replays = pending.into_iter().map(|pending| async move {
                    let outcome = self.replay(pending.request()).await;
                    pending.settle(outcome);
                });
                join_all(replays).await;
            }
            Err(err) => {
                self.inner.store.clear();
                let pending = self.inner.coordinator.settle();
                warn!(
                    error = %err,
                    rejected = pending.len(),
                    "Access token refresh failed, re-authentication required"
                );

                let cause = Arc::new(err);
                for pending in pending {
                    pending.settle(Err(ApiError::RefreshFailed(Arc::clone(&cause))));
                }
                (self.inner.on_reauth)();
            }
        }
    }

    /// Replays are not coordinated: a second 401 is returned as-is.
    async fn replay(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let url = resolve(&self.inner.base_url, &request.path)?;
        let response = self.send(request, url).await?;
        Self::check_response(response).await
    }

    async fn refresh_credential(&self) -> Result<Credential, ApiError> {
        let timeout = self.inner.refresh_timeout;
        match tokio::time::timeout(timeout, self.call_refresh_endpoint()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::RefreshTimeout(timeout)),
        }
    }

    /// The refresh endpoint authenticates via cookie, so no bearer is attached.
    async fn call_refresh_endpoint(&self) -> Result<Credential, ApiError> {
        let response = self
            .inner
            .http
            .request(self.inner.refresh_method.clone(), self.inner.refresh_url.clone())
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let body: RefreshResponse = response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e))
        })?;

        match body.access_token {
            Some(token) if !token.is_empty() => Ok(Credential::new(token)),
            _ => Err(ApiError::InvalidResponse(
                "Refresh response did not contain an access token".to_string(),
            )),
        }
    }
}
