//! Authenticated App Store Connect HTTP client.
//!
//! [`Client`] signs every request with the resolved credential, retries
//! transient failures with bounded backoff, records quota headers, and
//! routes every server-supplied URL through [`RedirectGuard`].

mod error;
mod pagination;
mod rate_limit;
mod redirect;
mod retry;
mod stream;

pub use error::{ApiError, ApiErrorKind, sanitize};
pub use pagination::{
    Page, PageLinks, PageMeta, Paginated, Paging, PaginationLimits, paginate_all,
    paginate_all_with_observer,
};
pub use rate_limit::{
    DEFAULT_NEAR_LIMIT_RATIO, RATE_LIMIT_HEADER, RateLimitInfo, RateLimitWindow, summarize,
};
pub use redirect::{DEFAULT_STORAGE_HOSTS, RedirectGuard};
pub use retry::{DEFAULT_MAX_RETRY_AFTER, ExponentialBackoff, RetryConfig};
pub use stream::ResponseStream;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{Credential, TokenSigner};
use crate::config::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, Settings};
use crate::{Error, Result};

const USER_AGENT: &str = concat!("asc-core/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Response media type to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accept {
    #[default]
    Json,
    /// Gzip report streams (sales and finance reports).
    Gzip,
}

impl Accept {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accept::Json => "application/json",
            Accept::Gzip => "application/a-gzip",
        }
    }
}

#[derive(Clone, Copy)]
enum Auth {
    Bearer,
    None,
}

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    unauthenticated: reqwest::Client,
    base_url: Url,
    credential: Credential,
    signer: Arc<TokenSigner>,
    guard: RedirectGuard,
    retry: RetryConfig,
    timeout: Duration,
    pagination: PaginationLimits,
    last_rate_limit: Arc<RwLock<Option<RateLimitInfo>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn signer(&self) -> &Arc<TokenSigner> {
        &self.signer
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn guard(&self) -> &RedirectGuard {
        &self.guard
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Quota headers from the most recent response that carried them.
    pub fn last_rate_limit(&self) -> Option<RateLimitInfo> {
        self.last_rate_limit
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Signed request returning the buffered body.
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let url = self.url_for(path)?;
        let response = self
            .execute(method, url, body, Accept::Json, Auth::Bearer, cancel)
            .await?;
        self.read_body(response, cancel).await
    }

    /// Signed request returning the body unread.
    pub async fn dispatch_stream(
        &self,
        method: Method,
        path: &str,
        accept: Accept,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream> {
        let url = self.url_for(path)?;
        let response = self
            .execute(method, url, None, accept, Auth::Bearer, cancel)
            .await?;
        Ok(ResponseStream::new(response, cancel, self.timeout))
    }

    /// Fetch a presigned download URL without credentials.
    pub async fn dispatch_stream_unauthenticated(
        &self,
        url: &str,
        accept: Accept,
        cancel: &CancellationToken,
    ) -> Result<ResponseStream> {
        let url = self.guard.validate_presigned(url)?;
        let response = self
            .execute(Method::GET, url, None, accept, Auth::None, cancel)
            .await?;
        Ok(ResponseStream::new(response, cancel, self.timeout))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let body = self.dispatch(Method::GET, path, None, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let payload = Bytes::from(serde_json::to_vec(body)?);
        let body = self.dispatch(method, path, Some(payload), cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        self.dispatch(Method::DELETE, path, None, cancel).await?;
        Ok(())
    }

    /// Fetch a server-supplied next link after validating its origin.
    pub async fn follow_next<P: DeserializeOwned>(
        &self,
        next: &str,
        cancel: &CancellationToken,
    ) -> Result<P> {
        let url = self.guard.validate_next(next)?;
        let response = self
            .execute(Method::GET, url, None, Accept::Json, Auth::Bearer, cancel)
            .await?;
        let body = self.read_body(response, cancel).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// First page of `path` plus every following page.
    pub async fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Page<T>> {
        self.paginate_with_observer(path, cancel, |_, _| {}).await
    }

    /// [`Client::paginate`] for any [`Paginated`] response, reporting progress.
    pub async fn paginate_with_observer<P, O>(
        &self,
        path: &str,
        cancel: &CancellationToken,
        observer: O,
    ) -> Result<P>
    where
        P: Paginated + DeserializeOwned,
        O: FnMut(usize, &str),
    {
        let first: P = self.get_json(path, cancel).await?;
        paginate_all_with_observer(
            first,
            self.pagination,
            |next| async move { self.follow_next::<P>(&next, cancel).await },
            observer,
        )
        .await
    }

    /// Relative paths join the base URL; absolute URLs must share its origin.
    fn url_for(&self, path: &str) -> Result<Url> {
        if path.starts_with('/') || Url::parse(path).is_ok() {
            return self.guard.validate_next(path);
        }
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("invalid request path {:?}: {}", path, e)))
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
        accept: Accept,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            match self
                .attempt(&method, &url, body.clone(), accept, auth, cancel)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.retry.max_retries || !self.retry.should_retry(&e) {
                        return Err(e);
                    }
                    attempt += 1;
                    let Some(delay) = self.retry.delay_for(attempt, &e) else {
                        tracing::warn!(
                            error = %e,
                            max_retry_after_s = self.retry.max_retry_after.as_secs(),
                            url = %url,
                            "Server asked to wait longer than allowed; not retrying"
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        url = %url,
                        "Retrying request"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<Bytes>,
        accept: Accept,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut request = match auth {
            Auth::Bearer => {
                let token = self.signer.sign(&self.credential).await?;
                self.http
                    .request(method.clone(), url.clone())
                    .bearer_auth(token.bearer())
            }
            Auth::None => self.unauthenticated.request(method.clone(), url.clone()),
        }
        .header(ACCEPT, accept.as_str());

        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        tracing::debug!(method = %method, url = %url, "Sending request");
        let response = self.with_deadline(request.send(), cancel).await??;
        let status = response.status();
        self.record_rate_limit(response.headers());

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = match self.read_body(response, cancel).await {
            Ok(body) => body,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) => Bytes::new(),
        };
        let error = ApiError::from_response(status.as_u16(), &body).with_retry_after(retry_after);

        if error.kind == ApiErrorKind::Unauthorized && matches!(auth, Auth::Bearer) {
            self.signer.invalidate(&self.credential.name).await;
        }
        tracing::debug!(status = status.as_u16(), kind = ?error.kind, url = %url, "Request failed");
        Err(Error::Api(error))
    }

    async fn read_body(&self, response: Response, cancel: &CancellationToken) -> Result<Bytes> {
        self.with_deadline(response.bytes(), cancel)
            .await?
            .map_err(Error::Network)
    }

    /// Race `fut` against the per-attempt timeout and `cancel`; the losing
    /// future is dropped, closing its connection.
    async fn with_deadline<F, T>(&self, fut: F, cancel: &CancellationToken) -> Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, fut) => {
                result.map_err(|_| Error::Timeout(self.timeout))
            }
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let Some(info) = RateLimitInfo::from_headers(headers) else {
            return;
        };
        if info.is_near_limit(DEFAULT_NEAR_LIMIT_RATIO) {
            tracing::warn!(rate_limit = %info, "Close to App Store Connect quota");
        } else {
            tracing::trace!(rate_limit = %info, "Rate limit");
        }
        *self
            .last_rate_limit
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(info);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("profile", &self.credential.name)
            .field("max_retries", &self.retry.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Same-origin redirects only; anything else stops with the redirect response.
fn same_origin_redirects() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.stop();
        }
        let same_origin = attempt
            .previous()
            .first()
            .is_some_and(|origin| origin.origin() == attempt.url().origin());
        if same_origin {
            attempt.follow()
        } else {
            tracing::warn!(target_url = %attempt.url(), "Blocking cross-origin redirect");
            attempt.stop()
        }
    })
}

#[derive(Default)]
pub struct ClientBuilder {
    credential: Option<Credential>,
    signer: Option<Arc<TokenSigner>>,
    base_url: Option<Url>,
    timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    pagination: Option<PaginationLimits>,
    storage_hosts: Vec<String>,
    allow_insecure_http: bool,
}

impl ClientBuilder {
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Share a token cache between clients.
    pub fn signer(mut self, signer: Arc<TokenSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Base URL, timeout and retry count from settings.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.base_url = Some(settings.base_url.clone());
        self.timeout = Some(settings.timeout);
        self.retry = Some(
            self.retry
                .take()
                .unwrap_or_default()
                .with_max_retries(settings.max_retries),
        );
        self
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn pagination_limits(mut self, limits: PaginationLimits) -> Self {
        self.pagination = Some(limits);
        self
    }

    /// Extra domain accepted for presigned downloads.
    pub fn storage_host(mut self, host: impl Into<String>) -> Self {
        self.storage_hosts.push(host.into());
        self
    }

    /// Accept `http` presigned URLs on loopback hosts.
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    pub fn build(self) -> Result<Client> {
        let credential = self.credential.ok_or_else(|| {
            Error::CredentialNotFound("client requires a resolved credential".into())
        })?;

        let base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_BASE_URL)
                .map_err(|e| Error::config(format!("invalid base URL: {}", e)))?,
        };
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(same_origin_redirects())
            .build()
            .map_err(Error::Network)?;
        let unauthenticated = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(Error::Network)?;

        let mut guard =
            RedirectGuard::new(base_url.clone()).allow_insecure_http(self.allow_insecure_http);
        for host in self.storage_hosts {
            guard = guard.with_storage_host(host);
        }

        tracing::debug!(base_url = %base_url, profile = %credential.name, "Built client");

        Ok(Client {
            http,
            unauthenticated,
            base_url,
            credential,
            signer: self.signer.unwrap_or_default(),
            guard,
            retry: self.retry.unwrap_or_default(),
            timeout,
            pagination: self.pagination.unwrap_or_default(),
            last_rate_limit: Arc::new(RwLock::new(None)),
        })
    }
}
