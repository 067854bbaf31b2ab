//! The API client and its call pipeline.
//!
//! A call flows through the request builder, the retry executor, the status classifier
//! and finally JSON decoding. [`Client`] holds the immutable configuration shared by all
//! calls; use [`ClientBuilder`] to create one.

use crate::{
    packages::PackagesService,
    rate_limit::{RateLimitConfig, RateLimitInfo},
    request::{PreparedRequest, RequestBody, RequestDefaults, RequestMetadata},
    response::RawResponse,
    retry::{Attempt, RetryExecutor, RetryPredicate, RetryRateLimitedGet, RetryStrategy},
    Error, Response, Result,
};
use http::{HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("hoist/", env!("CARGO_PKG_VERSION"));

const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(120);

/// A client for the build-automation API.
///
/// Cloning is cheap and clones share the connection pool. The configuration never
/// changes after [`ClientBuilder::build`]; rotating the credential produces a new client
/// with [`Client::with_token`].
///
/// # Examples
///
/// ```no_run
/// use hoist::{Client, Response};
/// use serde::{Deserialize, Serialize};
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Serialize)]
/// struct CreateBuild {
///     commit: String,
///     branch: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Build {
///     number: u64,
/// }
///
/// # async fn example() -> Result<(), hoist::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/")?
///     .token("bk_secret")
///     .build()?;
/// let cancel = CancellationToken::new();
///
/// let request = CreateBuild {
///     commit: "HEAD".to_string(),
///     branch: "main".to_string(),
/// };
/// let build: Response<Build> = client
///     .post("v2/organizations/acme/pipelines/app/builds", &request, &cancel)
///     .await?;
/// println!("Started build #{}", build.data.number);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Clone)]
struct ClientInner {
    http_client: reqwest::Client,
    defaults: RequestDefaults,
    debug: bool,
    executor: RetryExecutor,
    retry_predicate: Arc<dyn RetryPredicate>,
    rate_limit_config: RateLimitConfig,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The base URL relative paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.defaults.base_url
    }

    /// Returns a new client identical to this one but authenticating with `token`.
    ///
    /// The connection pool is shared; this client is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the token is not a valid header value.
    pub fn with_token(&self, token: impl AsRef<str>) -> Result<Client> {
        let mut inner = ClientInner::clone(&self.inner);
        inner.defaults.authorization = Some(bearer(token.as_ref())?);
        Ok(Client {
            inner: Arc::new(inner),
        })
    }

    /// Makes a typed request.
    ///
    /// Non-2xx responses become [`Error::Api`]; a 2xx body is decoded as `Res`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hoist::{Client, RequestBody, RequestMetadata};
    /// use http::Method;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), hoist::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com/")?
    ///     .build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::GET, "v2/organizations/acme/pipelines")
    ///     .with_query_param("page", "2");
    /// let page = client
    ///     .call::<Vec<serde_json::Value>>(metadata, RequestBody::Empty, &CancellationToken::new())
    ///     .await?;
    /// println!("{} pipelines, next page {}", page.data.len(), page.pagination.next_page);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Res>(
        &self,
        metadata: RequestMetadata,
        body: RequestBody,
        cancel: &CancellationToken,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let (raw, attempts) = self.execute(metadata, body, cancel).await?;
        let latency = start_time.elapsed();

        let raw = raw.error_for_status()?;
        let data = raw.decode()?;
        Ok(Response::from_raw(data, raw, latency, attempts))
    }

    /// Makes a request whose response body is not decoded.
    ///
    /// The status is still classified; the body is available as `raw_body`.
    pub async fn send(
        &self,
        metadata: RequestMetadata,
        body: RequestBody,
        cancel: &CancellationToken,
    ) -> Result<Response<()>> {
        let start_time = Instant::now();
        let (raw, attempts) = self.execute(metadata, body, cancel).await?;
        let latency = start_time.elapsed();

        let raw = raw.error_for_status()?;
        Ok(Response::from_raw((), raw, latency, attempts))
    }

    /// Runs the retry loop for one logical call and returns the terminal response,
    /// whatever its status, with the number of attempts made.
    async fn execute(
        &self,
        metadata: RequestMetadata,
        body: RequestBody,
        cancel: &CancellationToken,
    ) -> Result<(RawResponse, usize)> {
        let mut prepared = PreparedRequest::new(&self.inner.defaults, metadata, body)?;
        let replayable = prepared.is_replayable();
        let start_time = Instant::now();

        let (raw, attempts) = self
            .inner
            .executor
            .run(cancel, |attempt| {
                tracing::debug!(
                    method = %prepared.method,
                    url = %prepared.url,
                    attempt = attempt,
                    "Executing HTTP request"
                );
                if self.inner.debug {
                    tracing::info!(
                        target: "hoist::dump",
                        method = %prepared.method,
                        url = %prepared.url,
                        attempt = attempt,
                        headers = ?prepared.redacted_headers(),
                        body = %prepared.dump_body(),
                        "Request"
                    );
                }
                let request = prepared.build(&self.inner.http_client);
                let method = prepared.method.clone();
                async move { self.attempt(method, request, replayable).await }
            })
            .await?;

        tracing::info!(
            method = %raw.method,
            url = %raw.url,
            status = raw.status.as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            attempts = attempts,
            "Received HTTP response"
        );

        Ok((raw, attempts))
    }

    /// One physical exchange.
    async fn attempt(
        &self,
        method: Method,
        request: reqwest::RequestBuilder,
        replayable: bool,
    ) -> Attempt<RawResponse> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, method = %method, "Transport failure, not retrying");
                return Attempt::Permanent(Error::transport(e));
            }
        };

        let raw = match RawResponse::read(method, response).await {
            Ok(raw) => raw,
            Err(e) => return Attempt::Permanent(e),
        };

        if self.inner.debug {
            tracing::info!(
                target: "hoist::dump",
                status = raw.status.as_u16(),
                headers = ?raw.headers,
                body = %String::from_utf8_lossy(&raw.body),
                "Response"
            );
        }

        if !replayable || !self.inner.retry_predicate.should_retry(&raw.method, raw.status) {
            return Attempt::Terminal(raw);
        }

        let hint = RateLimitInfo::from_headers(&raw.headers);
        let delay = if self.inner.rate_limit_config.enabled {
            hint.delay(self.inner.rate_limit_config.max_wait)
        } else {
            None
        };

        let error = if raw.status == StatusCode::TOO_MANY_REQUESTS {
            Error::RateLimited {
                method: raw.method,
                url: raw.url,
                status: raw.status,
                message: hint.message().to_owned(),
            }
        } else {
            match raw.error_for_status() {
                Ok(raw) => return Attempt::Terminal(raw),
                Err(e) => e,
            }
        };

        Attempt::Retry { error, hint: delay }
    }

    /// Makes a GET request and decodes the JSON response.
    pub async fn get<Res>(
        &self,
        path: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call(metadata, RequestBody::Empty, cancel).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(metadata, RequestBody::json(body)?, cancel).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(metadata, RequestBody::json(body)?, cancel).await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PATCH, path);
        self.call(metadata, RequestBody::json(body)?, cancel).await
    }

    /// Makes a DELETE request. The response body is not decoded.
    pub async fn delete(
        &self,
        path: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Response<()>> {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.send(metadata, RequestBody::Empty, cancel).await
    }

    /// Package operations for one organization's registry.
    pub fn packages(
        &self,
        organization: impl Into<String>,
        registry: impl Into<String>,
    ) -> PackagesService<'_> {
        PackagesService::new(self, organization.into(), registry.into())
    }

    /// The transport, for exchanges that must bypass the API's auth headers.
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.inner.http_client
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.inner.debug
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.defaults.base_url.as_str())
            .field("authenticated", &self.inner.defaults.authorization.is_some())
            .field("debug", &self.inner.debug)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use hoist::{ClientBuilder, RetryStrategy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), hoist::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://gateway.internal/ci-api/")?
///     .token("bk_secret")
///     .user_agent("release-bot/2.1")
///     .timeout(Duration::from_secs(30))
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(250),
///         max_delay: Duration::from_secs(10),
///         max_retries: 5,
///         jitter: true,
///     })
///     .max_elapsed_time(Duration::from_secs(60))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    token: Option<String>,
    user_agent: Option<String>,
    debug: bool,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
    retry_strategy: RetryStrategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    max_elapsed_time: Duration,
    rate_limit_config: RateLimitConfig,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            token: None,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            debug: false,
            timeout: None,
            http_client: None,
            retry_strategy: RetryStrategy::default(),
            retry_predicate: None,
            max_elapsed_time: DEFAULT_MAX_ELAPSED,
            rate_limit_config: RateLimitConfig::default(),
        }
    }

    /// Sets the base URL. A path component (e.g. a reverse-proxy prefix) is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the API access token, sent as `Authorization: Bearer <token>`.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the `User-Agent` header. Defaults to [`DEFAULT_USER_AGENT`].
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Stops sending a `User-Agent` header.
    pub fn without_user_agent(mut self) -> Self {
        self.user_agent = None;
        self
    }

    /// Dumps every request and response under the `hoist::dump` tracing target.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets a per-attempt timeout for API calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a preconfigured `reqwest` client as the transport.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Sets the backoff between attempts.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets which responses are retried. Defaults to [`RetryRateLimitedGet`].
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Bounds the total time one call may spend retrying. Defaults to two minutes.
    pub fn max_elapsed_time(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed_time = max_elapsed;
        self
    }

    /// Sets how server rate-limit hints are honored.
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit_config = config;
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided, a header value is invalid, or the
    /// transport cannot be created.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL {base_url} cannot be used as a base"
            )));
        }

        let authorization = self.token.as_deref().map(bearer).transpose()?;
        let user_agent = self
            .user_agent
            .as_deref()
            .map(|agent| {
                HeaderValue::from_str(agent).map_err(|e| {
                    Error::ConfigurationError(format!("Invalid user agent: {}", e))
                })
            })
            .transpose()?;

        let http_client = match self.http_client {
            Some(http_client) => http_client,
            None => reqwest::Client::builder().build().map_err(|e| {
                Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?,
        };

        let retry_predicate: Arc<dyn RetryPredicate> = match self.retry_predicate {
            Some(predicate) => Arc::from(predicate),
            None => Arc::new(RetryRateLimitedGet),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                defaults: RequestDefaults {
                    base_url,
                    authorization,
                    user_agent,
                    timeout: self.timeout,
                },
                debug: self.debug,
                executor: RetryExecutor::new(self.retry_strategy, self.max_elapsed_time),
                retry_predicate,
                rate_limit_config: self.rate_limit_config,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn bearer(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| Error::ConfigurationError(format!("Invalid token: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}
