//! Response wrappers.
//!
//! [`RawResponse`] is what one exchange produces: the status, headers and the fully drained
//! body. [`Response`] adds the decoded data, call timing and the pagination cursors.

use crate::{error::ApiError, pagination::Pagination, Error, Result};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// A completed exchange whose body has already been read to the end.
///
/// Holding the body as [`Bytes`] means the connection was released exactly once, whether
/// or not the caller goes on to decode it.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The request verb.
    pub method: Method,
    /// The absolute request URL.
    pub url: Url,
    /// The response status.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Drains `response` into memory.
    pub(crate) async fn read(method: Method, response: reqwest::Response) -> Result<Self> {
        let url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::transport)?;
        Ok(Self {
            method,
            url,
            status,
            headers,
            body,
        })
    }

    /// Converts a non-2xx response into [`Error::Api`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        if self.status.is_client_error() {
            tracing::error!(
                method = %self.method,
                url = %self.url,
                status = self.status.as_u16(),
                "Client error (4xx)"
            );
        } else {
            tracing::warn!(
                method = %self.method,
                url = %self.url,
                status = self.status.as_u16(),
                "Unexpected status"
            );
        }

        Err(ApiError::new(
            self.method,
            self.url,
            self.status,
            self.headers,
            self.body,
        )
        .into())
    }

    /// Returns the pagination cursors advertised in the `Link` header.
    pub fn pagination(&self) -> Pagination {
        Pagination::from_headers(&self.headers)
    }

    /// Decodes the body as JSON.
    pub(crate) fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let raw_response = String::from_utf8_lossy(&self.body).into_owned();
            tracing::error!(
                error = %e,
                raw_response = %raw_response,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response,
                serde_error: e.to_string(),
                status: self.status,
            }
        })
    }
}

/// A successful, decoded API response.
///
/// # Examples
///
/// ```no_run
/// use hoist::Client;
/// use serde::Deserialize;
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Deserialize)]
/// struct Build {
///     number: u64,
/// }
///
/// # async fn example() -> Result<(), hoist::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/")?
///     .build()?;
/// let cancel = CancellationToken::new();
///
/// let response = client.get::<Vec<Build>>("v2/builds", &cancel).await?;
/// println!("{} builds, took {:?}", response.data.len(), response.latency);
/// if response.pagination.has_next() {
///     println!("next page: {}", response.pagination.next_page);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: Bytes,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Cursors parsed from the `Link` header.
    pub pagination: Pagination,

    /// Time from the first attempt until the terminal response, including backoff sleeps.
    pub latency: Duration,

    /// The number of attempts made to complete this request.
    pub attempts: usize,
}

impl<T> Response<T> {
    pub(crate) fn from_raw(data: T, raw: RawResponse, latency: Duration, attempts: usize) -> Self {
        Self {
            data,
            pagination: raw.pagination(),
            raw_body: raw.body,
            status: raw.status,
            headers: raw.headers,
            latency,
            attempts,
        }
    }

    /// Maps the response data to a different type, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            pagination: self.pagination,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
