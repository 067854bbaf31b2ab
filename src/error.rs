//! Error types and status classification.
//!
//! Every failure the client can produce is an [`Error`]. The variants fall into four
//! groups: transport failures that are never retried, rate-limit exhaustion, API-level
//! status errors carrying the raw body, and [`UsageError`]s raised before any network I/O.

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use url::Url;

/// The main error type for API calls and uploads.
///
/// # Examples
///
/// ```no_run
/// use hoist::{Client, Error};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/")?
///     .token("secret")
///     .build()?;
/// let cancel = CancellationToken::new();
///
/// match client.get::<serde_json::Value>("v2/user", &cancel).await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::Api(api)) => {
///         eprintln!("{} failed with {}", api.url, api.status);
///         eprintln!("Raw body: {}", String::from_utf8_lossy(&api.raw_body));
///     }
///     Err(e) if e.is_usage() => panic!("bug in caller: {e}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The exchange could not be completed at the transport layer (connection refused,
    /// DNS or TLS failure). These are permanent and never retried.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The caller's cancellation token fired while the call was in flight.
    #[error("Request cancelled")]
    Cancelled,

    /// The API answered with a non-2xx status.
    #[error(transparent)]
    Api(Box<ApiError>),

    /// The object store rejected a presigned upload.
    ///
    /// The store's diagnostic body (usually XML) is kept verbatim.
    #[error("{method} {url}: object store rejected upload with status {}: {body}", .status.as_u16())]
    Upload {
        /// The verb the descriptor asked for.
        method: Method,
        /// The upload destination.
        url: Url,
        /// Status returned by the store.
        status: StatusCode,
        /// The full response body.
        body: String,
    },

    /// The server rate limited a call the retry policy considers safe to repeat.
    ///
    /// Seen by callers only inside [`Error::MaxRetriesExceeded`].
    #[error("{method} {url}: {} {message}", .status.as_u16())]
    RateLimited {
        /// The request verb.
        method: Method,
        /// The absolute request URL.
        url: Url,
        /// Status returned by the server, usually `429`.
        status: StatusCode,
        /// The server's rate-limit warning, or a generic message.
        message: String,
    },

    /// The retry budget ran out while the server kept rate limiting the call.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// The number of attempts made.
        attempts: usize,
        /// The error that triggered the final retry decision.
        last_error: Box<Error>,
    },

    /// The call was rejected before any I/O because the caller misused the API.
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// Failed to JSON-encode the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// A 2xx response body could not be decoded into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Reading the upload source from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The configured base URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Programmer misuse and broken preconditions.
///
/// These are raised synchronously, before any network I/O, and are never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// The request path is not a valid URI reference.
    #[error("invalid request path {path:?}: {reason}")]
    InvalidPath {
        /// The path as given by the caller.
        path: String,
        /// Why it could not be resolved.
        reason: String,
    },

    /// A file was already attached to this multipart streamer.
    #[error("a file has already been written to this multipart stream")]
    AlreadyWritten,

    /// Plain fields must be written before the file part.
    #[error("field {0:?} written after the file part")]
    FieldAfterFile(String),

    /// The presigned upload descriptor has no `key` field.
    #[error("presigned upload form is missing the required \"key\" field")]
    MissingUploadKey,

    /// The presigned upload descriptor names a verb that is not a valid HTTP method.
    #[error("presigned upload form has invalid method {0:?}")]
    InvalidUploadMethod(String),

    /// A header name or value could not be encoded.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// A non-2xx API response, classified.
///
/// The raw body is always kept, even when it decodes, so nothing the server said is lost.
#[derive(thiserror::Error, Debug)]
#[error("{method} {url}: {} {}", .status.as_u16(), .message.as_deref().unwrap_or_default())]
pub struct ApiError {
    /// The request verb.
    pub method: Method,
    /// The absolute request URL.
    pub url: Url,
    /// The response status.
    pub status: StatusCode,
    /// The `message` field of a JSON error body, if the body was JSON.
    pub message: Option<String>,
    /// The response body exactly as received.
    pub raw_body: Bytes,
    /// The response headers.
    pub headers: HeaderMap,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiError {
    /// Builds a classified error from a completed exchange.
    ///
    /// The `message` is taken from a JSON body when one decodes; any other body is kept
    /// only as `raw_body`.
    pub fn new(
        method: Method,
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        raw_body: Bytes,
    ) -> Self {
        let message = serde_json::from_slice::<ErrorBody>(&raw_body)
            .ok()
            .and_then(|body| body.message);
        Self {
            method,
            url,
            status,
            message,
            raw_body,
            headers,
        }
    }
}

impl Error {
    /// Returns `true` for [`Error::Usage`], the category of errors caused by the caller
    /// rather than the network or the server.
    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    /// Returns `true` for failures that retrying cannot fix.
    ///
    /// ```
    /// use hoist::{Error, UsageError};
    ///
    /// assert!(Error::Timeout.is_permanent());
    /// assert!(Error::from(UsageError::AlreadyWritten).is_permanent());
    /// ```
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::Cancelled
                | Error::Usage(_)
                | Error::ConfigurationError(_)
                | Error::InvalidUrl(_)
        )
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Api(api) => Some(api.status),
            Error::Upload { status, .. } => Some(*status),
            Error::RateLimited { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_body(&self) -> Option<&[u8]> {
        match self {
            Error::Api(api) => Some(&api.raw_body),
            Error::Upload { body, .. } => Some(body.as_bytes()),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response.as_bytes()),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.raw_body(),
            _ => None,
        }
    }

    /// Maps a `reqwest` failure, keeping timeouts distinct.
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(err)
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(Box::new(err))
    }
}

/// A specialized `Result` type for API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(status: u16, body: &'static [u8]) -> ApiError {
        ApiError::new(
            Method::POST,
            Url::parse("https://api.example.com/v2/builds").unwrap(),
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            Bytes::from_static(body),
        )
    }

    #[test]
    fn test_message_decoded_from_json_body() {
        let err = api_error(422, br#"{"message":"Validation failed"}"#);
        assert_eq!(err.message.as_deref(), Some("Validation failed"));
        assert_eq!(&err.raw_body[..], br#"{"message":"Validation failed"}"#);
    }

    #[test]
    fn test_undecodable_body_is_preserved() {
        let body: &'static [u8] = b"<html>\xff bad gateway</html>";
        let err = api_error(502, body);
        assert_eq!(err.message, None);
        assert_eq!(&err.raw_body[..], body);
    }

    #[test]
    fn test_display_includes_verb_url_and_status() {
        let err = Error::from(api_error(404, b"not json"));
        let text = err.to_string();
        assert!(text.contains("POST"));
        assert!(text.contains("https://api.example.com/v2/builds"));
        assert!(text.contains("404"));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.raw_body(), Some(&b"not json"[..]));
    }

    #[test]
    fn test_usage_errors_are_distinct() {
        let err = Error::from(UsageError::MissingUploadKey);
        assert!(err.is_usage());
        assert!(!Error::Timeout.is_usage());
        assert!(!Error::from(api_error(500, b"")).is_permanent());
    }
}
