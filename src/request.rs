//! Request description and the request builder.
//!
//! A call is described by [`RequestMetadata`] (verb, path, headers, query) and a
//! [`RequestBody`]. The builder resolves the path against the client's base URL, injects
//! the credential and user agent, and picks the body encoding from the body variant.
//! Nothing here performs I/O.

use crate::{Error, Result, UsageError};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::multipart::BoxReader;

/// Verb, path and per-call headers and query parameters.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method.
    pub method: Method,

    /// A path relative to the base URL, or an absolute URL used verbatim.
    pub path: String,

    /// Extra headers for this request.
    pub headers: HeaderMap,

    /// Query parameters, appended in order.
    pub query_params: Vec<(String, String)>,
}

impl RequestMetadata {
    /// Creates metadata for `method` on `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::InvalidHeader`] if the name or value cannot be encoded.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| UsageError::InvalidHeader(format!("name {:?}: {e}", name.as_ref())))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| UsageError::InvalidHeader(format!("value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter.
    ///
    /// ```
    /// use hoist::RequestMetadata;
    /// use http::Method;
    ///
    /// let next = RequestMetadata::new(Method::GET, "v2/builds").with_query_param("page", "2");
    /// assert_eq!(next.query_params, vec![("page".to_string(), "2".to_string())]);
    /// ```
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }
}

/// The body of an API request.
///
/// The variant decides the encoding: `Json` is sent as `application/json`, `Stream` is
/// passed through with the content type and length it carries.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A pre-built streaming source, e.g. from [`MultipartStreamer::into_body`](crate::MultipartStreamer::into_body).
    Stream(StreamBody),
    /// An already JSON-encoded value.
    Json(Bytes),
}

impl RequestBody {
    /// JSON-encodes `value`.
    ///
    /// ```
    /// use hoist::RequestBody;
    ///
    /// let body = RequestBody::json(&serde_json::json!({"message": "Deploy"})).unwrap();
    /// assert!(matches!(body, RequestBody::Json(bytes) if &bytes[..] == br#"{"message":"Deploy"}"#));
    /// ```
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_vec(value)
            .map(|encoded| RequestBody::Json(Bytes::from(encoded)))
            .map_err(|e| Error::SerializationFailed(e.to_string()))
    }
}

impl From<StreamBody> for RequestBody {
    fn from(body: StreamBody) -> Self {
        RequestBody::Stream(body)
    }
}

/// A read-once body with a known length.
///
/// The length is sent as `Content-Length`; the stream itself carries no size hint, so the
/// transport frames the body by that header instead of chunking it.
pub struct StreamBody {
    reader: BoxReader,
    content_length: u64,
    content_type: String,
}

impl StreamBody {
    /// Wraps `reader`, which must produce exactly `content_length` bytes.
    pub fn new<R>(reader: R, content_length: u64, content_type: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        Self {
            reader: Box::pin(reader),
            content_length,
            content_type: content_type.into(),
        }
    }

    /// The exact number of bytes the body produces.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The `Content-Type` sent with the body.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Sets the framing headers and attaches the stream to `request`.
    pub(crate) fn attach(self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(CONTENT_TYPE, self.content_type)
            .header(CONTENT_LENGTH, self.content_length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(self.reader)))
    }
}

impl std::fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBody")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Resolves `path` against `base`.
///
/// An absolute URL is returned unchanged. A relative path is joined *under* the base
/// path, so a base of `https://proxy.example.com/api/` keeps its `/api` prefix even when
/// the path starts with `/`.
///
/// ```
/// use hoist::request::resolve_url;
/// use url::Url;
///
/// let base = Url::parse("https://proxy.example.com/api").unwrap();
/// let url = resolve_url(&base, "/v2/user").unwrap();
/// assert_eq!(url.as_str(), "https://proxy.example.com/api/v2/user");
/// ```
pub fn resolve_url(base: &Url, path: &str) -> std::result::Result<Url, UsageError> {
    let invalid = |reason: String| UsageError::InvalidPath {
        path: path.to_owned(),
        reason,
    };

    match Url::parse(path) {
        Ok(absolute) => return Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => {}
        Err(e) => return Err(invalid(e.to_string())),
    }

    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| invalid(e.to_string()))
}

/// Client-wide values every API request carries.
#[derive(Debug, Clone)]
pub(crate) struct RequestDefaults {
    pub(crate) base_url: Url,
    pub(crate) authorization: Option<HeaderValue>,
    pub(crate) user_agent: Option<HeaderValue>,
    pub(crate) timeout: Option<Duration>,
}

/// A request ready to be turned into one `reqwest` request per attempt.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    body: PreparedBody,
}

#[derive(Debug)]
enum PreparedBody {
    Empty,
    Bytes(Bytes),
    Stream(Option<StreamBody>),
}

impl PreparedRequest {
    /// Builds the request for `metadata` and `body`.
    pub(crate) fn new(
        defaults: &RequestDefaults,
        metadata: RequestMetadata,
        body: RequestBody,
    ) -> Result<Self> {
        let mut url = resolve_url(&defaults.base_url, &metadata.path)?;
        if !metadata.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &metadata.query_params {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = HeaderMap::new();
        if let Some(authorization) = &defaults.authorization {
            headers.insert(AUTHORIZATION, authorization.clone());
        }
        if let Some(user_agent) = &defaults.user_agent {
            headers.insert(USER_AGENT, user_agent.clone());
        }
        headers.extend(metadata.headers);

        let body = match body {
            RequestBody::Empty => PreparedBody::Empty,
            RequestBody::Json(encoded) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                PreparedBody::Bytes(encoded)
            }
            RequestBody::Stream(stream) => PreparedBody::Stream(Some(stream)),
        };

        Ok(Self {
            method: metadata.method,
            url,
            headers,
            timeout: defaults.timeout,
            body,
        })
    }

    /// Whether a failed attempt may be sent again.
    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self.body, PreparedBody::Stream(_))
    }

    /// Builds the `reqwest` request for one attempt.
    ///
    /// A streaming body is handed out once; later calls send no body, which is why
    /// non-replayable requests are never retried.
    pub(crate) fn build(&mut self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut request = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        match &mut self.body {
            PreparedBody::Empty => request,
            PreparedBody::Bytes(encoded) => request.body(encoded.clone()),
            PreparedBody::Stream(stream) => match stream.take() {
                Some(stream) => stream.attach(request),
                None => request,
            },
        }
    }

    /// Body text for debug output. Streams are summarized, never read.
    pub(crate) fn dump_body(&self) -> String {
        match &self.body {
            PreparedBody::Empty => String::new(),
            PreparedBody::Bytes(encoded) => String::from_utf8_lossy(encoded).into_owned(),
            PreparedBody::Stream(Some(stream)) => format!(
                "<{} bytes of {}>",
                stream.content_length, stream.content_type
            ),
            PreparedBody::Stream(None) => "<stream already sent>".to_owned(),
        }
    }

    /// Header dump with the credential masked, for debug output.
    pub(crate) fn redacted_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if headers.contains_key(AUTHORIZATION) {
            headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer [redacted]"));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults(base: &str) -> RequestDefaults {
        RequestDefaults {
            base_url: Url::parse(base).unwrap(),
            authorization: Some(HeaderValue::from_static("Bearer t0ken")),
            user_agent: Some(HeaderValue::from_static("hoist-test/1.0")),
            timeout: None,
        }
    }

    #[test]
    fn test_relative_path_under_root() {
        let base = Url::parse("https://api.example.com/").unwrap();
        let url = resolve_url(&base, "v2/organizations/acme/pipelines").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/organizations/acme/pipelines");
    }

    #[test]
    fn test_proxy_prefix_is_kept() {
        for base in ["https://gw.example.com/ci/", "https://gw.example.com/ci"] {
            let base = Url::parse(base).unwrap();
            for path in ["v2/user", "/v2/user"] {
                let url = resolve_url(&base, path).unwrap();
                assert_eq!(url.as_str(), "https://gw.example.com/ci/v2/user");
            }
        }
    }

    #[test]
    fn test_absolute_path_used_verbatim() {
        let base = Url::parse("https://gw.example.com/ci/").unwrap();
        let url = resolve_url(&base, "https://other.example.com/v2/user?x=1").unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/v2/user?x=1");
    }

    #[test]
    fn test_unparseable_path() {
        let base = Url::parse("https://api.example.com/").unwrap();
        let err = resolve_url(&base, "http://[::1").unwrap_err();
        assert!(matches!(err, UsageError::InvalidPath { path, .. } if path == "http://[::1"));
    }

    #[test]
    fn test_headers_and_json_body() {
        let metadata = RequestMetadata::new(Method::POST, "v2/builds")
            .with_header("x-request-id", "abc")
            .unwrap()
            .with_query_param("branch", "main");
        let body = RequestBody::json(&serde_json::json!({"commit": "HEAD"})).unwrap();

        let prepared = PreparedRequest::new(&defaults("https://api.example.com/"), metadata, body)
            .unwrap();

        assert_eq!(prepared.url.as_str(), "https://api.example.com/v2/builds?branch=main");
        assert_eq!(prepared.headers[AUTHORIZATION], "Bearer t0ken");
        assert_eq!(prepared.headers[USER_AGENT], "hoist-test/1.0");
        assert_eq!(prepared.headers[CONTENT_TYPE], "application/json");
        assert_eq!(prepared.headers["x-request-id"], "abc");
        assert!(prepared.is_replayable());
        assert_eq!(prepared.redacted_headers()[AUTHORIZATION], "Bearer [redacted]");
        assert_eq!(prepared.dump_body(), r#"{"commit":"HEAD"}"#);
    }

    #[test]
    fn test_no_credential_no_header() {
        let mut defaults = defaults("https://api.example.com/");
        defaults.authorization = None;
        defaults.user_agent = None;

        let prepared = PreparedRequest::new(
            &defaults,
            RequestMetadata::new(Method::GET, "v2/user"),
            RequestBody::Empty,
        )
        .unwrap();

        assert!(prepared.headers.is_empty());
    }

    #[test]
    fn test_stream_body_is_not_replayable_and_not_json() {
        let stream = StreamBody::new(std::io::Cursor::new(vec![0u8; 3]), 3, "text/plain");
        let body = RequestBody::from(stream);

        let prepared = PreparedRequest::new(
            &defaults("https://api.example.com/"),
            RequestMetadata::new(Method::PUT, "v2/blob"),
            body,
        )
        .unwrap();

        assert!(!prepared.is_replayable());
        assert!(prepared.headers.get(CONTENT_TYPE).is_none());
        assert_eq!(prepared.dump_body(), "<3 bytes of text/plain>");
    }

    #[test]
    fn test_bad_header_is_usage_error() {
        let err = RequestMetadata::new(Method::GET, "x")
            .with_header("bad header", "v")
            .unwrap_err();
        assert!(err.is_usage());
    }
}
