//! Streaming `multipart/form-data` encoder with a known length.
//!
//! Object stores accepting presigned POST uploads insist on a `Content-Length`, so the
//! body cannot be sent chunked. [`MultipartStreamer`] keeps the plain fields and the file
//! part's headers in memory, leaves the file itself on disk, and can report the exact total
//! size before a single byte is read.
//!
//! The body is three segments read back to back:
//!
//! 1. the written fields followed by the file part's preamble,
//! 2. the file content, read lazily,
//! 3. the closing boundary.

use crate::request::StreamBody;
use crate::{Result, UsageError};
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A boxed byte source that can be moved into a request body.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Builds a multipart body whose total length is known up front.
///
/// Fields must be written before the file, and at most one file may be attached.
///
/// # Examples
///
/// ```no_run
/// use hoist::MultipartStreamer;
///
/// # async fn example() -> Result<(), hoist::Error> {
/// let mut streamer = MultipartStreamer::new();
/// streamer.write_field("key", "packages/${filename}")?;
/// streamer.write_file("file", "dist/app-1.0.0.tgz").await?;
///
/// let length = streamer.content_length();
/// let body = streamer.into_body();
/// assert_eq!(body.content_length(), length);
/// # Ok(())
/// # }
/// ```
///
/// The streamer itself is not a JSON body; it has to go through [`MultipartStreamer::into_body`]:
///
/// ```compile_fail
/// use hoist::{MultipartStreamer, RequestBody};
///
/// let streamer = MultipartStreamer::new();
/// let body = RequestBody::json(&streamer);
/// ```
pub struct MultipartStreamer {
    boundary: String,
    head: Vec<u8>,
    file: Option<FileSegment>,
    parts: usize,
}

struct FileSegment {
    reader: BoxReader,
    len: u64,
}

impl MultipartStreamer {
    /// Creates an empty streamer with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("{:032x}", rand::random::<u128>()))
    }

    /// Creates an empty streamer with a caller-chosen boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            head: Vec::new(),
            file: None,
            parts: 0,
        }
    }

    /// The multipart boundary.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` header value for this body.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Appends a plain form field.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::FieldAfterFile`] once a file has been attached.
    pub fn write_field(
        &mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> std::result::Result<(), UsageError> {
        let name = name.as_ref();
        if self.file.is_some() {
            return Err(UsageError::FieldAfterFile(name.to_owned()));
        }
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            escape_quotes(name)
        ));
        self.head.extend_from_slice(value.as_ref().as_bytes());
        Ok(())
    }

    /// Appends several plain form fields in iteration order.
    pub fn write_fields<I, K, V>(&mut self, fields: I) -> std::result::Result<(), UsageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in fields {
            self.write_field(name, value)?;
        }
        Ok(())
    }

    /// Attaches the file at `path` under the form field `field`.
    ///
    /// The file is opened and its size read now; its content is read only when the body
    /// is streamed.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::AlreadyWritten`] if a file is already attached, or an I/O
    /// error if the file cannot be opened. The streamer is left unchanged on error.
    pub async fn write_file(&mut self, field: &str, path: impl AsRef<Path>) -> Result<()> {
        if self.file.is_some() {
            return Err(UsageError::AlreadyWritten.into());
        }

        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.write_reader(field, &filename, file, len)?;
        Ok(())
    }

    /// Attaches an arbitrary source of exactly `len` bytes as the file part.
    ///
    /// At most `len` bytes are read from `reader`.
    pub fn write_reader<R>(
        &mut self,
        field: &str,
        filename: &str,
        reader: R,
        len: u64,
    ) -> std::result::Result<(), UsageError>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        if self.file.is_some() {
            return Err(UsageError::AlreadyWritten);
        }

        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n",
            escape_quotes(field),
            escape_quotes(filename)
        ));
        self.file = Some(FileSegment {
            reader: Box::pin(reader.take(len)),
            len,
        });
        Ok(())
    }

    /// Total number of bytes the body will produce.
    pub fn content_length(&self) -> u64 {
        let file_len = self.file.as_ref().map_or(0, |file| file.len);
        self.head.len() as u64 + file_len + self.closing().len() as u64
    }

    /// Composes the three segments into one reader.
    pub fn into_reader(self) -> BoxReader {
        let closing = Cursor::new(self.closing());
        let head = Cursor::new(self.head);
        match self.file {
            Some(file) => Box::pin(head.chain(file.reader).chain(closing)),
            None => Box::pin(head.chain(closing)),
        }
    }

    /// Wraps the streamer as a request body carrying its length and content type.
    pub fn into_body(self) -> StreamBody {
        let content_length = self.content_length();
        let content_type = self.content_type();
        StreamBody::new(self.into_reader(), content_length, content_type)
    }

    fn open_part(&mut self, headers: &str) {
        if self.parts > 0 {
            self.head.extend_from_slice(b"\r\n");
        }
        self.head.extend_from_slice(b"--");
        self.head.extend_from_slice(self.boundary.as_bytes());
        self.head.extend_from_slice(b"\r\n");
        self.head.extend_from_slice(headers.as_bytes());
        self.head.extend_from_slice(b"\r\n");
        self.parts += 1;
    }

    fn closing(&self) -> Vec<u8> {
        let lead = if self.parts > 0 { "\r\n" } else { "" };
        format!("{lead}--{}--\r\n", self.boundary).into_bytes()
    }
}

impl Default for MultipartStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MultipartStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartStreamer")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts)
            .field("has_file", &self.file.is_some())
            .field("content_length", &self.content_length())
            .finish()
    }
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    async fn drain(streamer: MultipartStreamer) -> Vec<u8> {
        let mut out = Vec::new();
        streamer.into_reader().read_to_end(&mut out).await.unwrap();
        out
    }

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_fields_only_layout() {
        let mut streamer = MultipartStreamer::with_boundary("XYZ");
        streamer.write_field("key", "a/b").unwrap();
        streamer.write_field("acl", "private").unwrap();

        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"key\"\r\n\r\n\
            a/b\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"acl\"\r\n\r\n\
            private\r\n\
            --XYZ--\r\n";
        assert_eq!(streamer.content_length(), expected.len() as u64);
        assert_eq!(drain(streamer).await, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_empty_streamer_is_just_the_closing_boundary() {
        let streamer = MultipartStreamer::with_boundary("B");
        assert_eq!(streamer.content_length(), 7);
        assert_eq!(drain(streamer).await, b"--B--\r\n");
    }

    #[tokio::test]
    async fn test_length_matches_bytes_read() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let file = temp_file(&content);

        let mut streamer = MultipartStreamer::new();
        streamer
            .write_fields([("key", "uploads/${filename}"), ("policy", "abc==")])
            .unwrap();
        streamer.write_file("file", file.path()).await.unwrap();

        let length = streamer.content_length();
        let body = drain(streamer).await;
        assert_eq!(length, body.len() as u64);
        assert!(body
            .windows(content.len())
            .any(|window| window == content.as_slice()));
    }

    #[tokio::test]
    async fn test_file_part_headers() {
        let file = temp_file(b"hello");
        let name = file
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer.write_file("file", file.path()).await.unwrap();
        let body = String::from_utf8(drain(streamer).await).unwrap();

        let expected = format!(
            "--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\nhello\r\n--B--\r\n"
        );
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn test_second_file_is_rejected_and_state_kept() {
        let first = temp_file(b"first");
        let second = temp_file(b"second, longer");

        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer.write_field("key", "k").unwrap();
        streamer.write_file("file", first.path()).await.unwrap();
        let length = streamer.content_length();

        let err = streamer.write_file("file", second.path()).await.unwrap_err();
        assert!(matches!(err, Error::Usage(UsageError::AlreadyWritten)));
        assert_eq!(streamer.content_length(), length);

        let body = drain(streamer).await;
        assert_eq!(body.len() as u64, length);
        assert!(String::from_utf8(body).unwrap().contains("\r\n\r\nfirst\r\n--B--\r\n"));
    }

    #[tokio::test]
    async fn test_field_after_file_is_rejected() {
        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer
            .write_reader("file", "a.bin", Cursor::new(vec![1u8, 2, 3]), 3)
            .unwrap();

        let err = streamer.write_field("late", "x").unwrap_err();
        assert_eq!(err, UsageError::FieldAfterFile("late".into()));
    }

    #[tokio::test]
    async fn test_missing_file_leaves_streamer_untouched() {
        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer.write_field("key", "k").unwrap();
        let length = streamer.content_length();

        let err = streamer
            .write_file("file", "/definitely/not/here.tgz")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(streamer.content_length(), length);
        streamer.write_field("more", "ok").unwrap();
    }

    #[tokio::test]
    async fn test_reader_is_truncated_to_declared_length() {
        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer
            .write_reader("file", "a.bin", Cursor::new(vec![7u8; 10]), 4)
            .unwrap();
        let length = streamer.content_length();
        assert_eq!(drain(streamer).await.len() as u64, length);
    }

    #[test]
    fn test_quotes_are_escaped() {
        let mut streamer = MultipartStreamer::with_boundary("B");
        streamer.write_field("we\"ird", "v").unwrap();
        assert!(String::from_utf8_lossy(&streamer.head).contains(r#"name="we\"ird""#));
    }
}
