//! Presigned package uploads.
//!
//! Uploading a package is three calls, each consuming what the previous one produced:
//!
//! 1. the API issues a [`PresignedUpload`] describing an object-store form,
//! 2. [`PresignedUpload::perform`] streams the file straight to the store, yielding an
//!    [`UploadedPackage`],
//! 3. [`UploadedPackage::finalize`] registers the stored object with the API.
//!
//! A failure at any step ends the workflow. Descriptors may be single-use, so a caller
//! wanting to retry starts again from step 1.

use crate::multipart::MultipartStreamer;
use crate::packages::{packages_path, Package};
use crate::request::{RequestBody, RequestMetadata};
use crate::response::RawResponse;
use crate::{Client, Error, Result, UsageError};
use http::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Placeholder in the `key` field replaced by the uploaded file's name.
const FILENAME_PLACEHOLDER: &str = "${filename}";

/// The upload target issued by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadDescriptor {
    /// Informational URI of the upload target.
    #[serde(default)]
    pub uri: String,
    /// The form to submit to the object store.
    pub form: UploadForm,
}

/// An object-store POST-policy form.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadForm {
    /// The form field the file must be attached under.
    pub file_input: String,
    /// The verb to submit the form with.
    #[serde(default)]
    pub method: String,
    /// The store's upload address.
    pub url: String,
    /// Fields the store requires alongside the file, including `key`.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// A package upload whose descriptor has been issued but not used.
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    organization: String,
    registry: String,
    descriptor: UploadDescriptor,
}

/// A package whose bytes are in the object store but not yet registered.
#[derive(Debug, Clone)]
pub struct UploadedPackage {
    organization: String,
    registry: String,
    object_url: String,
}

/// A file to upload, with the name it is uploaded under.
///
/// A source built with [`UploadSource::from_reader`] is backed by a temporary file that
/// is deleted when the source is dropped.
#[derive(Debug)]
pub struct UploadSource {
    path: PathBuf,
    filename: String,
    _spool: Option<NamedTempFile>,
}

impl UploadSource {
    /// Uploads the file at `path` under its own base name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = base_name(&path);
        Self {
            path,
            filename,
            _spool: None,
        }
    }

    /// Copies `reader` into a temporary file so its size is known before upload.
    ///
    /// Only the last component of `filename` is kept, so `dist/app.tgz` uploads as
    /// `app.tgz`.
    ///
    /// The temporary file is removed when the returned source is dropped, or right away
    /// if copying fails.
    pub async fn from_reader<R>(mut reader: R, filename: impl AsRef<Path>) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let filename = base_name(filename.as_ref());
        let spool = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(spool.as_file().try_clone()?);
        let copied = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        tracing::debug!(bytes = copied, path = %spool.path().display(), "Spooled upload source");

        Ok(Self {
            path: spool.path().to_path_buf(),
            filename,
            _spool: Some(spool),
        })
    }

    /// Where the bytes are read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name substituted into the object key.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    async fn attach(&self, streamer: &mut MultipartStreamer, field: &str) -> Result<()> {
        let file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        streamer.write_reader(field, &self.filename, file, len)?;
        Ok(())
    }
}

impl PresignedUpload {
    pub(crate) fn new(organization: String, registry: String, descriptor: UploadDescriptor) -> Self {
        Self {
            organization,
            registry,
            descriptor,
        }
    }

    /// The descriptor issued by the API.
    pub fn descriptor(&self) -> &UploadDescriptor {
        &self.descriptor
    }

    /// Streams `source` to the object store named by the descriptor.
    ///
    /// The request goes straight to the store through the client's transport, without the
    /// API's credential or user agent. The body length is sent up front.
    ///
    /// # Errors
    ///
    /// - [`UsageError::MissingUploadKey`] if the form has no `key` field, before any I/O.
    /// - [`UsageError::InvalidUploadMethod`] if the form's verb is not an HTTP method.
    /// - [`Error::Upload`] with the store's full response body on a non-2xx answer.
    pub async fn perform(
        self,
        client: &Client,
        source: &UploadSource,
        cancel: &CancellationToken,
    ) -> Result<UploadedPackage> {
        let form = &self.descriptor.form;
        let key = form.data.get("key").ok_or(UsageError::MissingUploadKey)?;
        let method = upload_method(&form.method)?;
        let url = Url::parse(&form.url)?;

        let mut streamer = MultipartStreamer::new();
        streamer.write_fields(&form.data)?;
        source.attach(&mut streamer, &form.file_input).await?;
        let body = streamer.into_body();

        tracing::info!(
            method = %method,
            url = %url,
            bytes = body.content_length(),
            filename = source.filename(),
            "Uploading package to object store"
        );
        if client.is_debug() {
            tracing::info!(target: "hoist::dump", method = %method, url = %url, ?body, "Upload request");
        }

        let request = body.attach(client.http_client().request(method.clone(), url.clone()));
        let exchange = async {
            let response = request.send().await.map_err(Error::transport)?;
            RawResponse::read(method.clone(), response).await
        };
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            raw = exchange => raw?,
        };

        if !raw.status.is_success() {
            return Err(upload_rejected(raw));
        }

        let object_url = object_url(&url, key, source.filename());
        tracing::info!(object_url = %object_url, status = raw.status.as_u16(), "Upload stored");

        Ok(UploadedPackage {
            organization: self.organization,
            registry: self.registry,
            object_url,
        })
    }
}

impl UploadedPackage {
    /// The stored object's address, with the file name substituted into the key.
    pub fn object_url(&self) -> &str {
        &self.object_url
    }

    /// Registers the stored object with the API, creating the package record.
    pub async fn finalize(self, client: &Client, cancel: &CancellationToken) -> Result<Package> {
        let mut streamer = MultipartStreamer::new();
        streamer.write_field("package_url", &self.object_url)?;

        let metadata = RequestMetadata::new(
            Method::POST,
            packages_path(&self.organization, &self.registry),
        );
        let response = client
            .call::<Package>(metadata, RequestBody::from(streamer.into_body()), cancel)
            .await?;

        tracing::info!(package_id = %response.data.id, "Package created");
        Ok(response.data)
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn upload_method(method: &str) -> std::result::Result<Method, UsageError> {
    if method.is_empty() {
        return Ok(Method::POST);
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| UsageError::InvalidUploadMethod(method.to_owned()))
}

/// The store address of the uploaded object: the form URL with its path set to the key.
fn object_url(form_url: &Url, key: &str, filename: &str) -> String {
    let key = key.replace(FILENAME_PLACEHOLDER, filename);
    let mut url = form_url.clone();
    url.set_path(&key);
    url.set_query(None);
    url.to_string()
}

fn upload_rejected(raw: RawResponse) -> Error {
    let body = String::from_utf8_lossy(&raw.body).into_owned();
    tracing::error!(
        status = raw.status.as_u16(),
        url = %raw.url,
        body = %body,
        "Object store rejected upload"
    );
    Error::Upload {
        method: raw.method,
        url: raw.url,
        status: raw.status,
        body,
    }
}
