//! Package registry resource.

use crate::request::{RequestBody, RequestMetadata};
use crate::upload::{PresignedUpload, UploadDescriptor, UploadSource};
use crate::{Client, Result};
use http::Method;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// A registered package.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Package {
    /// Package identifier.
    pub id: String,
    /// API URL of the package.
    #[serde(default)]
    pub url: String,
    /// Browser URL of the package.
    #[serde(default)]
    pub web_url: String,
    /// Package name.
    #[serde(default)]
    pub name: String,
    /// Creation timestamp as sent by the API.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Operations on the packages of one registry within an organization.
///
/// Obtained from [`Client::packages`].
pub struct PackagesService<'c> {
    client: &'c Client,
    organization: String,
    registry: String,
}

impl<'c> PackagesService<'c> {
    pub(crate) fn new(client: &'c Client, organization: String, registry: String) -> Self {
        Self {
            client,
            organization,
            registry,
        }
    }

    /// Asks the API for a presigned upload target for a new package.
    pub async fn request_presigned_upload(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PresignedUpload> {
        let path = format!(
            "{}/upload",
            packages_path(&self.organization, &self.registry)
        );
        let response = self
            .client
            .call::<UploadDescriptor>(
                RequestMetadata::new(Method::POST, path),
                RequestBody::Empty,
                cancel,
            )
            .await?;

        tracing::debug!(uri = %response.data.uri, "Presigned upload issued");
        Ok(PresignedUpload::new(
            self.organization.clone(),
            self.registry.clone(),
            response.data,
        ))
    }

    /// Uploads `source` and registers it as a new package.
    ///
    /// Runs the whole presigned workflow: request a target, stream the file to it, then
    /// finalize. Any failing step ends the call with that step's error.
    ///
    /// ```no_run
    /// use hoist::{Client, UploadSource};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), hoist::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com/")?
    ///     .token("secret")
    ///     .build()?;
    /// let cancel = CancellationToken::new();
    ///
    /// let source = UploadSource::from_path("target/release/app-1.0.0.tgz");
    /// let package = client.packages("acme", "tools").create(&source, &cancel).await?;
    /// println!("created {}", package.web_url);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create(&self, source: &UploadSource, cancel: &CancellationToken) -> Result<Package> {
        let presigned = self.request_presigned_upload(cancel).await?;
        let uploaded = presigned.perform(self.client, source, cancel).await?;
        uploaded.finalize(self.client, cancel).await
    }
}

pub(crate) fn packages_path(organization: &str, registry: &str) -> String {
    format!("v2/packages/organizations/{organization}/registries/{registry}/packages")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packages_path() {
        assert_eq!(
            packages_path("acme", "tools"),
            "v2/packages/organizations/acme/registries/tools/packages"
        );
    }

    #[test]
    fn test_package_decoding_tolerates_missing_fields() {
        let package: Package = serde_json::from_str(r#"{"id":"0191-abc","name":"app"}"#).unwrap();
        assert_eq!(package.id, "0191-abc");
        assert_eq!(package.name, "app");
        assert_eq!(package.created_at, None);
    }
}
