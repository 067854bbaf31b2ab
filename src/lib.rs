//! # Hoist - HTTP client core for a build-automation REST API
//!
//! Hoist is the transport layer shared by every resource call: it injects credentials,
//! encodes request bodies, retries rate-limited reads, extracts pagination cursors from
//! `Link` headers and classifies failures. It also streams large package artifacts to an
//! object store through a presigned-upload workflow without buffering them in memory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hoist::Client;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Serialize)]
//! struct CreateBuild {
//!     commit: String,
//!     branch: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct Build {
//!     number: u64,
//!     state: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hoist::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/")?
//!         .token("secret")
//!         .timeout(Duration::from_secs(30))
//!         .build()?;
//!     let cancel = CancellationToken::new();
//!
//!     let builds = client
//!         .get::<Vec<Build>>("v2/organizations/acme/pipelines/app/builds", &cancel)
//!         .await?;
//!     println!("{} builds, next page {}", builds.data.len(), builds.pagination.next_page);
//!
//!     let new_build = CreateBuild {
//!         commit: "HEAD".to_string(),
//!         branch: "main".to_string(),
//!     };
//!     let created = client
//!         .post::<_, Build>("v2/organizations/acme/pipelines/app/builds", &new_build, &cancel)
//!         .await?;
//!     println!("Build #{} is {}", created.data.number, created.data.state);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Retries
//!
//! Only `GET` requests answered with `429 Too Many Requests` are retried by default, with
//! the delay taken from the server's rate-limit headers when present. Every other
//! outcome, including non-429 errors and transport failures, is returned after a single
//! attempt. Widen the policy with a [`RetryPredicate`]:
//!
//! ```no_run
//! use hoist::{Client, RetryStrategy};
//! use hoist::retry::{OrPredicate, RetryRateLimitedGet, RetryRateLimitedIdempotent};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), hoist::Error> {
//! let client = Client::builder()
//!     .base_url("https://api.example.com/")?
//!     .retry_strategy(RetryStrategy::Linear {
//!         delay: Duration::from_secs(1),
//!         max_retries: 5,
//!     })
//!     .retry_predicate(Box::new(OrPredicate::new(vec![
//!         Box::new(RetryRateLimitedGet),
//!         Box::new(RetryRateLimitedIdempotent),
//!     ])))
//!     .max_elapsed_time(Duration::from_secs(60))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Uploads
//!
//! Package artifacts go through three steps: request a presigned target, stream the file
//! to it, then register the stored object. [`packages::PackagesService::create`] runs all
//! three; the [`upload`] module exposes each step on its own.

mod client;
mod error;
pub mod multipart;
pub mod packages;
pub mod pagination;
pub mod rate_limit;
pub mod request;
mod response;
pub mod retry;
pub mod upload;

pub use client::{Client, ClientBuilder, DEFAULT_USER_AGENT};
pub use error::{ApiError, Error, Result, UsageError};
pub use multipart::MultipartStreamer;
pub use packages::{Package, PackagesService};
pub use pagination::Pagination;
pub use request::{RequestBody, RequestMetadata, StreamBody};
pub use response::{RawResponse, Response};
pub use retry::{RetryPredicate, RetryStrategy};
pub use upload::{PresignedUpload, UploadDescriptor, UploadForm, UploadSource, UploadedPackage};
