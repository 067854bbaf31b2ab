//! Lists a pipeline's builds page by page, then triggers a new build.
//!
//! Run with: `HOIST_TOKEN=... cargo run --example basic_call -- acme app`
//!
//! `HOIST_API_URL` overrides the API address.

use hoist::{Client, Error, RequestBody, RequestMetadata};
use http::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Build {
    number: u64,
    state: String,
    #[serde(default)]
    branch: String,
}

#[derive(Debug, Serialize)]
struct CreateBuild {
    commit: String,
    branch: String,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("hoist=debug,basic_call=info")
        .init();

    let mut args = std::env::args().skip(1);
    let org = args.next().unwrap_or_else(|| "acme".to_string());
    let pipeline = args.next().unwrap_or_else(|| "app".to_string());

    let client = Client::builder()
        .base_url(
            std::env::var("HOIST_API_URL").unwrap_or_else(|_| "https://api.example.com/".into()),
        )?
        .token(std::env::var("HOIST_TOKEN").unwrap_or_default())
        .build()?;
    let cancel = CancellationToken::new();

    let builds_path = format!("v2/organizations/{org}/pipelines/{pipeline}/builds");

    println!("=== Listing builds ===");
    let mut page = 1;
    loop {
        let metadata = RequestMetadata::new(Method::GET, builds_path.as_str())
            .with_query_param("page", page.to_string());
        let response = client
            .call::<Vec<Build>>(metadata, RequestBody::Empty, &cancel)
            .await?;

        for build in &response.data {
            println!("#{} {} ({})", build.number, build.state, build.branch);
        }
        println!("page {page} took {:?}", response.latency);

        if !response.pagination.has_next() {
            break;
        }
        page = response.pagination.next_page;
    }

    println!("=== Triggering a build ===");
    let request = CreateBuild {
        commit: "HEAD".to_string(),
        branch: "main".to_string(),
        message: "Triggered from hoist".to_string(),
    };
    let created = client.post::<_, Build>(&builds_path, &request, &cancel).await?;
    println!("Started build #{} ({})", created.data.number, created.data.state);

    Ok(())
}
