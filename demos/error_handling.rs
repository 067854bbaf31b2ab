//! Shows how each error category surfaces to a caller.
//!
//! Run with: `cargo run --example error_handling`

use hoist::{Client, Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn fetch(client: &Client, path: &str, cancel: &CancellationToken) {
    println!("GET {path}");
    match client.get::<serde_json::Value>(path, cancel).await {
        Ok(response) => println!("  ok after {} attempt(s)", response.attempts),
        Err(Error::Api(api)) => {
            println!("  API error {} on {} {}", api.status, api.method, api.url);
            match &api.message {
                Some(message) => println!("  message: {message}"),
                None => println!("  raw body: {}", String::from_utf8_lossy(&api.raw_body)),
            }
        }
        Err(Error::MaxRetriesExceeded {
            attempts,
            last_error,
        }) => println!("  gave up after {attempts} attempts: {last_error}"),
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            ..
        }) => println!("  undecodable body ({serde_error}): {raw_response}"),
        Err(Error::Timeout) => println!("  timed out"),
        Err(Error::Cancelled) => println!("  cancelled"),
        Err(e) if e.is_usage() => println!("  caller bug: {e}"),
        Err(e) => println!("  other error: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("hoist=info,error_handling=info")
        .init();

    let client = Client::builder()
        .base_url(
            std::env::var("HOIST_API_URL").unwrap_or_else(|_| "https://api.example.com/".into()),
        )?
        .token(std::env::var("HOIST_TOKEN").unwrap_or_default())
        .timeout(Duration::from_secs(10))
        .build()?;

    let cancel = CancellationToken::new();
    fetch(&client, "v2/user", &cancel).await;
    fetch(&client, "v2/organizations/does-not-exist", &cancel).await;
    fetch(&client, "http://[::1", &cancel).await;

    cancel.cancel();
    fetch(&client, "v2/user", &cancel).await;

    Ok(())
}
