//! Uploads a package artifact through the presigned workflow.
//!
//! Run with:
//! `HOIST_TOKEN=... cargo run --example upload_package -- acme tools target/app-1.0.0.tgz`
//!
//! Pass `-` as the file to upload standard input.

use hoist::{Client, Error, UploadSource};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("hoist=info,upload_package=info")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [org, registry, file] = args.as_slice() else {
        return Err(Error::ConfigurationError(
            "usage: upload_package <org> <registry> <file|->".into(),
        ));
    };

    let client = Client::builder()
        .base_url(
            std::env::var("HOIST_API_URL").unwrap_or_else(|_| "https://api.example.com/".into()),
        )?
        .token(std::env::var("HOIST_TOKEN").unwrap_or_default())
        .debug(std::env::var_os("HOIST_DEBUG").is_some())
        .build()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let source = if file == "-" {
        UploadSource::from_reader(tokio::io::stdin(), "package.tgz").await?
    } else {
        UploadSource::from_path(file)
    };

    let package = client
        .packages(org.as_str(), registry.as_str())
        .create(&source, &cancel)
        .await?;
    println!("Created package {} ({})", package.id, package.web_url);

    Ok(())
}
