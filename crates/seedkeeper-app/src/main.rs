#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint that wires the scheduling core's services together and
//! blocks until shutdown.

/// Bootstraps the application and blocks until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    seedkeeper_app::run_app().await.map_err(anyhow::Error::from)
}
